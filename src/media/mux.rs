//! Matroska-subset muxer.
//!
//! Writes EBML header, Info, Tracks, then clusters of SimpleBlocks. One
//! cluster is buffered at a time and flushed when the relative timestamp
//! leaves i16 range or the cluster grows past a size cap. The Segment size is
//! reserved as a fixed 8-byte vint and patched at trailer time.

use crate::error::{Error, Result};
use crate::media::demux::{
    DEFAULT_TIMESTAMP_SCALE, ID_AUDIO, ID_BIT_DEPTH, ID_CHANNELS, ID_CLUSTER,
    ID_CLUSTER_TIMESTAMP, ID_CODEC_ID, ID_CODEC_PRIVATE, ID_DEFAULT_DURATION, ID_EBML, ID_INFO,
    ID_PIXEL_HEIGHT, ID_PIXEL_WIDTH, ID_SAMPLING_FREQUENCY, ID_SEGMENT, ID_SIMPLE_BLOCK,
    ID_TIMESTAMP_SCALE, ID_TRACKS, ID_TRACK_ENTRY, ID_TRACK_NUMBER, ID_TRACK_TYPE, ID_TRACK_UID,
    ID_VIDEO, NANOSECONDS_PER_SECOND,
};
use crate::media::ebml;
use crate::media::{MediaType, Packet, Stream};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

const ID_EBML_VERSION: u32 = 0x4286;
const ID_EBML_READ_VERSION: u32 = 0x42F7;
const ID_EBML_MAX_ID_LENGTH: u32 = 0x42F2;
const ID_EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
const ID_DOCTYPE: u32 = 0x4282;
const ID_DOCTYPE_VERSION: u32 = 0x4287;
const ID_DOCTYPE_READ_VERSION: u32 = 0x4285;
const ID_MUXING_APP: u32 = 0x4D80;
const ID_WRITING_APP: u32 = 0x5741;
const ID_FLAG_LACING: u32 = 0x9C;

const CLUSTER_SIZE_CAP: usize = 1 << 20;

struct PendingCluster {
    timestamp: i64,
    payload: Vec<u8>,
}

pub struct MatroskaMuxer {
    writer: BufWriter<File>,
    streams: Vec<Stream>,
    timestamp_scale: u64,
    segment_size_pos: u64,
    segment_data_start: u64,
    cluster: Option<PendingCluster>,
    header_written: bool,
}

impl MatroskaMuxer {
    /// Creates the output file. Streams must share one time base (the
    /// container carries a single timestamp scale).
    pub fn create<P: AsRef<Path>>(path: P, streams: Vec<Stream>) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = File::create(&path)
            .map_err(|e| Error::external("create", format!("{display}: {e}")))?;

        let timestamp_scale = match streams.first() {
            Some(first) => {
                if streams.iter().any(|s| s.time_base != first.time_base) {
                    return Err(Error::Unsupported(
                        "streams with different time bases in one container".into(),
                    ));
                }
                let tb = first.time_base;
                let scale = tb.num as i128 * NANOSECONDS_PER_SECOND as i128 / tb.den as i128;
                if scale <= 0 || tb.num as i128 * NANOSECONDS_PER_SECOND as i128 % tb.den as i128 != 0 {
                    return Err(Error::Unsupported(format!(
                        "time base {tb} is not representable in nanoseconds"
                    )));
                }
                scale as u64
            }
            None => DEFAULT_TIMESTAMP_SCALE,
        };

        Ok(Self {
            writer: BufWriter::new(file),
            streams,
            timestamp_scale,
            segment_size_pos: 0,
            segment_data_start: 0,
            cluster: None,
            header_written: false,
        })
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub fn write_header(&mut self) -> Result<()> {
        let mut ebml_header = Vec::new();
        ebml::write_uint_element(&mut ebml_header, ID_EBML_VERSION, 1)?;
        ebml::write_uint_element(&mut ebml_header, ID_EBML_READ_VERSION, 1)?;
        ebml::write_uint_element(&mut ebml_header, ID_EBML_MAX_ID_LENGTH, 4)?;
        ebml::write_uint_element(&mut ebml_header, ID_EBML_MAX_SIZE_LENGTH, 8)?;
        ebml::write_string_element(&mut ebml_header, ID_DOCTYPE, "matroska")?;
        ebml::write_uint_element(&mut ebml_header, ID_DOCTYPE_VERSION, 4)?;
        ebml::write_uint_element(&mut ebml_header, ID_DOCTYPE_READ_VERSION, 2)?;
        ebml::write_master_element(&mut self.writer, ID_EBML, &ebml_header)?;

        ebml::write_element_id(&mut self.writer, ID_SEGMENT)?;
        self.segment_size_pos = self.writer.stream_position()?;
        ebml::write_vint_fixed8(&mut self.writer, 0)?;
        self.segment_data_start = self.writer.stream_position()?;

        let app = concat!("llrpack ", env!("CARGO_PKG_VERSION"));
        let mut info = Vec::new();
        ebml::write_uint_element(&mut info, ID_TIMESTAMP_SCALE, self.timestamp_scale)?;
        ebml::write_string_element(&mut info, ID_MUXING_APP, app)?;
        ebml::write_string_element(&mut info, ID_WRITING_APP, app)?;
        ebml::write_master_element(&mut self.writer, ID_INFO, &info)?;

        let mut tracks = Vec::new();
        for stream in &self.streams {
            let mut entry = Vec::new();
            ebml::write_uint_element(&mut entry, ID_TRACK_NUMBER, stream.index as u64 + 1)?;
            ebml::write_uint_element(&mut entry, ID_TRACK_UID, stream.index as u64 + 1)?;
            let track_type = match stream.media_type {
                MediaType::Video => 1,
                MediaType::Audio => 2,
                MediaType::Subtitle => 17,
                MediaType::Data => 3,
            };
            ebml::write_uint_element(&mut entry, ID_TRACK_TYPE, track_type)?;
            ebml::write_uint_element(&mut entry, ID_FLAG_LACING, 0)?;
            ebml::write_string_element(&mut entry, ID_CODEC_ID, &stream.codec_id)?;
            if !stream.codec_private.is_empty() {
                ebml::write_binary_element(&mut entry, ID_CODEC_PRIVATE, &stream.codec_private)?;
            }
            if let Some(duration) = stream.default_duration_ns {
                ebml::write_uint_element(&mut entry, ID_DEFAULT_DURATION, duration)?;
            }
            if let Some(video) = stream.video {
                let mut video_el = Vec::new();
                ebml::write_uint_element(&mut video_el, ID_PIXEL_WIDTH, video.width as u64)?;
                ebml::write_uint_element(&mut video_el, ID_PIXEL_HEIGHT, video.height as u64)?;
                ebml::write_master_element(&mut entry, ID_VIDEO, &video_el)?;
            }
            if let Some(audio) = &stream.audio {
                let mut audio_el = Vec::new();
                ebml::write_float_element(&mut audio_el, ID_SAMPLING_FREQUENCY, audio.sampling_frequency)?;
                ebml::write_uint_element(&mut audio_el, ID_CHANNELS, audio.channels)?;
                if let Some(bit_depth) = audio.bit_depth {
                    ebml::write_uint_element(&mut audio_el, ID_BIT_DEPTH, bit_depth)?;
                }
                ebml::write_master_element(&mut entry, ID_AUDIO, &audio_el)?;
            }
            ebml::write_master_element(&mut tracks, ID_TRACK_ENTRY, &entry)?;
        }
        ebml::write_master_element(&mut self.writer, ID_TRACKS, &tracks)?;

        self.header_written = true;
        Ok(())
    }

    /// Appends one packet. Callers feed packets in presentation order per
    /// stream; interleaving across streams is kept as given.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        debug_assert!(self.header_written);

        if packet.stream_index >= self.streams.len() {
            return Err(Error::Bug(format!(
                "packet for stream {} of {}",
                packet.stream_index,
                self.streams.len()
            )));
        }
        if packet.pts < 0 {
            return Err(Error::Unsupported("negative packet timestamp".into()));
        }

        let fits = self.cluster.as_ref().is_some_and(|cluster| {
            let rel = packet.pts - cluster.timestamp;
            rel >= i16::MIN as i64 && rel <= i16::MAX as i64 && cluster.payload.len() < CLUSTER_SIZE_CAP
        });
        if !fits {
            self.flush_cluster()?;
            let mut payload = Vec::new();
            ebml::write_uint_element(&mut payload, ID_CLUSTER_TIMESTAMP, packet.pts as u64)?;
            self.cluster = Some(PendingCluster { timestamp: packet.pts, payload });
        }

        let cluster = self.cluster.as_mut().expect("cluster was just opened");
        let rel = (packet.pts - cluster.timestamp) as i16;

        let mut block = Vec::with_capacity(packet.data.len() + 8);
        ebml::write_vint(&mut block, packet.stream_index as u64 + 1)?;
        block.extend_from_slice(&rel.to_be_bytes());
        block.push(if packet.keyframe { 0x80 } else { 0x00 });
        block.extend_from_slice(&packet.data);
        ebml::write_binary_element(&mut cluster.payload, ID_SIMPLE_BLOCK, &block)?;
        Ok(())
    }

    fn flush_cluster(&mut self) -> Result<()> {
        if let Some(cluster) = self.cluster.take() {
            ebml::write_master_element(&mut self.writer, ID_CLUSTER, &cluster.payload)?;
        }
        Ok(())
    }

    /// Flushes pending data and patches the Segment size.
    pub fn write_trailer(&mut self) -> Result<()> {
        self.flush_cluster()?;

        let end = self.writer.stream_position()?;
        let segment_size = end - self.segment_data_start;
        self.writer.seek(SeekFrom::Start(self.segment_size_pos))?;
        ebml::write_vint_fixed8(&mut self.writer, segment_size)?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::demux::MatroskaDemuxer;
    use crate::media::rational::Rational;
    use crate::media::{AudioParams, VideoParams};
    use std::io::Read;

    fn video_stream(index: usize) -> Stream {
        Stream {
            index,
            time_base: Rational::new(1, 1000),
            media_type: MediaType::Video,
            codec_id: "V_UNCOMPRESSED".into(),
            codec_private: b"rgb24".to_vec(),
            default_duration_ns: Some(40_000_000),
            video: Some(VideoParams { width: 4, height: 2 }),
            audio: None,
        }
    }

    fn audio_stream(index: usize) -> Stream {
        Stream {
            index,
            time_base: Rational::new(1, 1000),
            media_type: MediaType::Audio,
            codec_id: "A_AAC".into(),
            codec_private: vec![0x12, 0x10],
            default_duration_ns: None,
            video: None,
            audio: Some(AudioParams { sampling_frequency: 44100.0, channels: 2, bit_depth: Some(16) }),
        }
    }

    fn packet(stream_index: usize, pts: i64, keyframe: bool, data: Vec<u8>) -> Packet {
        Packet { stream_index, pts, dts: pts, duration: 0, pos: -1, keyframe, data }
    }

    #[test]
    fn mux_demux_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mkv");

        let packets = vec![
            packet(0, 0, true, vec![1u8; 24]),
            packet(1, 0, true, vec![2u8; 10]),
            packet(0, 40, true, vec![3u8; 24]),
            packet(1, 23, false, vec![4u8; 11]),
            packet(0, 80, false, vec![5u8; 24]),
        ];

        let mut muxer =
            MatroskaMuxer::create(&path, vec![video_stream(0), audio_stream(1)]).unwrap();
        muxer.write_header().unwrap();
        for p in &packets {
            muxer.write_packet(p).unwrap();
        }
        muxer.write_trailer().unwrap();

        let mut demuxer = MatroskaDemuxer::open(&path).unwrap();
        assert_eq!(demuxer.streams().len(), 2);
        assert_eq!(demuxer.streams()[0].codec_id, "V_UNCOMPRESSED");
        assert_eq!(demuxer.streams()[0].codec_private, b"rgb24");
        assert_eq!(demuxer.streams()[0].video, Some(VideoParams { width: 4, height: 2 }));
        assert_eq!(demuxer.streams()[1].codec_id, "A_AAC");
        assert_eq!(demuxer.streams()[1].time_base, Rational::new(1, 1000));

        let mut read_back = Vec::new();
        while let Some(p) = demuxer.read_packet().unwrap() {
            read_back.push(p);
        }
        assert_eq!(read_back.len(), packets.len());
        for (got, want) in read_back.iter().zip(&packets) {
            assert_eq!(got.stream_index, want.stream_index);
            assert_eq!(got.pts, want.pts);
            assert_eq!(got.keyframe, want.keyframe);
            assert_eq!(got.data, want.data);
        }
        // default duration propagates to video packets
        assert_eq!(read_back[0].duration, 40);
    }

    #[test]
    fn packet_positions_point_at_payload_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.mkv");

        let payloads: Vec<Vec<u8>> = vec![vec![0xAA; 16], vec![0xBB; 16], vec![0xCC; 16]];
        let mut muxer = MatroskaMuxer::create(&path, vec![video_stream(0)]).unwrap();
        muxer.write_header().unwrap();
        for (i, data) in payloads.iter().enumerate() {
            muxer.write_packet(&packet(0, i as i64 * 40, true, data.clone())).unwrap();
        }
        muxer.write_trailer().unwrap();

        let mut file_bytes = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut file_bytes).unwrap();

        let mut demuxer = MatroskaDemuxer::open(&path).unwrap();
        while let Some(p) = demuxer.read_packet().unwrap() {
            let start = p.pos as usize;
            assert_eq!(&file_bytes[start..start + p.data.len()], &p.data[..]);
        }
    }

    #[test]
    fn new_cluster_when_timestamp_leaves_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clusters.mkv");

        let mut muxer = MatroskaMuxer::create(&path, vec![video_stream(0)]).unwrap();
        muxer.write_header().unwrap();
        muxer.write_packet(&packet(0, 0, true, vec![1; 8])).unwrap();
        muxer.write_packet(&packet(0, 40_000, true, vec![2; 8])).unwrap();
        muxer.write_trailer().unwrap();

        let mut demuxer = MatroskaDemuxer::open(&path).unwrap();
        let first = demuxer.read_packet().unwrap().unwrap();
        let second = demuxer.read_packet().unwrap().unwrap();
        assert_eq!(first.pts, 0);
        assert_eq!(second.pts, 40_000);
        assert!(demuxer.read_packet().unwrap().is_none());
    }

    #[test]
    fn rejects_negative_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neg.mkv");

        let mut muxer = MatroskaMuxer::create(&path, vec![video_stream(0)]).unwrap();
        muxer.write_header().unwrap();
        let result = muxer.write_packet(&packet(0, -1, true, vec![0; 4]));
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }
}
