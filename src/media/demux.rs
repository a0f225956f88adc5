//! Matroska-subset demuxer.
//!
//! Reads the profile this tool writes, plus enough slack for similar files:
//! unknown elements are skipped, the Segment may have an unknown size, block
//! data is accepted both as SimpleBlock and as Block inside a BlockGroup.
//! Lacing is not supported.

use crate::error::{Error, Result};
use crate::media::ebml::{self, ElementHeader};
use crate::media::rational::Rational;
use crate::media::{AudioParams, MediaType, Packet, Stream, VideoParams};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

// Top level and EBML header
pub(crate) const ID_EBML: u32 = 0x1A45DFA3;
pub(crate) const ID_DOCTYPE: u32 = 0x4282;
pub(crate) const ID_SEGMENT: u32 = 0x18538067;
pub(crate) const ID_VOID: u32 = 0xEC;
pub(crate) const ID_CRC32: u32 = 0xBF;

// Segment children
pub(crate) const ID_INFO: u32 = 0x1549A966;
pub(crate) const ID_TIMESTAMP_SCALE: u32 = 0x2AD7B1;
pub(crate) const ID_TRACKS: u32 = 0x1654AE6B;
pub(crate) const ID_CLUSTER: u32 = 0x1F43B675;

// TrackEntry
pub(crate) const ID_TRACK_ENTRY: u32 = 0xAE;
pub(crate) const ID_TRACK_NUMBER: u32 = 0xD7;
pub(crate) const ID_TRACK_UID: u32 = 0x73C5;
pub(crate) const ID_TRACK_TYPE: u32 = 0x83;
pub(crate) const ID_CODEC_ID: u32 = 0x86;
pub(crate) const ID_CODEC_PRIVATE: u32 = 0x63A2;
pub(crate) const ID_DEFAULT_DURATION: u32 = 0x23E383;
pub(crate) const ID_VIDEO: u32 = 0xE0;
pub(crate) const ID_PIXEL_WIDTH: u32 = 0xB0;
pub(crate) const ID_PIXEL_HEIGHT: u32 = 0xBA;
pub(crate) const ID_AUDIO: u32 = 0xE1;
pub(crate) const ID_SAMPLING_FREQUENCY: u32 = 0xB5;
pub(crate) const ID_CHANNELS: u32 = 0x9F;
pub(crate) const ID_BIT_DEPTH: u32 = 0x6264;

// Cluster children
pub(crate) const ID_CLUSTER_TIMESTAMP: u32 = 0xE7;
pub(crate) const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub(crate) const ID_BLOCK_GROUP: u32 = 0xA0;
pub(crate) const ID_BLOCK: u32 = 0xA1;
pub(crate) const ID_BLOCK_DURATION: u32 = 0x9B;
pub(crate) const ID_REFERENCE_BLOCK: u32 = 0xFB;

pub(crate) const DEFAULT_TIMESTAMP_SCALE: u64 = 1_000_000;
pub(crate) const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;

const TRACK_TYPE_VIDEO: u64 = 1;
const TRACK_TYPE_AUDIO: u64 = 2;
const TRACK_TYPE_SUBTITLE: u64 = 17;

fn corrupt(path: &str, what: impl Into<String>) -> Error {
    Error::external("demux", format!("{path}: {}", what.into()))
}

struct ClusterState {
    /// Absolute offset one past the cluster payload.
    end: u64,
    timestamp: Option<i64>,
}

pub struct MatroskaDemuxer {
    reader: BufReader<File>,
    path: String,
    size: u64,
    timestamp_scale: u64,
    streams: Vec<Stream>,
    /// Matroska track number -> stream index.
    track_map: Vec<(u64, usize)>,
    segment_end: Option<u64>,
    cluster: Option<ClusterState>,
    finished: bool,
}

impl MatroskaDemuxer {
    /// Opens a container and parses everything up to the first cluster.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let file = File::open(&path)
            .map_err(|e| Error::external("open", format!("{display}: {e}")))?;
        let size = file.metadata()?.len();

        let mut demuxer = Self {
            reader: BufReader::new(file),
            path: display,
            size,
            timestamp_scale: DEFAULT_TIMESTAMP_SCALE,
            streams: Vec::new(),
            track_map: Vec::new(),
            segment_end: None,
            cluster: None,
            finished: false,
        };
        demuxer.read_headers()?;
        Ok(demuxer)
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    /// Size in bytes of the underlying file.
    pub fn byte_size(&self) -> u64 {
        self.size
    }

    /// Direct access to the underlying byte stream; the sidecar writer makes
    /// a second pass over the source container through this.
    pub fn reader_mut(&mut self) -> &mut BufReader<File> {
        &mut self.reader
    }

    fn next_header(&mut self) -> Result<Option<ElementHeader>> {
        ebml::read_element_header(&mut self.reader)
    }

    fn skip(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size element cannot be skipped"))?;
        self.reader.seek(SeekFrom::Current(size as i64))?;
        Ok(())
    }

    fn read_headers(&mut self) -> Result<()> {
        let header = self
            .next_header()?
            .ok_or_else(|| corrupt(&self.path, "empty file"))?;
        if header.id != ID_EBML {
            return Err(corrupt(&self.path, "missing EBML header"));
        }
        self.read_ebml_header(&header)?;

        // locate the Segment
        loop {
            let header = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "no Segment element"))?;
            match header.id {
                ID_SEGMENT => {
                    let start = self.reader.stream_position()?;
                    self.segment_end = header.size.map(|s| start + s);
                    break;
                }
                ID_VOID | ID_CRC32 => self.skip(&header)?,
                _ => return Err(corrupt(&self.path, "no Segment element")),
            }
        }

        // Info and Tracks come before the first cluster in this profile
        loop {
            let position = self.reader.stream_position()?;
            if self.segment_end.is_some_and(|end| position >= end) {
                break;
            }
            let Some(header) = self.next_header()? else {
                break;
            };
            match header.id {
                ID_INFO => self.read_info(&header)?,
                ID_TRACKS => self.read_tracks(&header)?,
                ID_CLUSTER => {
                    self.enter_cluster(&header)?;
                    break;
                }
                _ => self.skip(&header)?,
            }
        }

        let time_base =
            Rational::new(self.timestamp_scale as i64, NANOSECONDS_PER_SECOND as i64).reduced();
        for stream in &mut self.streams {
            stream.time_base = time_base;
        }

        log::debug!(
            "{}: {} stream(s), timestamp scale {}",
            self.path,
            self.streams.len(),
            self.timestamp_scale
        );
        Ok(())
    }

    fn read_ebml_header(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size EBML header"))?;
        let end = self.reader.stream_position()? + size;

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated EBML header"))?;
            match child.id {
                ID_DOCTYPE => {
                    let doctype = ebml::read_string(&mut self.reader, child.size.unwrap_or(0))?;
                    if doctype != "matroska" && doctype != "webm" {
                        return Err(corrupt(&self.path, format!("unsupported doctype: {doctype}")));
                    }
                }
                _ => self.skip(&child)?,
            }
        }
        Ok(())
    }

    fn read_info(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size Info"))?;
        let end = self.reader.stream_position()? + size;

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated Info"))?;
            match child.id {
                ID_TIMESTAMP_SCALE => {
                    self.timestamp_scale =
                        ebml::read_uint(&mut self.reader, child.size.unwrap_or(0))?;
                    if self.timestamp_scale == 0 {
                        return Err(corrupt(&self.path, "zero timestamp scale"));
                    }
                }
                _ => self.skip(&child)?,
            }
        }
        Ok(())
    }

    fn read_tracks(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size Tracks"))?;
        let end = self.reader.stream_position()? + size;

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated Tracks"))?;
            match child.id {
                ID_TRACK_ENTRY => self.read_track_entry(&child)?,
                _ => self.skip(&child)?,
            }
        }
        Ok(())
    }

    fn read_track_entry(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size TrackEntry"))?;
        let end = self.reader.stream_position()? + size;

        let index = self.streams.len();
        let mut track_number = None;
        let mut media_type = MediaType::Data;
        let mut codec_id = String::new();
        let mut codec_private = Vec::new();
        let mut default_duration_ns = None;
        let mut video = None;
        let mut audio = None;

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated TrackEntry"))?;
            let child_size = child.size.unwrap_or(0);
            match child.id {
                ID_TRACK_NUMBER => track_number = Some(ebml::read_uint(&mut self.reader, child_size)?),
                ID_TRACK_TYPE => {
                    media_type = match ebml::read_uint(&mut self.reader, child_size)? {
                        TRACK_TYPE_VIDEO => MediaType::Video,
                        TRACK_TYPE_AUDIO => MediaType::Audio,
                        TRACK_TYPE_SUBTITLE => MediaType::Subtitle,
                        _ => MediaType::Data,
                    };
                }
                ID_CODEC_ID => codec_id = ebml::read_string(&mut self.reader, child_size)?,
                ID_CODEC_PRIVATE => codec_private = ebml::read_binary(&mut self.reader, child_size)?,
                ID_DEFAULT_DURATION => {
                    default_duration_ns = Some(ebml::read_uint(&mut self.reader, child_size)?)
                }
                ID_VIDEO => video = Some(self.read_video_params(&child)?),
                ID_AUDIO => audio = Some(self.read_audio_params(&child)?),
                _ => self.skip(&child)?,
            }
        }

        let track_number =
            track_number.ok_or_else(|| corrupt(&self.path, "TrackEntry without TrackNumber"))?;
        if codec_id.is_empty() {
            return Err(corrupt(&self.path, "TrackEntry without CodecID"));
        }
        self.track_map.push((track_number, index));
        self.streams.push(Stream {
            index,
            // patched once the timestamp scale is final
            time_base: Rational::new(1, 1000),
            media_type,
            codec_id,
            codec_private,
            default_duration_ns,
            video,
            audio,
        });
        Ok(())
    }

    fn read_video_params(&mut self, header: &ElementHeader) -> Result<VideoParams> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size Video"))?;
        let end = self.reader.stream_position()? + size;
        let mut params = VideoParams { width: 0, height: 0 };

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated Video"))?;
            let child_size = child.size.unwrap_or(0);
            match child.id {
                ID_PIXEL_WIDTH => params.width = ebml::read_uint(&mut self.reader, child_size)? as u32,
                ID_PIXEL_HEIGHT => params.height = ebml::read_uint(&mut self.reader, child_size)? as u32,
                _ => self.skip(&child)?,
            }
        }

        if params.width == 0 || params.height == 0 {
            return Err(corrupt(&self.path, "video track without dimensions"));
        }
        Ok(params)
    }

    fn read_audio_params(&mut self, header: &ElementHeader) -> Result<AudioParams> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size Audio"))?;
        let end = self.reader.stream_position()? + size;
        let mut params = AudioParams { sampling_frequency: 8000.0, channels: 1, bit_depth: None };

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated Audio"))?;
            let child_size = child.size.unwrap_or(0);
            match child.id {
                ID_SAMPLING_FREQUENCY => {
                    params.sampling_frequency = ebml::read_float(&mut self.reader, child_size)?
                }
                ID_CHANNELS => params.channels = ebml::read_uint(&mut self.reader, child_size)?,
                ID_BIT_DEPTH => {
                    params.bit_depth = Some(ebml::read_uint(&mut self.reader, child_size)?)
                }
                _ => self.skip(&child)?,
            }
        }
        Ok(params)
    }

    fn enter_cluster(&mut self, header: &ElementHeader) -> Result<()> {
        let size = header
            .size
            .ok_or_else(|| Error::Unsupported("unknown-size cluster".into()))?;
        let start = self.reader.stream_position()?;
        self.cluster = Some(ClusterState { end: start + size, timestamp: None });
        Ok(())
    }

    /// Reads the next packet in container order. `Ok(None)` signals the end
    /// of the container.
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if let Some(cluster_end) = self.cluster.as_ref().map(|c| c.end) {
                let position = self.reader.stream_position()?;
                if position > cluster_end {
                    return Err(corrupt(&self.path, "cluster overran its size"));
                }
                if position == cluster_end {
                    self.cluster = None;
                    continue;
                }

                let header = self
                    .next_header()?
                    .ok_or_else(|| corrupt(&self.path, "truncated cluster"))?;
                match header.id {
                    ID_CLUSTER_TIMESTAMP => {
                        let value = ebml::read_uint(&mut self.reader, header.size.unwrap_or(0))?;
                        if let Some(cluster) = self.cluster.as_mut() {
                            cluster.timestamp = Some(value as i64);
                        }
                    }
                    ID_SIMPLE_BLOCK => {
                        let packet = self.read_block(&header, None)?;
                        return Ok(Some(packet));
                    }
                    ID_BLOCK_GROUP => {
                        let packet = self.read_block_group(&header)?;
                        return Ok(Some(packet));
                    }
                    _ => self.skip(&header)?,
                }
            } else {
                let position = self.reader.stream_position()?;
                if self.segment_end.is_some_and(|end| position >= end) {
                    self.finished = true;
                    return Ok(None);
                }
                let Some(header) = self.next_header()? else {
                    self.finished = true;
                    return Ok(None);
                };
                match header.id {
                    ID_CLUSTER => self.enter_cluster(&header)?,
                    _ => self.skip(&header)?,
                }
            }
        }
    }

    fn read_block_group(&mut self, header: &ElementHeader) -> Result<Packet> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size BlockGroup"))?;
        let end = self.reader.stream_position()? + size;

        let mut packet = None;
        let mut duration = None;
        let mut referenced = false;

        while self.reader.stream_position()? < end {
            let child = self
                .next_header()?
                .ok_or_else(|| corrupt(&self.path, "truncated BlockGroup"))?;
            match child.id {
                ID_BLOCK => packet = Some(self.read_block(&child, Some(false))?),
                ID_BLOCK_DURATION => {
                    duration = Some(ebml::read_uint(&mut self.reader, child.size.unwrap_or(0))? as i64)
                }
                ID_REFERENCE_BLOCK => {
                    referenced = true;
                    self.skip(&child)?;
                }
                _ => self.skip(&child)?,
            }
        }

        let mut packet = packet.ok_or_else(|| corrupt(&self.path, "BlockGroup without Block"))?;
        packet.keyframe = !referenced;
        if let Some(duration) = duration {
            packet.duration = duration;
        }
        Ok(packet)
    }

    fn read_block(&mut self, header: &ElementHeader, keyframe_override: Option<bool>) -> Result<Packet> {
        let size = header
            .size
            .ok_or_else(|| corrupt(&self.path, "unknown-size block"))?;

        let (track_number, track_len, _) = ebml::read_vint(&mut self.reader)?;
        let mut head = [0u8; 3];
        self.reader.read_exact(&mut head)?;
        let rel_timestamp = i16::from_be_bytes([head[0], head[1]]) as i64;
        let flags = head[2];

        if flags & 0x06 != 0 {
            return Err(Error::Unsupported("block lacing".into()));
        }

        let header_bytes = track_len as u64 + 3;
        if size < header_bytes {
            return Err(corrupt(&self.path, "block shorter than its header"));
        }

        let pos = self.reader.stream_position()?;
        let payload_len = (size - header_bytes) as usize;
        let mut data = vec![0u8; payload_len];
        self.reader.read_exact(&mut data)?;

        let stream_index = self
            .track_map
            .iter()
            .find(|&&(number, _)| number == track_number)
            .map(|&(_, index)| index)
            .ok_or_else(|| corrupt(&self.path, format!("block for unknown track {track_number}")))?;

        let cluster_timestamp = self
            .cluster
            .as_ref()
            .and_then(|c| c.timestamp)
            .ok_or_else(|| corrupt(&self.path, "block before cluster timestamp"))?;

        let pts = cluster_timestamp + rel_timestamp;
        let keyframe = keyframe_override.unwrap_or(flags & 0x80 != 0);
        let duration = self.default_block_duration(stream_index);

        Ok(Packet {
            stream_index,
            pts,
            dts: pts,
            duration,
            pos: pos as i64,
            keyframe,
            data,
        })
    }

    fn default_block_duration(&self, stream_index: usize) -> i64 {
        match self.streams[stream_index].default_duration_ns {
            Some(ns) => {
                let scale = self.timestamp_scale;
                ((ns + scale / 2) / scale) as i64
            }
            None => 0,
        }
    }
}
