//! Compress-side per-stream processors.
//!
//! Each source stream gets exactly one processor, chosen at open time: raw
//! video is re-encoded with the configured lossless codec, everything else is
//! passed through. Both feed the shared finalizer, which keeps packets in
//! demux order so `(stream, ordinal, pts)` stays a stable reverse key.

use crate::config::EncodeConfig;
use crate::error::{Error, Result};
use crate::media::codec::{self, LlzEncoder, LlzOptions, RawVideoDecoder, LLZ_CODEC_ID};
use crate::media::frame;
use crate::media::mux::MatroskaMuxer;
use crate::media::pixfmt::{self, PixelFormat};
use crate::media::rational::{self, Rational};
use crate::media::{Packet, Stream};
use crate::reftable::PacketReferences;

struct Finalizer {
    in_time_base: Rational,
    out_time_base: Rational,
    out_stream_index: usize,
    next_packet_index: u64,
}

impl Finalizer {
    fn new(input: &Stream, output: &Stream) -> Self {
        Self {
            in_time_base: input.time_base,
            out_time_base: output.time_base,
            out_stream_index: output.index,
            next_packet_index: 0,
        }
    }

    /// Rescales timestamps, assigns the output stream and ordinal, records
    /// the reference and hands the packet to the muxer.
    fn write(
        &mut self,
        input: &Packet,
        data: Vec<u8>,
        keyframe: bool,
        muxer: &mut MatroskaMuxer,
        refs: &mut PacketReferences,
    ) -> Result<()> {
        if input.pos < 0 {
            return Err(Error::external("demux", "packet position unavailable"));
        }

        let output = Packet {
            stream_index: self.out_stream_index,
            pts: rational::rescale(input.pts, self.in_time_base, self.out_time_base),
            dts: rational::rescale(input.dts, self.in_time_base, self.out_time_base),
            duration: rational::rescale(input.duration, self.in_time_base, self.out_time_base),
            pos: -1,
            keyframe,
            data,
        };

        let packet_index = self.next_packet_index;
        self.next_packet_index += 1;

        log::debug!(
            " -> Output packet: Stream #0:{} (index {} size {}) - pts {} dts {} duration {}",
            output.stream_index,
            packet_index,
            output.data.len(),
            output.pts,
            output.dts,
            output.duration
        );

        refs.add_packet_reference(
            output.stream_index as u32,
            packet_index,
            output.pts,
            input.pos as u64,
            input.data.len() as u32,
        )?;
        muxer.write_packet(&output)
    }
}

pub struct VideoEncoder {
    finalizer: Finalizer,
    decoder: RawVideoDecoder,
    encoder: LlzEncoder,
    target_format: PixelFormat,
}

impl VideoEncoder {
    fn process_packet(
        &mut self,
        packet: &Packet,
        muxer: &mut MatroskaMuxer,
        refs: &mut PacketReferences,
    ) -> Result<()> {
        let decoded = self.decoder.decode_packet(packet)?;
        log::debug!(
            " -> Decoded {}x{} {} pts {}",
            decoded.width,
            decoded.height,
            decoded.format.name(),
            packet.pts
        );

        log::debug!(
            " -> Converting from {} to {}",
            decoded.format.name(),
            self.target_format.name()
        );
        let converted = frame::convert(&decoded, self.target_format)?;
        let data = self.encoder.encode_frame(&converted)?;

        self.finalizer.write(packet, data, true, muxer, refs)
    }
}

pub struct CopyEncoder {
    finalizer: Finalizer,
}

impl CopyEncoder {
    fn process_packet(
        &mut self,
        packet: &Packet,
        muxer: &mut MatroskaMuxer,
        refs: &mut PacketReferences,
    ) -> Result<()> {
        self.finalizer.write(packet, packet.data.clone(), packet.keyframe, muxer, refs)
    }
}

pub enum StreamEncoder {
    Video(VideoEncoder),
    Copy(CopyEncoder),
}

impl StreamEncoder {
    /// Selects the processor for one source stream, registers its descriptor
    /// and returns the stream to declare in the output container.
    pub fn for_stream(
        input: &Stream,
        config: &EncodeConfig,
        refs: &mut PacketReferences,
    ) -> Result<(Self, Stream)> {
        let input_codec = codec::codec_name(&input.codec_id);

        if input_codec == "rawvideo" {
            log::debug!("  Stream #0:{}: input_codec=rawvideo output_codec={}",
                input.index, config.video_codec);

            let decoder = RawVideoDecoder::new(input)?;
            let src_format = decoder.pixel_format();
            refs.add_video_stream(src_format.name());

            let options = LlzOptions::from_map(&config.codec_options)?;
            let target_format =
                pixfmt::select_lossless_format(src_format, LlzEncoder::accepted_formats())?;
            let video = input
                .video
                .ok_or_else(|| Error::external("codec", "rawvideo stream without dimensions"))?;
            let encoder = LlzEncoder::new(target_format, video.width, video.height, options);

            let mut output = input.clone();
            output.codec_id = LLZ_CODEC_ID.to_string();
            output.codec_private = target_format.name().as_bytes().to_vec();

            let finalizer = Finalizer::new(input, &output);
            Ok((
                StreamEncoder::Video(VideoEncoder { finalizer, decoder, encoder, target_format }),
                output,
            ))
        } else {
            log::debug!("  Stream #0:{}: input_codec={} output_codec=copy", input.index, input_codec);

            refs.add_copy_stream();
            let output = input.clone();
            let finalizer = Finalizer::new(input, &output);
            Ok((StreamEncoder::Copy(CopyEncoder { finalizer }), output))
        }
    }

    pub fn process_packet(
        &mut self,
        packet: &Packet,
        muxer: &mut MatroskaMuxer,
        refs: &mut PacketReferences,
    ) -> Result<()> {
        match self {
            StreamEncoder::Video(encoder) => encoder.process_packet(packet, muxer, refs),
            StreamEncoder::Copy(encoder) => encoder.process_packet(packet, muxer, refs),
        }
    }
}
