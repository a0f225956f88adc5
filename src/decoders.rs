//! Decompress-side per-stream processors.
//!
//! Each processor turns one packet of the remuxed container back into the
//! exact payload bytes the original container carried at the referenced
//! range.

use crate::error::{Error, Result};
use crate::media::codec::{LlzDecoder, RawVideoEncoder};
use crate::media::frame;
use crate::media::pixfmt::PixelFormat;
use crate::media::{Packet, Stream};
use crate::reftable::StreamInfo;

pub struct VideoDecoder {
    decoder: LlzDecoder,
    raw_encoder: RawVideoEncoder,
    output_format: PixelFormat,
}

impl VideoDecoder {
    fn decode_packet(&mut self, packet: &Packet) -> Result<Vec<u8>> {
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
            self.output_format.name()
        );
        let converted = frame::convert(&decoded, self.output_format)?;
        self.raw_encoder.encode_frame(&converted)
    }
}

pub enum StreamDecoder {
    Video(VideoDecoder),
    Copy,
}

impl StreamDecoder {
    /// Builds the processor matching a sidecar descriptor against the
    /// corresponding stream of the remuxed container.
    pub fn for_stream(stream: &Stream, info: &StreamInfo) -> Result<Self> {
        match info {
            StreamInfo::Video { pixel_format } => {
                log::debug!("  Stream #0:{}: output_codec=rawvideo {}", stream.index, pixel_format);

                let output_format = PixelFormat::from_name(pixel_format).ok_or_else(|| {
                    Error::CorruptSidecar(format!("invalid pixel format string: {pixel_format}"))
                })?;
                let decoder = LlzDecoder::new(stream)?;
                let video = stream
                    .video
                    .ok_or_else(|| Error::external("codec", "video stream without dimensions"))?;
                let raw_encoder = RawVideoEncoder::new(output_format, video.width, video.height);
                Ok(StreamDecoder::Video(VideoDecoder { decoder, raw_encoder, output_format }))
            }
            StreamInfo::Copy => {
                log::debug!("  Stream #0:{}: output_codec=copy", stream.index);
                Ok(StreamDecoder::Copy)
            }
        }
    }

    /// Returns the original payload bytes for one remuxed packet.
    pub fn decode_packet(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        match self {
            StreamDecoder::Video(decoder) => decoder.decode_packet(packet),
            StreamDecoder::Copy => Ok(packet.data.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec::{LlzEncoder, LlzOptions, LLZ_CODEC_ID};
    use crate::media::frame::Frame;
    use crate::media::pixfmt;
    use crate::media::rational::Rational;
    use crate::media::{MediaType, VideoParams};

    fn llz_stream(encoded_format: &str) -> Stream {
        Stream {
            index: 0,
            time_base: Rational::new(1, 1000),
            media_type: MediaType::Video,
            codec_id: LLZ_CODEC_ID.into(),
            codec_private: encoded_format.as_bytes().to_vec(),
            default_duration_ns: None,
            video: Some(VideoParams { width: 8, height: 4 }),
            audio: None,
        }
    }

    #[test]
    fn video_decoder_inverts_the_encode_path() {
        // compression stored bgr24 frames as rgb24 llz packets; decoding must
        // yield the original bgr24 bytes
        let size = pixfmt::picture_size(PixelFormat::Bgr24, 8, 4);
        let original: Vec<u8> = (0..size).map(|i| (i * 7 % 253) as u8).collect();
        let bgr_frame = Frame::new(PixelFormat::Bgr24, 8, 4, original.clone()).unwrap();
        let rgb_frame = frame::convert(&bgr_frame, PixelFormat::Rgb24).unwrap();

        let encoder = LlzEncoder::new(PixelFormat::Rgb24, 8, 4, LlzOptions::default());
        let payload = encoder.encode_frame(&rgb_frame).unwrap();
        let packet = Packet {
            stream_index: 0,
            pts: 0,
            dts: 0,
            duration: 40,
            pos: -1,
            keyframe: true,
            data: payload,
        };

        let info = StreamInfo::Video { pixel_format: "bgr24".into() };
        let mut decoder = StreamDecoder::for_stream(&llz_stream("rgb24"), &info).unwrap();
        assert_eq!(decoder.decode_packet(&packet).unwrap(), original);
    }

    #[test]
    fn copy_decoder_returns_payload_verbatim() {
        let mut stream = llz_stream("rgb24");
        stream.codec_id = "A_AAC".into();
        let mut decoder = StreamDecoder::for_stream(&stream, &StreamInfo::Copy).unwrap();
        let packet = Packet {
            stream_index: 0,
            pts: 5,
            dts: 5,
            duration: 0,
            pos: -1,
            keyframe: true,
            data: vec![1, 2, 3, 4],
        };
        assert_eq!(decoder.decode_packet(&packet).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn bad_descriptor_pixel_format_is_corrupt_sidecar() {
        let info = StreamInfo::Video { pixel_format: "not-a-format".into() };
        let result = StreamDecoder::for_stream(&llz_stream("rgb24"), &info);
        assert!(matches!(result, Err(Error::CorruptSidecar(_))));
    }
}
