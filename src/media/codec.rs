//! Codecs the repacking pipeline dispatches to: rawvideo packets and the
//! built-in lossless "llz" codec.
//!
//! An llz packet is `[flags u8][payload]`. STORED payloads are the frame
//! bytes verbatim; ENTROPY payloads are zstd output, optionally preceded by a
//! pixel-stride left predictor or a zero-run filter over the whole picture.

use crate::error::{Error, Result};
use crate::media::frame::Frame;
use crate::media::pixfmt::{self, PixelFormat};
use crate::media::{MediaType, Packet, Stream};
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::str::FromStr;

pub const RAWVIDEO_CODEC_ID: &str = "V_UNCOMPRESSED";
pub const LLZ_CODEC_ID: &str = "V_LLZ";

/// Short codec name for a Matroska codec id, used in logs and dispatch.
pub fn codec_name(codec_id: &str) -> &str {
    match codec_id {
        RAWVIDEO_CODEC_ID => "rawvideo",
        LLZ_CODEC_ID => "llz",
        other => other,
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const STORED  = 0b0001;
        const ENTROPY = 0b0010;
        const RLE     = 0b0100;
        const DELTA   = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    None,
    #[default]
    Delta,
    Rle,
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Filter::None),
            "delta" => Ok(Filter::Delta),
            "rle" => Ok(Filter::Rle),
            _ => Err(Error::InvalidInput(format!("invalid filter: {s}"))),
        }
    }
}

/// Options understood by the llz encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlzOptions {
    pub level: i32,
    pub filter: Filter,
}

impl Default for LlzOptions {
    fn default() -> Self {
        Self { level: 5, filter: Filter::default() }
    }
}

impl LlzOptions {
    pub fn from_map(options: &BTreeMap<String, String>) -> Result<Self> {
        let mut result = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "level" => {
                    result.level = value
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("invalid level: {value}")))?;
                }
                "filter" => result.filter = value.parse()?,
                _ => return Err(Error::InvalidInput(format!("unknown codec option: {key}"))),
            }
        }
        Ok(result)
    }
}

/// Distance between a sample and its predictor: one pixel for packed
/// formats (so each channel predicts from its own channel), one sample
/// for planar and gray data.
fn predictor_stride(format: PixelFormat) -> usize {
    let desc = format.descriptor();
    match desc.packed {
        Some(layout) => layout.comp_size * (3 + layout.alpha.is_some() as usize),
        None => (desc.depth as usize).div_ceil(8),
    }
}

/// In-place left predictor over the whole picture. Walks backwards so each
/// sample still sees its unmodified neighbor. The first `stride` samples are
/// kept as-is.
fn left_predict(data: &mut [u8], stride: usize) {
    for i in (stride..data.len()).rev() {
        data[i] = data[i].wrapping_sub(data[i - stride]);
    }
}

fn left_predict_inverse(data: &mut [u8], stride: usize) {
    for i in stride..data.len() {
        data[i] = data[i].wrapping_add(data[i - stride]);
    }
}

/// Collapses zero runs (up to 255 long) into `0x00, count` pairs; literal
/// bytes pass through untouched.
fn zero_run_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(zero) = rest.iter().position(|&b| b == 0) {
        encoded.extend_from_slice(&rest[..zero]);
        let run = rest[zero..].iter().take_while(|&&b| b == 0).take(255).count();
        encoded.push(0);
        encoded.push(run as u8);
        rest = &rest[zero + run..];
    }
    encoded.extend_from_slice(rest);
    encoded
}

fn zero_run_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    let mut i = 0usize;
    while i < data.len() {
        if data[i] == 0 {
            if i + 1 >= data.len() {
                return Err(Error::external("llz", "truncated zero run"));
            }
            let count = data[i + 1] as usize;
            decoded.extend(std::iter::repeat(0u8).take(count));
            i += 2;
        } else {
            decoded.push(data[i]);
            i += 1;
        }
    }
    Ok(decoded)
}

fn pixel_format_from_private(stream: &Stream) -> Result<PixelFormat> {
    let name = std::str::from_utf8(&stream.codec_private)
        .map_err(|_| Error::external("codec", "non-UTF-8 pixel format in codec private data"))?;
    PixelFormat::from_name(name)
        .ok_or_else(|| Error::external("codec", format!("invalid pixel format string: {name}")))
}

fn video_dimensions(stream: &Stream) -> Result<(u32, u32)> {
    match (stream.media_type, stream.video) {
        (MediaType::Video, Some(video)) => Ok((video.width, video.height)),
        _ => Err(Error::external("codec", "stream carries no video dimensions")),
    }
}

/// Decodes rawvideo packets into frames.
pub struct RawVideoDecoder {
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl RawVideoDecoder {
    pub fn new(stream: &Stream) -> Result<Self> {
        if stream.codec_id != RAWVIDEO_CODEC_ID {
            return Err(Error::external(
                "codec",
                format!("no rawvideo decoder for {}", stream.codec_id),
            ));
        }
        let (width, height) = video_dimensions(stream)?;
        Ok(Self { format: pixel_format_from_private(stream)?, width, height })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn decode_packet(&self, packet: &Packet) -> Result<Frame> {
        Frame::new(self.format, self.width, self.height, packet.data.clone())
    }
}

/// Encodes frames back into rawvideo payloads.
pub struct RawVideoEncoder {
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl RawVideoEncoder {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self { format, width, height }
    }

    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.format != self.format || frame.width != self.width || frame.height != self.height {
            return Err(Error::Bug(format!(
                "rawvideo encoder fed a {}x{} {} frame instead of {}x{} {}",
                frame.width,
                frame.height,
                frame.format.name(),
                self.width,
                self.height,
                self.format.name()
            )));
        }
        Ok(frame.data.clone())
    }
}

/// Formats the llz encoder accepts, in preference order. BGR orderings are
/// deliberately absent; BGR sources go through the rgb permutation.
pub const LLZ_ACCEPTED_FORMATS: &[PixelFormat] = &[
    PixelFormat::Gray8,
    PixelFormat::Gray16Le,
    PixelFormat::Rgb24,
    PixelFormat::Rgba,
    PixelFormat::Rgb48Le,
    PixelFormat::Yuv420p,
    PixelFormat::Yuv422p,
    PixelFormat::Yuv444p,
];

pub struct LlzEncoder {
    options: LlzOptions,
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl LlzEncoder {
    pub fn new(format: PixelFormat, width: u32, height: u32, options: LlzOptions) -> Self {
        Self { options, format, width, height }
    }

    pub fn accepted_formats() -> &'static [PixelFormat] {
        LLZ_ACCEPTED_FORMATS
    }

    /// Encodes one frame into one packet payload. Falls back to a stored
    /// payload when compression does not pay off, so a packet never grows
    /// beyond picture size + 1.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.format != self.format || frame.width != self.width || frame.height != self.height {
            return Err(Error::Bug(format!(
                "llz encoder fed a {}x{} {} frame instead of {}x{} {}",
                frame.width,
                frame.height,
                frame.format.name(),
                self.width,
                self.height,
                self.format.name()
            )));
        }

        let (filtered, mut flags) = match self.options.filter {
            Filter::None => (frame.data.clone(), PacketFlags::ENTROPY),
            Filter::Delta => {
                let mut filtered = frame.data.clone();
                left_predict(&mut filtered, predictor_stride(self.format));
                (filtered, PacketFlags::ENTROPY | PacketFlags::DELTA)
            }
            Filter::Rle => (zero_run_encode(&frame.data), PacketFlags::ENTROPY | PacketFlags::RLE),
        };

        let compressed = zstd::encode_all(&filtered[..], self.options.level)
            .map_err(|e| Error::external("zstd", e.to_string()))?;

        let mut payload;
        if compressed.len() >= frame.data.len() {
            flags = PacketFlags::STORED;
            payload = Vec::with_capacity(frame.data.len() + 1);
            payload.push(flags.bits());
            payload.extend_from_slice(&frame.data);
        } else {
            payload = Vec::with_capacity(compressed.len() + 1);
            payload.push(flags.bits());
            payload.extend_from_slice(&compressed);
        }
        Ok(payload)
    }
}

pub struct LlzDecoder {
    format: PixelFormat,
    width: u32,
    height: u32,
}

impl LlzDecoder {
    pub fn new(stream: &Stream) -> Result<Self> {
        if stream.codec_id != LLZ_CODEC_ID {
            return Err(Error::external(
                "codec",
                format!("no llz decoder for {}", stream.codec_id),
            ));
        }
        let (width, height) = video_dimensions(stream)?;
        Ok(Self { format: pixel_format_from_private(stream)?, width, height })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn decode_packet(&self, packet: &Packet) -> Result<Frame> {
        let (&flags_byte, payload) = packet
            .data
            .split_first()
            .ok_or_else(|| Error::external("llz", "empty packet"))?;
        let flags = PacketFlags::from_bits(flags_byte)
            .ok_or_else(|| Error::external("llz", format!("unknown packet flags {flags_byte:#04x}")))?;

        let data = if flags.contains(PacketFlags::STORED) {
            payload.to_vec()
        } else if flags.contains(PacketFlags::ENTROPY) {
            let mut data =
                zstd::decode_all(payload).map_err(|e| Error::external("zstd", e.to_string()))?;
            if flags.contains(PacketFlags::DELTA) {
                left_predict_inverse(&mut data, predictor_stride(self.format));
            }
            if flags.contains(PacketFlags::RLE) {
                data = zero_run_decode(&data)?;
            }
            data
        } else {
            return Err(Error::external("llz", format!("unknown packet flags {flags_byte:#04x}")));
        };

        let expected = pixfmt::picture_size(self.format, self.width, self.height);
        if data.len() != expected {
            return Err(Error::external(
                "llz",
                format!("packet decoded to {} bytes instead of {expected}", data.len()),
            ));
        }
        Frame::new(self.format, self.width, self.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::rational::Rational;
    use crate::media::VideoParams;

    fn llz_stream(format: PixelFormat, width: u32, height: u32) -> Stream {
        Stream {
            index: 0,
            time_base: Rational::new(1, 1000),
            media_type: MediaType::Video,
            codec_id: LLZ_CODEC_ID.into(),
            codec_private: format.name().as_bytes().to_vec(),
            default_duration_ns: None,
            video: Some(VideoParams { width, height }),
            audio: None,
        }
    }

    fn frame(format: PixelFormat, width: u32, height: u32, fill: impl FnMut(usize) -> u8) -> Frame {
        let size = pixfmt::picture_size(format, width, height);
        Frame::new(format, width, height, (0..size).map(fill).collect()).unwrap()
    }

    fn packet(data: Vec<u8>) -> Packet {
        Packet { stream_index: 0, pts: 0, dts: 0, duration: 0, pos: -1, keyframe: true, data }
    }

    #[test]
    fn left_predictor_roundtrips() {
        let original: Vec<u8> = (0..999).map(|i| (i % 7) as u8 * 40).collect();
        for stride in [1, 2, 3, 4, 6] {
            let mut data = original.clone();
            left_predict(&mut data, stride);
            assert_ne!(data, original);
            left_predict_inverse(&mut data, stride);
            assert_eq!(data, original);
        }

        let mut empty: Vec<u8> = Vec::new();
        left_predict(&mut empty, 3);
        assert!(empty.is_empty());
    }

    #[test]
    fn left_predictor_flattens_smooth_gradients() {
        // each channel ramps by 2 per pixel; after prediction every sample
        // past the first pixel is the constant step
        let mut data: Vec<u8> =
            (0..300).flat_map(|px| [(px * 2) as u8, (px * 2 + 1) as u8, (px * 2 + 7) as u8]).collect();
        left_predict(&mut data, 3);
        assert!(data[3..].iter().all(|&b| b == 2));
    }

    #[test]
    fn predictor_stride_follows_the_pixel_layout() {
        assert_eq!(predictor_stride(PixelFormat::Rgb24), 3);
        assert_eq!(predictor_stride(PixelFormat::Bgra), 4);
        assert_eq!(predictor_stride(PixelFormat::Rgb48Le), 6);
        assert_eq!(predictor_stride(PixelFormat::Gray8), 1);
        assert_eq!(predictor_stride(PixelFormat::Gray16Le), 2);
        assert_eq!(predictor_stride(PixelFormat::Yuv420p), 1);
    }

    #[test]
    fn zero_runs_roundtrip_including_long_runs() {
        let mut data = vec![7u8; 10];
        data.extend(std::iter::repeat(0u8).take(600));
        data.extend_from_slice(&[1, 2, 3]);

        let encoded = zero_run_encode(&data);
        assert!(encoded.len() < data.len());
        assert_eq!(zero_run_decode(&encoded).unwrap(), data);

        assert!(zero_run_encode(&[]).is_empty());
        assert_eq!(zero_run_encode(&[5, 6]), vec![5, 6]);
    }

    #[test]
    fn llz_roundtrip_all_filters() {
        let original = frame(PixelFormat::Rgb24, 32, 8, |i| (i / 3 % 251) as u8);
        let decoder = LlzDecoder::new(&llz_stream(PixelFormat::Rgb24, 32, 8)).unwrap();

        for filter in [Filter::None, Filter::Delta, Filter::Rle] {
            let encoder =
                LlzEncoder::new(PixelFormat::Rgb24, 32, 8, LlzOptions { level: 5, filter });
            let payload = encoder.encode_frame(&original).unwrap();
            let decoded = decoder.decode_packet(&packet(payload)).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn llz_compresses_flat_frames() {
        let original = frame(PixelFormat::Gray8, 64, 64, |_| 17);
        let encoder = LlzEncoder::new(PixelFormat::Gray8, 64, 64, LlzOptions::default());
        let payload = encoder.encode_frame(&original).unwrap();
        assert!(payload.len() < original.data.len() / 4);
    }

    #[test]
    fn llz_stored_fallback_bounds_packet_size() {
        // pseudo-random bytes do not compress; the stored path caps growth
        let mut state = 0x12345678u32;
        let original = frame(PixelFormat::Gray8, 32, 32, |_| {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            (state >> 24) as u8
        });
        let encoder = LlzEncoder::new(PixelFormat::Gray8, 32, 32, LlzOptions::default());
        let payload = encoder.encode_frame(&original).unwrap();
        assert!(payload.len() <= original.data.len() + 1);

        let decoder = LlzDecoder::new(&llz_stream(PixelFormat::Gray8, 32, 32)).unwrap();
        assert_eq!(decoder.decode_packet(&packet(payload)).unwrap(), original);
    }

    #[test]
    fn llz_rejects_wrong_size_and_bad_flags() {
        let decoder = LlzDecoder::new(&llz_stream(PixelFormat::Gray8, 4, 4)).unwrap();

        // stored payload with a missing byte
        let mut bad = vec![PacketFlags::STORED.bits()];
        bad.extend_from_slice(&[0u8; 15]);
        assert!(decoder.decode_packet(&packet(bad)).is_err());

        assert!(decoder.decode_packet(&packet(vec![0x40, 1, 2])).is_err());
        assert!(decoder.decode_packet(&packet(Vec::new())).is_err());
    }

    #[test]
    fn rawvideo_roundtrip() {
        let mut stream = llz_stream(PixelFormat::Bgr24, 8, 4);
        stream.codec_id = RAWVIDEO_CODEC_ID.into();
        stream.codec_private = b"bgr24".to_vec();

        let decoder = RawVideoDecoder::new(&stream).unwrap();
        let original = frame(PixelFormat::Bgr24, 8, 4, |i| (i % 256) as u8);
        let decoded = decoder.decode_packet(&packet(original.data.clone())).unwrap();
        assert_eq!(decoded, original);

        let encoder = RawVideoEncoder::new(PixelFormat::Bgr24, 8, 4);
        assert_eq!(encoder.encode_frame(&decoded).unwrap(), original.data);
    }

    #[test]
    fn options_parsing() {
        let mut map = BTreeMap::new();
        map.insert("level".to_string(), "19".to_string());
        map.insert("filter".to_string(), "rle".to_string());
        let options = LlzOptions::from_map(&map).unwrap();
        assert_eq!(options, LlzOptions { level: 19, filter: Filter::Rle });

        let mut bad = BTreeMap::new();
        bad.insert("slices".to_string(), "4".to_string());
        assert!(LlzOptions::from_map(&bad).is_err());
    }

    #[test]
    fn codec_names() {
        assert_eq!(codec_name("V_UNCOMPRESSED"), "rawvideo");
        assert_eq!(codec_name("V_LLZ"), "llz");
        assert_eq!(codec_name("A_AAC"), "A_AAC");
    }
}
