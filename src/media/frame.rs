//! Video frames and lossless pixel-format conversion.

use crate::error::{Error, Result};
use crate::media::pixfmt::{self, PixelFormat};

/// One decoded picture, tightly packed (planar formats store their planes
/// back to back).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = pixfmt::picture_size(format, width, height);
        if data.len() != expected {
            return Err(Error::external(
                "frame",
                format!(
                    "{}x{} {} picture needs {} bytes, got {}",
                    width,
                    height,
                    format.name(),
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(Self { format, width, height, data })
    }
}

/// Converts a frame to `dst_format`.
///
/// Only conversions that are bit-exact in both directions are implemented:
/// identity and packed-RGB component permutations. The encode pipeline never
/// selects a target format outside this set.
pub fn convert(frame: &Frame, dst_format: PixelFormat) -> Result<Frame> {
    if frame.format == dst_format {
        return Ok(frame.clone());
    }

    let src_desc = frame.format.descriptor();
    let dst_desc = dst_format.descriptor();

    let (src_layout, dst_layout) = match (src_desc.packed, dst_desc.packed) {
        (Some(s), Some(d)) if s.comp_size == d.comp_size && s.alpha.is_some() == d.alpha.is_some() => (s, d),
        _ => {
            return Err(Error::Unsupported(format!(
                "pixel format conversion {} -> {}",
                frame.format.name(),
                dst_format.name()
            )))
        }
    };

    let comp_size = src_layout.comp_size;
    let mut pairs = vec![
        (src_layout.red, dst_layout.red),
        (src_layout.green, dst_layout.green),
        (src_layout.blue, dst_layout.blue),
    ];
    if let (Some(sa), Some(da)) = (src_layout.alpha, dst_layout.alpha) {
        pairs.push((sa, da));
    }

    let pixel_bytes = comp_size * pairs.len();
    let mut data = vec![0u8; frame.data.len()];
    for (src_px, dst_px) in frame.data.chunks_exact(pixel_bytes).zip(data.chunks_exact_mut(pixel_bytes)) {
        for &(s, d) in &pairs {
            dst_px[d * comp_size..(d + 1) * comp_size]
                .copy_from_slice(&src_px[s * comp_size..(s + 1) * comp_size]);
        }
    }

    Frame::new(dst_format, frame.width, frame.height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(format: PixelFormat, width: u32, height: u32) -> Frame {
        let size = pixfmt::picture_size(format, width, height);
        let data = (0..size).map(|i| (i * 31 % 251) as u8).collect();
        Frame::new(format, width, height, data).unwrap()
    }

    #[test]
    fn new_checks_picture_size() {
        assert!(Frame::new(PixelFormat::Rgb24, 2, 2, vec![0; 12]).is_ok());
        assert!(Frame::new(PixelFormat::Rgb24, 2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn identity_conversion_is_a_copy() {
        let frame = gradient(PixelFormat::Yuv420p, 8, 8);
        let converted = convert(&frame, PixelFormat::Yuv420p).unwrap();
        assert_eq!(frame, converted);
    }

    #[test]
    fn rgb_bgr_swap_roundtrips() {
        let frame = gradient(PixelFormat::Bgr24, 16, 4);
        let swapped = convert(&frame, PixelFormat::Rgb24).unwrap();
        assert_ne!(frame.data, swapped.data);

        // channel check on the first pixel: B G R -> R G B
        assert_eq!(swapped.data[0], frame.data[2]);
        assert_eq!(swapped.data[1], frame.data[1]);
        assert_eq!(swapped.data[2], frame.data[0]);

        let back = convert(&swapped, PixelFormat::Bgr24).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn rgba_bgra_swap_keeps_alpha() {
        let frame = gradient(PixelFormat::Bgra, 4, 4);
        let swapped = convert(&frame, PixelFormat::Rgba).unwrap();
        assert_eq!(swapped.data[3], frame.data[3]);
        assert_eq!(convert(&swapped, PixelFormat::Bgra).unwrap(), frame);
    }

    #[test]
    fn wide_components_swap_as_units() {
        let frame = gradient(PixelFormat::Rgb48Le, 4, 2);
        // rgb48le -> rgb48le is the only same-width packed pair we carry, so
        // exercise the unit logic through identity
        let same = convert(&frame, PixelFormat::Rgb48Le).unwrap();
        assert_eq!(frame, same);
    }

    #[test]
    fn cross_model_conversion_is_refused() {
        let frame = gradient(PixelFormat::Rgb24, 4, 4);
        assert!(matches!(
            convert(&frame, PixelFormat::Yuv444p),
            Err(Error::Unsupported(_))
        ));
    }
}
