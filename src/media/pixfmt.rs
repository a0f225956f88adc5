//! Pixel formats, loss classification and the lossless-selection rule.

use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// What a conversion between two pixel formats discards.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Loss: u32 {
        /// Chroma planes become coarser than in the source.
        const RESOLUTION = 0b000001;
        /// Components carry fewer bits than in the source.
        const DEPTH      = 0b000010;
        /// Color model changes (RGB vs. YUV).
        const COLORSPACE = 0b000100;
        /// Source alpha has no place in the destination.
        const ALPHA      = 0b001000;
        /// Destination quantizes colors (paletted targets).
        const COLORQUANT = 0b010000;
        /// Chroma is discarded entirely (grayscale targets).
        const CHROMA     = 0b100000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    Rgb,
    Yuv,
    Gray,
}

/// Component layout of a packed RGB(A) format: per-component byte width and
/// the component index of each channel within a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLayout {
    pub comp_size: usize,
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    pub alpha: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub model: ColorModel,
    /// Bits per component.
    pub depth: u32,
    pub has_alpha: bool,
    /// log2 horizontal/vertical chroma subsampling (planar YUV only).
    pub chroma_shift_w: u32,
    pub chroma_shift_h: u32,
    /// Present for packed RGB family formats.
    pub packed: Option<PackedLayout>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Gray16Le,
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Rgb48Le,
    Yuv420p,
    Yuv422p,
    Yuv444p,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Gray8 => "gray",
            PixelFormat::Gray16Le => "gray16le",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgb48Le => "rgb48le",
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuv444p => "yuv444p",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gray" => Some(PixelFormat::Gray8),
            "gray16le" => Some(PixelFormat::Gray16Le),
            "rgb24" => Some(PixelFormat::Rgb24),
            "bgr24" => Some(PixelFormat::Bgr24),
            "rgba" => Some(PixelFormat::Rgba),
            "bgra" => Some(PixelFormat::Bgra),
            "rgb48le" => Some(PixelFormat::Rgb48Le),
            "yuv420p" => Some(PixelFormat::Yuv420p),
            "yuv422p" => Some(PixelFormat::Yuv422p),
            "yuv444p" => Some(PixelFormat::Yuv444p),
            _ => None,
        }
    }

    pub fn descriptor(self) -> Descriptor {
        const fn packed_rgb(
            comp_size: usize,
            red: usize,
            green: usize,
            blue: usize,
            alpha: Option<usize>,
        ) -> Option<PackedLayout> {
            Some(PackedLayout { comp_size, red, green, blue, alpha })
        }

        match self {
            PixelFormat::Gray8 => Descriptor {
                model: ColorModel::Gray,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: None,
            },
            PixelFormat::Gray16Le => Descriptor {
                model: ColorModel::Gray,
                depth: 16,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: None,
            },
            PixelFormat::Rgb24 => Descriptor {
                model: ColorModel::Rgb,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: packed_rgb(1, 0, 1, 2, None),
            },
            PixelFormat::Bgr24 => Descriptor {
                model: ColorModel::Rgb,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: packed_rgb(1, 2, 1, 0, None),
            },
            PixelFormat::Rgba => Descriptor {
                model: ColorModel::Rgb,
                depth: 8,
                has_alpha: true,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: packed_rgb(1, 0, 1, 2, Some(3)),
            },
            PixelFormat::Bgra => Descriptor {
                model: ColorModel::Rgb,
                depth: 8,
                has_alpha: true,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: packed_rgb(1, 2, 1, 0, Some(3)),
            },
            PixelFormat::Rgb48Le => Descriptor {
                model: ColorModel::Rgb,
                depth: 16,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: packed_rgb(2, 0, 1, 2, None),
            },
            PixelFormat::Yuv420p => Descriptor {
                model: ColorModel::Yuv,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 1,
                chroma_shift_h: 1,
                packed: None,
            },
            PixelFormat::Yuv422p => Descriptor {
                model: ColorModel::Yuv,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 1,
                chroma_shift_h: 0,
                packed: None,
            },
            PixelFormat::Yuv444p => Descriptor {
                model: ColorModel::Yuv,
                depth: 8,
                has_alpha: false,
                chroma_shift_w: 0,
                chroma_shift_h: 0,
                packed: None,
            },
        }
    }

}

/// Dimensions of a chroma plane under this format's subsampling.
pub fn chroma_dimensions(format: PixelFormat, width: u32, height: u32) -> (u32, u32) {
    let desc = format.descriptor();
    let cw = (width + (1 << desc.chroma_shift_w) - 1) >> desc.chroma_shift_w;
    let ch = (height + (1 << desc.chroma_shift_h) - 1) >> desc.chroma_shift_h;
    (cw, ch)
}

/// Size in bytes of one tightly packed picture.
pub fn picture_size(format: PixelFormat, width: u32, height: u32) -> usize {
    let desc = format.descriptor();
    let comp_bytes = (desc.depth as usize).div_ceil(8);

    match desc.packed {
        Some(layout) => {
            let pixel = layout.comp_size * (3 + layout.alpha.is_some() as usize);
            width as usize * height as usize * pixel
        }
        None => match desc.model {
            ColorModel::Gray => width as usize * height as usize * comp_bytes,
            ColorModel::Yuv => {
                let (cw, ch) = chroma_dimensions(format, width, height);
                let luma = width as usize * height as usize;
                let chroma = cw as usize * ch as usize;
                (luma + 2 * chroma) * comp_bytes
            }
            ColorModel::Rgb => unreachable!("packed layout covers RGB formats"),
        },
    }
}

/// Classifies what converting `src` into `dst` would discard.
///
/// `has_alpha` states whether the caller cares about the alpha channel; alpha
/// loss is only reported when it is set and the source actually carries one.
pub fn loss(dst: PixelFormat, src: PixelFormat, has_alpha: bool) -> Loss {
    let dd = dst.descriptor();
    let sd = src.descriptor();
    let mut loss = Loss::empty();

    if dd.chroma_shift_w > sd.chroma_shift_w || dd.chroma_shift_h > sd.chroma_shift_h {
        loss |= Loss::RESOLUTION;
    }
    if dd.depth < sd.depth {
        loss |= Loss::DEPTH;
    }
    if dd.model == ColorModel::Gray && sd.model != ColorModel::Gray {
        loss |= Loss::CHROMA;
    } else if dd.model != sd.model {
        loss |= Loss::COLORSPACE;
    }
    if has_alpha && sd.has_alpha && !dd.has_alpha {
        loss |= Loss::ALPHA;
    }

    loss
}

/// Picks the first candidate that is bit-exact lossless in both directions
/// with respect to `src`.
pub fn select_lossless_format(src: PixelFormat, candidates: &[PixelFormat]) -> Result<PixelFormat> {
    log::debug!("   -> Input pixel format: {}", src.name());

    for &candidate in candidates {
        let losses = loss(candidate, src, false);
        let losses_inv = loss(src, candidate, true);
        log::debug!(
            "   -> Candidate output pixel format: {} {:?} {:?}_INV",
            candidate.name(),
            losses,
            losses_inv
        );

        if losses.is_empty() && losses_inv.is_empty() {
            return Ok(candidate);
        }
    }

    Err(Error::external(
        "select_lossless_format",
        format!("no compatible lossless format for {}", src.name()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for fmt in [
            PixelFormat::Gray8,
            PixelFormat::Gray16Le,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Rgba,
            PixelFormat::Bgra,
            PixelFormat::Rgb48Le,
            PixelFormat::Yuv420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
        ] {
            assert_eq!(PixelFormat::from_name(fmt.name()), Some(fmt));
        }
        assert_eq!(PixelFormat::from_name("nv12"), None);
    }

    #[test]
    fn picture_sizes() {
        assert_eq!(picture_size(PixelFormat::Bgr24, 320, 240), 230400);
        assert_eq!(picture_size(PixelFormat::Rgba, 320, 240), 307200);
        assert_eq!(picture_size(PixelFormat::Gray8, 320, 240), 76800);
        assert_eq!(picture_size(PixelFormat::Gray16Le, 320, 240), 153600);
        assert_eq!(picture_size(PixelFormat::Yuv420p, 320, 240), 115200);
        assert_eq!(picture_size(PixelFormat::Yuv444p, 320, 240), 230400);
        // odd dimensions round chroma planes up
        assert_eq!(picture_size(PixelFormat::Yuv420p, 3, 3), 9 + 2 * 4);
    }

    #[test]
    fn permutations_are_lossless_both_ways() {
        assert!(loss(PixelFormat::Rgb24, PixelFormat::Bgr24, false).is_empty());
        assert!(loss(PixelFormat::Bgr24, PixelFormat::Rgb24, true).is_empty());
        assert!(loss(PixelFormat::Rgba, PixelFormat::Bgra, true).is_empty());
    }

    #[test]
    fn alpha_dropping_is_detected() {
        assert!(loss(PixelFormat::Rgb24, PixelFormat::Rgba, true).contains(Loss::ALPHA));
        // without the caller caring, alpha does not count
        assert!(loss(PixelFormat::Rgb24, PixelFormat::Rgba, false).is_empty());
    }

    #[test]
    fn depth_and_colorspace_losses() {
        assert!(loss(PixelFormat::Rgb24, PixelFormat::Rgb48Le, false).contains(Loss::DEPTH));
        assert!(loss(PixelFormat::Yuv444p, PixelFormat::Rgb24, false).contains(Loss::COLORSPACE));
        assert!(loss(PixelFormat::Gray8, PixelFormat::Rgb24, false).contains(Loss::CHROMA));
        assert!(loss(PixelFormat::Yuv420p, PixelFormat::Yuv444p, false).contains(Loss::RESOLUTION));
    }

    #[test]
    fn selection_takes_first_bidirectional_match() {
        // bgr24 is not in the list; rgb24 is the first candidate that is
        // lossless in both directions.
        let candidates = [
            PixelFormat::Gray8,
            PixelFormat::Yuv444p,
            PixelFormat::Rgb24,
            PixelFormat::Rgb48Le,
        ];
        let chosen = select_lossless_format(PixelFormat::Bgr24, &candidates).unwrap();
        assert_eq!(chosen, PixelFormat::Rgb24);
    }

    #[test]
    fn selection_rejects_upconversion() {
        // rgb48le forward is lossless but the inverse drops depth
        let chosen = select_lossless_format(PixelFormat::Rgb24, &[PixelFormat::Rgb48Le]);
        assert!(chosen.is_err());
    }

    #[test]
    fn selection_fails_when_nothing_fits() {
        assert!(select_lossless_format(PixelFormat::Yuv420p, &[PixelFormat::Rgb24]).is_err());
    }
}
