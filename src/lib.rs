//! # llrpack
//!
//! Losslessly shrinks multimedia containers that carry uncompressed (raw)
//! video streams. Compression demuxes the source, re-encodes every raw video
//! packet with a lossless codec into a remuxed Matroska container and writes
//! an LLR sidecar holding a packet-reference table, the source hash and every
//! original byte the re-encoded packets do not cover. Decompression composes
//! the two artifacts back into a byte-exact copy of the original and verifies
//! the stored hash.
//!
//! ## Quick start
//!
//! ```no_run
//! use llrpack::{pipeline, EncodeConfig};
//! use std::path::Path;
//!
//! # fn main() -> llrpack::Result<()> {
//! let config = EncodeConfig::default();
//! let stats = pipeline::compress(
//!     Path::new("capture.mkv"),
//!     Path::new("capture.small.mkv"),
//!     Path::new("capture.small.llr"),
//!     &config,
//! )?;
//! println!("Compression ratio: {:.2}x", stats.ratio);
//!
//! pipeline::decompress(
//!     Path::new("capture.small.mkv"),
//!     Path::new("restored.mkv"),
//!     Path::new("capture.small.llr"),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod decoders;
pub mod encoders;
pub mod error;
pub mod llr;
pub mod media;
pub mod pipeline;
pub mod reftable;

pub use config::EncodeConfig;
pub use error::{Error, Result};
pub use llr::{read_llr, read_llr_info, write_llr, LlrInfo};
pub use pipeline::{compress, decompress, CompressionStats, DecompressionStats};
pub use reftable::{PacketReferences, ReferenceInfo, StreamInfo};
