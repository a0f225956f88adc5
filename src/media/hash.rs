//! Streaming hash registry, addressed by algorithm name.
//!
//! The LLR sidecar records the algorithm name next to the digest, so both
//! sides of a round trip resolve hashers through this registry.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256, Sha512};

/// Names accepted by [`Hasher::new`], in help-text order.
pub const ALGORITHMS: &[&str] = &["CRC32", "SHA-256", "SHA-512"];

/// Default algorithm used by compression when none is selected.
pub const DEFAULT_ALGORITHM: &str = "SHA-256";

/// Enumerates the algorithm names the registry resolves.
pub fn algorithms() -> &'static [&'static str] {
    ALGORITHMS
}

/// A streaming hash context.
pub enum Hasher {
    Crc32(crc32fast::Hasher),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    /// Allocates a hasher by name. Unknown names are rejected; callers on the
    /// decompression path map this to a corrupt-sidecar report.
    pub fn new(name: &str) -> Result<Self> {
        match name {
            "CRC32" => Ok(Hasher::Crc32(crc32fast::Hasher::new())),
            "SHA-256" => Ok(Hasher::Sha256(Sha256::new())),
            "SHA-512" => Ok(Hasher::Sha512(Sha512::new())),
            _ => Err(Error::InvalidInput(format!("unknown hash algorithm: {name}"))),
        }
    }

    /// Digest size in bytes for this algorithm.
    pub fn size(&self) -> usize {
        match self {
            Hasher::Crc32(_) => 4,
            Hasher::Sha256(_) => 32,
            Hasher::Sha512(_) => 64,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Crc32(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Hex rendering for log output.
pub fn to_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
