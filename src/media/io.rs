//! Byte I/O helpers shared by the container and sidecar codecs.

use crate::error::{Error, Result};
use std::io::{Read, Seek, SeekFrom, Write};

/// Largest unit moved through a writer in one call. Copy loops and the LLR
/// embed/load walks all work in buffers of this size.
pub const MAX_WRITE_UNIT: usize = 4096;

/// Longest NUL-terminated string accepted when reading (hash algorithm and
/// pixel format names).
pub const MAX_STR_LEN: usize = 128;

/// Writes `buf` in chunks of at most [`MAX_WRITE_UNIT`] bytes.
pub fn write_in_chunks<W: Write>(writer: &mut W, buf: &[u8]) -> Result<()> {
    for chunk in buf.chunks(MAX_WRITE_UNIT) {
        writer.write_all(chunk)?;
    }
    Ok(())
}

/// Seeks to an absolute offset, failing loudly on a short seek.
pub fn seek_to<S: Seek>(stream: &mut S, offset: u64) -> Result<()> {
    let reached = stream.seek(SeekFrom::Start(offset))?;
    if reached != offset {
        return Err(Error::external("seek", format!("seeked to {reached} instead of {offset}")));
    }
    Ok(())
}

/// Reads a NUL-terminated string of at most [`MAX_STR_LEN`] - 1 bytes.
pub fn read_cstr<R: Read>(reader: &mut R) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() + 1 >= MAX_STR_LEN {
            return Err(Error::CorruptSidecar("unterminated string".into()));
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes).map_err(|_| Error::CorruptSidecar("non-UTF-8 string".into()))
}

/// Writes a NUL-terminated string.
pub fn write_cstr<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn cstr_roundtrip() {
        let mut buf = Vec::new();
        write_cstr(&mut buf, "SHA-256").unwrap();
        assert_eq!(buf, b"SHA-256\0");

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_cstr(&mut cursor).unwrap(), "SHA-256");
    }

    #[test]
    fn cstr_rejects_unterminated() {
        let long = vec![b'x'; MAX_STR_LEN + 4];
        let mut cursor = Cursor::new(long);
        assert!(matches!(read_cstr(&mut cursor), Err(crate::error::Error::CorruptSidecar(_))));
    }

    #[test]
    fn chunked_write_copies_everything() {
        let data: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        write_in_chunks(&mut out, &data).unwrap();
        assert_eq!(out, data);
    }
}
