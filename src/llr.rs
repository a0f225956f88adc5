//! LLR sidecar codec.
//!
//! The sidecar interleaves three things: the packet-reference table, the hash
//! of the original container and every original byte that is *not* covered by
//! a reference range. Together with the remuxed container it is sufficient to
//! reproduce the original bit for bit.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! u32    magic "LLR\0"
//! u64    original file size
//! asciiz hash algorithm name
//! u16    hash size
//! bytes  hash (reserved on write, patched after streaming)
//! ...    stream descriptors + reference table (see reftable)
//! bytes  embedded original slices, ascending position
//! ```

use crate::error::{Error, Result};
use crate::media::hash::{self, Hasher};
use crate::media::io::{read_cstr, seek_to, write_cstr, MAX_WRITE_UNIT};
use crate::reftable::PacketReferences;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, Write};

pub const LLR_MAGIC: u32 = 0x4C4C_5200; // "LLR\0"

/// Header fields of a sidecar, short of the reference table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlrInfo {
    pub original_size: u64,
    pub hash_name: String,
    pub hash: Vec<u8>,
}

fn check_offset<S: Seek>(stream: &mut S, expected: u64, op: &str) -> Result<()> {
    let actual = stream.stream_position()?;
    if actual != expected {
        return Err(Error::Bug(format!("{op}: unexpected file offset {actual} (expected {expected})")));
    }
    Ok(())
}

/// Writes a complete sidecar.
///
/// `source` is the original container; it is re-read front to back in one
/// pass that hashes every byte and embeds the bytes outside reference ranges.
/// Returns the final digest.
pub fn write_llr<R, W>(
    source: &mut R,
    source_size: u64,
    refs: &PacketReferences,
    sidecar: &mut W,
    hash_name: &str,
) -> Result<Vec<u8>>
where
    R: Read + Seek,
    W: Write + Seek,
{
    log::debug!("Writing LLR file:");
    sidecar.write_u32::<BigEndian>(LLR_MAGIC)?;
    sidecar.write_u64::<BigEndian>(source_size)?;

    let mut hasher = Hasher::new(hash_name)?;
    let hash_size = hasher.size();

    write_cstr(sidecar, hash_name)?;
    sidecar.write_u16::<BigEndian>(hash_size as u16)?;
    let hash_pos = sidecar.stream_position()?;
    sidecar.write_all(&vec![0u8; hash_size])?;

    refs.serialize(sidecar)?;

    seek_to(source, 0)?;
    let mut buffer = [0u8; MAX_WRITE_UNIT];
    let mut cursor = 0u64;

    let mut walk = |source: &mut R,
                    sidecar: &mut W,
                    hasher: &mut Hasher,
                    start: u64,
                    end: u64,
                    embed: bool|
     -> Result<()> {
        check_offset(source, start, if embed { "embed_chunk" } else { "hash_chunk" })?;
        if embed {
            log::debug!("  {start}-{end}: Embedding - size {}", end - start);
        }

        let mut position = start;
        while position != end {
            let want = ((end - position) as usize).min(MAX_WRITE_UNIT);
            let got = source.read(&mut buffer[..want])?;
            if got == 0 {
                return Err(Error::external("read", "premature end of file"));
            }
            if embed {
                sidecar.write_all(&buffer[..got])?;
            }
            hasher.update(&buffer[..got]);
            position += got as u64;
        }
        Ok(())
    };

    for (orig_pos, e) in refs.table() {
        if orig_pos != cursor {
            walk(source, sidecar, &mut hasher, cursor, orig_pos, true)?;
            cursor = orig_pos;
        }

        let range_end = cursor + e.orig_size as u64;
        log::debug!(
            "  {orig_pos}-{range_end}: Referencing stream #0:{} (index {}) - pts {} size {}",
            e.stream_index,
            e.packet_index,
            e.pts,
            e.orig_size
        );
        walk(source, sidecar, &mut hasher, cursor, range_end, false)?;
        cursor = range_end;
    }

    if cursor != source_size {
        walk(source, sidecar, &mut hasher, cursor, source_size, true)?;
    }

    let digest = hasher.finalize();
    log::debug!("Storing input file hash ({hash_name}): {}", hash::to_hex(&digest));

    let end = sidecar.stream_position()?;
    seek_to(sidecar, hash_pos)?;
    sidecar.write_all(&digest)?;
    seek_to(sidecar, end)?;
    Ok(digest)
}

/// Reads and validates the sidecar header.
pub fn read_llr_info<R: Read>(sidecar: &mut R) -> Result<LlrInfo> {
    if sidecar.read_u32::<BigEndian>()? != LLR_MAGIC {
        return Err(Error::InvalidInput("invalid LLR file signature".into()));
    }

    log::debug!("Reading LLR file:");
    let original_size = sidecar.read_u64::<BigEndian>()?;
    log::debug!("  Original file size: {original_size}");

    let hash_name = read_cstr(sidecar)?;
    let hash_size = sidecar.read_u16::<BigEndian>()? as usize;

    let mut digest = vec![0u8; hash_size];
    sidecar
        .read_exact(&mut digest)
        .map_err(|_| Error::CorruptSidecar("truncated hash section".into()))?;
    log::debug!("  Hash: {hash_name} (size {hash_size}) {}", hash::to_hex(&digest));

    Ok(LlrInfo { original_size, hash_name, hash: digest })
}

/// Reads the sidecar, writing every embedded slice into `output` at its
/// original position. Reference ranges are left as holes for the
/// reconstruction engine to fill.
pub fn read_llr<R, W>(sidecar: &mut R, output: &mut W) -> Result<(PacketReferences, LlrInfo)>
where
    R: Read,
    W: Write + Seek,
{
    let info = read_llr_info(sidecar)?;
    let refs = PacketReferences::deserialize(sidecar)?;

    let mut buffer = [0u8; MAX_WRITE_UNIT];
    let mut load_chunk = |sidecar: &mut R, output: &mut W, start: u64, end: u64| -> Result<()> {
        log::debug!("  {start}-{end}: Loading - size {}", end - start);
        seek_to(output, start)?;

        let mut position = start;
        while position != end {
            let want = ((end - position) as usize).min(MAX_WRITE_UNIT);
            let got = sidecar.read(&mut buffer[..want])?;
            if got == 0 {
                return Err(Error::CorruptSidecar("truncated embedded data".into()));
            }
            output.write_all(&buffer[..got])?;
            position += got as u64;
        }
        Ok(())
    };

    let mut cursor = 0u64;
    for (orig_pos, e) in refs.table() {
        if orig_pos + e.orig_size as u64 > info.original_size {
            return Err(Error::CorruptSidecar(format!(
                "reference range {orig_pos}+{} exceeds original size {}",
                e.orig_size, info.original_size
            )));
        }
        if orig_pos != cursor {
            load_chunk(sidecar, output, cursor, orig_pos)?;
            cursor = orig_pos;
        }
        cursor += e.orig_size as u64;
    }

    if cursor != info.original_size {
        load_chunk(sidecar, output, cursor, info.original_size)?;
    }

    Ok((refs, info))
}
