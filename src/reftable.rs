//! Stream descriptors and the packet-reference table.
//!
//! The table maps byte ranges of the original container onto the re-encoded
//! packets that replace them. Ranges must never overlap: compression derives
//! them from distinct demuxed packets, so an overlap means the tool itself
//! went wrong, not the input.

use crate::error::{Error, Result};
use crate::media::io::{read_cstr, write_cstr};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};

const STREAM_TAG_COPY: u8 = 1;
const STREAM_TAG_VIDEO: u8 = 2;

/// Per-stream processing declared in the sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInfo {
    /// Packets were copied verbatim.
    Copy,
    /// Packets were re-encoded; the name is the original pixel format.
    Video { pixel_format: String },
}

/// Where one original byte range went: the packet that replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceInfo {
    /// Length of the covered range in the original file.
    pub orig_size: u32,
    /// Stream the replacement packet belongs to, in both containers.
    pub stream_index: u32,
    /// Ordinal of the packet within its stream in the remuxed container.
    pub packet_index: u64,
    /// Presentation timestamp of the replacement packet.
    pub pts: i64,
}

/// Reverse lookup key used during reconstruction.
pub type ReverseKey = (u32, u64, i64);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PacketReferences {
    streams: Vec<StreamInfo>,
    table: BTreeMap<u64, ReferenceInfo>,
}

impl PacketReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_video_stream(&mut self, pixel_format: &str) {
        self.streams.push(StreamInfo::Video { pixel_format: pixel_format.to_string() });
    }

    pub fn add_copy_stream(&mut self) {
        self.streams.push(StreamInfo::Copy);
    }

    /// Records that `[orig_pos, orig_pos + orig_size)` of the original file is
    /// replaced by the given packet. Duplicate positions and any overlap with
    /// a neighboring entry are rejected as internal bugs.
    pub fn add_packet_reference(
        &mut self,
        stream_index: u32,
        packet_index: u64,
        pts: i64,
        orig_pos: u64,
        orig_size: u32,
    ) -> Result<()> {
        let bug = || {
            Err(Error::Bug(format!(
                "add_packet_reference: overlapping range at {orig_pos}+{orig_size}"
            )))
        };

        if orig_size == 0 {
            return bug();
        }
        if (stream_index as usize) >= self.streams.len() {
            return Err(Error::Bug(format!(
                "add_packet_reference: stream {stream_index} has no descriptor"
            )));
        }
        if let Some((&prev_pos, prev)) = self.table.range(..=orig_pos).next_back() {
            if prev_pos == orig_pos || prev_pos + prev.orig_size as u64 > orig_pos {
                return bug();
            }
        }
        if let Some((&next_pos, _)) = self.table.range(orig_pos..).next() {
            if next_pos < orig_pos + orig_size as u64 {
                return bug();
            }
        }

        self.table.insert(
            orig_pos,
            ReferenceInfo { orig_size, stream_index, packet_index, pts },
        );
        Ok(())
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// Entries in ascending original position.
    pub fn table(&self) -> impl Iterator<Item = (u64, &ReferenceInfo)> {
        self.table.iter().map(|(&pos, info)| (pos, info))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Builds the `(stream, ordinal, pts) -> (position, size)` map used by
    /// reconstruction. The key is unique by construction: every entry came
    /// from a distinct packet of the remuxed container.
    pub fn reverse_index(&self) -> HashMap<ReverseKey, (u64, u32)> {
        self.table
            .iter()
            .map(|(&pos, e)| ((e.stream_index, e.packet_index, e.pts), (pos, e.orig_size)))
            .collect()
    }

    pub fn debug_dump(&self) {
        log::debug!("Streams (total {}):", self.streams.len());
        for (i, info) in self.streams.iter().enumerate() {
            match info {
                StreamInfo::Video { pixel_format } => {
                    log::debug!("  Stream #0:{i}: video {pixel_format}")
                }
                StreamInfo::Copy => log::debug!("  Stream #0:{i}: copy"),
            }
        }

        log::debug!("Packet references (total {}):", self.table.len());
        for (&orig_pos, e) in &self.table {
            log::debug!(
                "  {}-{}: Stream #0:{} (index {}) - pts {} size {}",
                orig_pos,
                orig_pos + e.orig_size as u64,
                e.stream_index,
                e.packet_index,
                e.pts,
                e.orig_size
            );
        }
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<BigEndian>(self.streams.len() as u32)?;
        for info in &self.streams {
            match info {
                StreamInfo::Copy => writer.write_u8(STREAM_TAG_COPY)?,
                StreamInfo::Video { pixel_format } => {
                    writer.write_u8(STREAM_TAG_VIDEO)?;
                    write_cstr(writer, pixel_format)?;
                }
            }
        }

        writer.write_u64::<BigEndian>(self.table.len() as u64)?;
        for (&orig_pos, e) in &self.table {
            writer.write_u64::<BigEndian>(orig_pos)?;
            writer.write_u32::<BigEndian>(e.orig_size)?;
            writer.write_u32::<BigEndian>(e.stream_index)?;
            writer.write_u64::<BigEndian>(e.packet_index)?;
            writer.write_i64::<BigEndian>(e.pts)?;
        }
        Ok(())
    }

    /// Inverse of [`serialize`]. Structural problems in the data are reported
    /// as a corrupt sidecar, never as a bug.
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut result = Self::new();

        let stream_count = reader.read_u32::<BigEndian>()?;
        for _ in 0..stream_count {
            match reader.read_u8()? {
                STREAM_TAG_COPY => result.streams.push(StreamInfo::Copy),
                STREAM_TAG_VIDEO => {
                    let pixel_format = read_cstr(reader)?;
                    result.streams.push(StreamInfo::Video { pixel_format });
                }
                tag => {
                    return Err(Error::CorruptSidecar(format!("unknown stream type tag {tag}")))
                }
            }
        }

        let entry_count = reader.read_u64::<BigEndian>()?;
        for _ in 0..entry_count {
            let orig_pos = reader.read_u64::<BigEndian>()?;
            let orig_size = reader.read_u32::<BigEndian>()?;
            let stream_index = reader.read_u32::<BigEndian>()?;
            let packet_index = reader.read_u64::<BigEndian>()?;
            let pts = reader.read_i64::<BigEndian>()?;

            result
                .add_packet_reference(stream_index, packet_index, pts, orig_pos, orig_size)
                .map_err(|_| {
                    Error::CorruptSidecar(format!("bad reference entry at position {orig_pos}"))
                })?;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> PacketReferences {
        let mut refs = PacketReferences::new();
        refs.add_video_stream("bgr24");
        refs.add_copy_stream();
        refs.add_packet_reference(0, 0, 0, 1024, 256).unwrap();
        refs.add_packet_reference(1, 0, 0, 2048, 128).unwrap();
        refs.add_packet_reference(0, 1, 40, 4096, 256).unwrap();
        refs
    }

    #[test]
    fn table_iterates_in_position_order() {
        let refs = sample();
        let positions: Vec<u64> = refs.table().map(|(pos, _)| pos).collect();
        assert_eq!(positions, vec![1024, 2048, 4096]);
    }

    #[test]
    fn duplicate_position_is_a_bug() {
        let mut refs = sample();
        let result = refs.add_packet_reference(0, 2, 80, 1024, 16);
        assert!(matches!(result, Err(Error::Bug(_))));
    }

    #[test]
    fn successor_overlap_is_a_bug() {
        let mut refs = sample();
        // [2000, 2100) overlaps the entry at 2048
        assert!(matches!(refs.add_packet_reference(0, 2, 80, 2000, 100), Err(Error::Bug(_))));
    }

    #[test]
    fn predecessor_overlap_is_a_bug() {
        let mut refs = sample();
        // 1024 + 256 = 1280 > 1200
        assert!(matches!(refs.add_packet_reference(0, 2, 80, 1200, 16), Err(Error::Bug(_))));
    }

    #[test]
    fn touching_ranges_are_fine() {
        let mut refs = sample();
        refs.add_packet_reference(0, 2, 80, 1280, 768).unwrap();
        assert_eq!(refs.len(), 4);
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut refs = sample();
        assert!(matches!(refs.add_packet_reference(0, 2, 80, 9000, 0), Err(Error::Bug(_))));
    }

    #[test]
    fn reference_without_descriptor_is_a_bug() {
        let mut refs = PacketReferences::new();
        assert!(matches!(refs.add_packet_reference(0, 0, 0, 0, 16), Err(Error::Bug(_))));
    }

    #[test]
    fn serialization_roundtrips() {
        let refs = sample();
        let mut buf = Vec::new();
        refs.serialize(&mut buf).unwrap();

        let read_back = PacketReferences::deserialize(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read_back, refs);
    }

    #[test]
    fn empty_table_roundtrips() {
        let refs = PacketReferences::new();
        let mut buf = Vec::new();
        refs.serialize(&mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 8);

        let read_back = PacketReferences::deserialize(&mut Cursor::new(&buf)).unwrap();
        assert!(read_back.streams().is_empty());
        assert!(read_back.is_empty());
    }

    #[test]
    fn serialized_layout_is_big_endian() {
        let mut refs = PacketReferences::new();
        refs.add_copy_stream();
        refs.add_packet_reference(0, 0, 0x0102030405060708, 0xABCD, 0x11).unwrap();

        let mut buf = Vec::new();
        refs.serialize(&mut buf).unwrap();

        assert_eq!(&buf[0..4], &[0, 0, 0, 1]); // stream count
        assert_eq!(buf[4], STREAM_TAG_COPY);
        assert_eq!(&buf[5..13], &[0, 0, 0, 0, 0, 0, 0, 1]); // entry count
        assert_eq!(&buf[13..21], &[0, 0, 0, 0, 0, 0, 0xAB, 0xCD]); // orig pos
        assert_eq!(&buf[21..25], &[0, 0, 0, 0x11]); // orig size
    }

    #[test]
    fn corrupt_stream_tag_is_reported() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.push(9);
        let result = PacketReferences::deserialize(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(Error::CorruptSidecar(_))));
    }

    #[test]
    fn overlapping_entries_deserialize_as_corrupt_not_bug() {
        let mut refs = PacketReferences::new();
        refs.add_copy_stream();
        refs.add_packet_reference(0, 0, 0, 100, 50).unwrap();
        let mut buf = Vec::new();
        refs.serialize(&mut buf).unwrap();

        // duplicate the single entry to force an overlap on read
        let entry = buf[13..13 + 32].to_vec();
        buf.extend_from_slice(&entry);
        buf[5..13].copy_from_slice(&2u64.to_be_bytes());

        let result = PacketReferences::deserialize(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(Error::CorruptSidecar(_))));
    }

    #[test]
    fn reverse_index_covers_every_entry() {
        let refs = sample();
        let index = refs.reverse_index();
        assert_eq!(index.len(), 3);
        assert_eq!(index[&(0, 0, 0)], (1024, 256));
        assert_eq!(index[&(1, 0, 0)], (2048, 128));
        assert_eq!(index[&(0, 1, 40)], (4096, 256));
    }
}
