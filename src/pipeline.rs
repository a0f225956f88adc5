//! Compression and decompression drivers.

use crate::config::EncodeConfig;
use crate::decoders::StreamDecoder;
use crate::encoders::StreamEncoder;
use crate::error::{Error, Result};
use crate::llr;
use crate::media::demux::MatroskaDemuxer;
use crate::media::hash::{self, Hasher};
use crate::media::io::{seek_to, write_in_chunks, MAX_WRITE_UNIT};
use crate::media::mux::MatroskaMuxer;
use crate::reftable::PacketReferences;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct CompressionStats {
    pub original_size: u64,
    pub container_size: u64,
    pub sidecar_size: u64,
    pub ratio: f64,
    pub streams: usize,
    pub packets: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecompressionStats {
    pub original_size: u64,
    pub hash_name: String,
    pub packets: u64,
}

fn byte_progress(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

/// Compresses `input` into a remuxed container at `output` plus a sidecar at
/// `sidecar`.
pub fn compress(
    input: &Path,
    output: &Path,
    sidecar: &Path,
    config: &EncodeConfig,
) -> Result<CompressionStats> {
    config.validate()?;

    let mut demuxer = MatroskaDemuxer::open(input)?;
    let source_size = demuxer.byte_size();

    let mut refs = PacketReferences::new();
    let mut encoders = Vec::new();
    let mut out_streams = Vec::new();

    log::debug!("Encoders:");
    let input_streams: Vec<_> = demuxer.streams().to_vec();
    for stream in &input_streams {
        let (encoder, out_stream) = StreamEncoder::for_stream(stream, config, &mut refs)?;
        encoders.push(encoder);
        out_streams.push(out_stream);
    }

    let mut muxer = MatroskaMuxer::create(output, out_streams)?;
    muxer.write_header()?;

    let pb = byte_progress(source_size);
    let mut packets = 0u64;
    while let Some(packet) = demuxer.read_packet()? {
        log::debug!(
            "Input packet: Stream #0:{} (pos {} size {}) - pts {} dts {} duration {}",
            packet.stream_index,
            packet.pos,
            packet.data.len(),
            packet.pts,
            packet.dts,
            packet.duration
        );

        encoders[packet.stream_index].process_packet(&packet, &mut muxer, &mut refs)?;
        packets += 1;
        if packet.pos >= 0 {
            pb.set_position(packet.pos as u64);
        }
    }
    pb.finish_and_clear();

    refs.debug_dump();

    let mut sidecar_file = BufWriter::new(
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(sidecar)
            .map_err(|e| Error::external("open", format!("{}: {e}", sidecar.display())))?,
    );
    llr::write_llr(demuxer.reader_mut(), source_size, &refs, &mut sidecar_file, &config.hash_name)?;
    sidecar_file.flush()?;

    muxer.write_trailer()?;

    let container_size = std::fs::metadata(output)?.len();
    let sidecar_size = std::fs::metadata(sidecar)?.len();
    let packed = container_size + sidecar_size;
    Ok(CompressionStats {
        original_size: source_size,
        container_size,
        sidecar_size,
        ratio: if packed > 0 { source_size as f64 / packed as f64 } else { 0.0 },
        streams: input_streams.len(),
        packets,
    })
}

/// Reconstructs the original container from a remuxed container plus its
/// sidecar, verifying the stored hash over the result.
pub fn decompress(input: &Path, output: &Path, sidecar: &Path) -> Result<DecompressionStats> {
    let mut sidecar_file = BufReader::new(
        std::fs::File::open(sidecar)
            .map_err(|e| Error::external("open", format!("{}: {e}", sidecar.display())))?,
    );
    let mut output_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(output)
        .map_err(|e| Error::external("open", format!("{}: {e}", output.display())))?;

    let (refs, info) = llr::read_llr(&mut sidecar_file, &mut output_file)?;
    refs.debug_dump();

    let mut demuxer = MatroskaDemuxer::open(input)?;
    if refs.streams().len() != demuxer.streams().len() {
        return Err(Error::CorruptSidecar(format!(
            "stream count mismatch: sidecar has {}, container has {}",
            refs.streams().len(),
            demuxer.streams().len()
        )));
    }

    log::debug!("Decoders:");
    let mut decoders = Vec::new();
    for (stream, stream_info) in demuxer.streams().iter().zip(refs.streams()) {
        decoders.push(StreamDecoder::for_stream(stream, stream_info)?);
    }

    let mut reverse = refs.reverse_index();
    let mut packet_indices = vec![0u64; decoders.len()];

    let pb = ProgressBar::new(reverse.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] Packets {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut packets = 0u64;
    while let Some(packet) = demuxer.read_packet()? {
        let stream_index = packet.stream_index;
        let packet_index = packet_indices[stream_index];
        packet_indices[stream_index] += 1;

        log::debug!(
            "Input packet: Stream #0:{} (index {}) - pts {} dts {} duration {}",
            stream_index,
            packet_index,
            packet.pts,
            packet.dts,
            packet.duration
        );

        let key = (stream_index as u32, packet_index, packet.pts);
        let (orig_pos, orig_size) = reverse.remove(&key).ok_or_else(|| {
            Error::MissingPacket(format!(
                "failed to find destination block for stream {stream_index} packet {packet_index}"
            ))
        })?;

        let data = decoders[stream_index].decode_packet(&packet)?;
        if data.len() as u64 != orig_size as u64 {
            return Err(Error::SizeMismatch { expected: orig_size as u64, actual: data.len() as u64 });
        }

        log::debug!(" -> {}-{}: writing {} bytes", orig_pos, orig_pos + orig_size as u64, orig_size);
        seek_to(&mut output_file, orig_pos)?;
        write_in_chunks(&mut output_file, &data)?;

        packets += 1;
        pb.inc(1);
    }
    pb.finish_and_clear();

    if !reverse.is_empty() {
        return Err(Error::MissingPacket("one or more source packets are missing".into()));
    }

    verify_hash(&mut output_file, &info)?;
    Ok(DecompressionStats {
        original_size: info.original_size,
        hash_name: info.hash_name,
        packets,
    })
}

fn verify_hash<F: Read + std::io::Seek>(output: &mut F, info: &llr::LlrInfo) -> Result<()> {
    let mut hasher = Hasher::new(&info.hash_name)
        .map_err(|_| Error::CorruptSidecar(format!("unknown hash algorithm: {}", info.hash_name)))?;
    if hasher.size() != info.hash.len() {
        return Err(Error::CorruptSidecar(format!(
            "hash size {} does not match algorithm {}",
            info.hash.len(),
            info.hash_name
        )));
    }

    seek_to(output, 0)?;
    let mut buffer = [0u8; MAX_WRITE_UNIT];
    let mut remaining = info.original_size;
    while remaining > 0 {
        let want = (remaining as usize).min(MAX_WRITE_UNIT);
        let got = output.read(&mut buffer[..want])?;
        if got == 0 {
            return Err(Error::external("verify", "reconstructed file shorter than expected"));
        }
        hasher.update(&buffer[..got]);
        remaining -= got as u64;
    }

    let digest = hasher.finalize();
    log::debug!("Computed output hash ({}): {}", info.hash_name, hash::to_hex(&digest));
    if digest != info.hash {
        return Err(Error::HashMismatch);
    }
    Ok(())
}
