use crate::config::{self, EncodeConfig};
use crate::error::{Error, Result};
use crate::media::hash;
use crate::pipeline;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(author, version, about, long_about = "Losslessly repack raw streams in multimedia containers")]
#[command(after_help = hash_algorithms_help())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Help footer listing what the hash registry actually resolves.
fn hash_algorithms_help() -> String {
    format!("Available hash algorithms: {}", hash::algorithms().join(", "))
}

#[derive(Subcommand)]
enum Commands {
    /// Compresses a multimedia file
    Compress {
        /// Input file to compress
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output container (must end with .mkv unless --llr is given)
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Sidecar file (default: OUTPUT with its extension replaced by .llr)
        #[arg(long, value_name = "FILE")]
        llr: Option<PathBuf>,

        /// Video codec used for raw video streams
        #[arg(short = 'c', long, default_value = config::DEFAULT_VIDEO_CODEC)]
        codec: String,

        /// Video codec option as key=value (repeatable)
        #[arg(long = "codec-opt", value_name = "KEY=VALUE")]
        codec_opts: Vec<String>,

        /// Hash algorithm embedded in the sidecar
        #[arg(long, default_value = hash::DEFAULT_ALGORITHM)]
        hash: String,
    },
    /// Reconstructs the original file from a compressed container
    Decompress {
        /// Input container (must end with .mkv unless --llr is given)
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Output file name
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Sidecar file (default: INPUT with its extension replaced by .llr)
        #[arg(long, value_name = "FILE")]
        llr: Option<PathBuf>,
    },
}

fn sidecar_from_container(arg_name: &str, path: &Path) -> Result<PathBuf> {
    if path.extension().and_then(|e| e.to_str()) == Some("mkv") {
        Ok(path.with_extension("llr"))
    } else {
        Err(Error::InvalidInput(format!("{arg_name} must end with .mkv")))
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Compress { input, output, llr, codec, codec_opts, hash } => {
            let sidecar = match llr {
                Some(path) => path.clone(),
                None => sidecar_from_container("OUTPUT", output)?,
            };
            let config = EncodeConfig {
                video_codec: codec.clone(),
                codec_options: config::parse_codec_options(codec_opts)?,
                hash_name: hash.clone(),
            };

            println!("Compressing {} to {}...", input.display(), output.display());
            let start = Instant::now();
            let stats = pipeline::compress(input, output, &sidecar, &config)?;
            let duration = start.elapsed();

            println!("Compression successful!");
            println!("  Original Size:    {} bytes", stats.original_size);
            println!("  Container Size:   {} bytes", stats.container_size);
            println!("  Sidecar Size:     {} bytes", stats.sidecar_size);
            println!("  Ratio:            {:.2}x", stats.ratio);
            println!("  Elapsed Time:     {:.2?}", duration);
        }
        Commands::Decompress { input, output, llr } => {
            let sidecar = match llr {
                Some(path) => path.clone(),
                None => sidecar_from_container("INPUT", input)?,
            };

            println!("Decompressing {} to {}...", input.display(), output.display());
            let start = Instant::now();
            let stats = pipeline::decompress(input, output, &sidecar)?;
            let duration = start.elapsed();

            println!("Decompression successful!");
            println!("  Original Size: {} bytes ({} verified)", stats.original_size, stats.hash_name);
            println!("  Elapsed Time:  {:.2?}", duration);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_footer_tracks_the_hash_registry() {
        let footer = hash_algorithms_help();
        for name in hash::algorithms() {
            assert!(footer.contains(name), "missing {name} in: {footer}");
        }
    }

    #[test]
    fn sidecar_path_derivation() {
        let path = sidecar_from_container("OUTPUT", Path::new("/tmp/movie.mkv")).unwrap();
        assert_eq!(path, Path::new("/tmp/movie.llr"));

        assert!(sidecar_from_container("OUTPUT", Path::new("/tmp/movie.avi")).is_err());
        assert!(sidecar_from_container("INPUT", Path::new("movie")).is_err());
    }
}
