//! Zstd and LZ4 codecs for transfer artifacts
//!
//! Level 0 means "no compression" and is handled by the executor; the codec
//! itself is only invoked for levels >= 1.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// Compression algorithm used for an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Passthrough, the artifact is the original file
    None,
    /// LZ4 frame format; ignores the level
    Lz4,
    /// Zstandard, levels 1..=22
    #[default]
    Zstd,
}

impl CompressionAlgorithm {
    /// Name stored in object metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
            CompressionAlgorithm::Zstd => "zstd",
        }
    }

    /// Parse a metadata value back into an algorithm.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(CompressionAlgorithm::None),
            "lz4" => Some(CompressionAlgorithm::Lz4),
            "zstd" => Some(CompressionAlgorithm::Zstd),
            _ => None,
        }
    }

    /// File suffix for compressed temp artifacts.
    pub fn suffix(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => ".dat",
            CompressionAlgorithm::Lz4 => ".lz4",
            CompressionAlgorithm::Zstd => ".zst",
        }
    }

    /// Compress an in-memory buffer.
    pub fn compress(&self, data: &[u8], level: i32) -> BenchResult<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        self.encode_stream(data, &mut out, level)?;
        Ok(out)
    }

    /// Decompress an in-memory buffer.
    pub fn decompress(&self, data: &[u8]) -> BenchResult<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        self.decode_stream(data, &mut out)?;
        Ok(out)
    }

    /// Stream-compress `input` into `output`. Returns the compressed size.
    ///
    /// An empty artifact is an error unless the input was empty too.
    pub fn compress_file(&self, input: &Path, output: &Path, level: i32) -> BenchResult<u64> {
        let file = File::open(input)?;
        let input_size = file.metadata()?.len();
        let reader = BufReader::new(file);
        let mut writer = BufWriter::new(File::create(output)?);
        self.encode_stream(reader, &mut writer, level)?;
        writer.flush()?;
        drop(writer);
        let size = std::fs::metadata(output)?.len();
        if size == 0 && input_size > 0 {
            return Err(BenchError::CodecFailure(format!(
                "{} produced an empty artifact for {}",
                self.as_str(),
                input.display()
            )));
        }
        Ok(size)
    }

    /// Stream-decompress `input` into `output`. Returns the decompressed size.
    pub fn decompress_file(&self, input: &Path, output: &Path) -> BenchResult<u64> {
        let reader = BufReader::new(File::open(input)?);
        let mut writer = BufWriter::new(File::create(output)?);
        self.decode_stream(reader, &mut writer)?;
        writer.flush()?;
        drop(writer);
        Ok(std::fs::metadata(output)?.len())
    }

    fn encode_stream<R: Read, W: Write>(&self, mut reader: R, writer: W, level: i32) -> BenchResult<()> {
        match self {
            CompressionAlgorithm::None => {
                let mut writer = writer;
                io::copy(&mut reader, &mut writer).map_err(codec_err)?;
            }
            CompressionAlgorithm::Lz4 => {
                let mut enc = lz4_flex::frame::FrameEncoder::new(writer);
                io::copy(&mut reader, &mut enc).map_err(codec_err)?;
                enc.finish()
                    .map_err(|e| BenchError::CodecFailure(e.to_string()))?;
            }
            CompressionAlgorithm::Zstd => {
                zstd::stream::copy_encode(reader, writer, level).map_err(codec_err)?;
            }
        }
        Ok(())
    }

    fn decode_stream<R: Read, W: Write>(&self, reader: R, mut writer: W) -> BenchResult<()> {
        match self {
            CompressionAlgorithm::None => {
                let mut reader = reader;
                io::copy(&mut reader, &mut writer).map_err(codec_err)?;
            }
            CompressionAlgorithm::Lz4 => {
                let mut dec = lz4_flex::frame::FrameDecoder::new(reader);
                io::copy(&mut dec, &mut writer).map_err(codec_err)?;
            }
            CompressionAlgorithm::Zstd => {
                zstd::stream::copy_decode(reader, writer).map_err(codec_err)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompressionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unknown compression algorithm: {}", s))
    }
}

fn codec_err(e: io::Error) -> BenchError {
    BenchError::CodecFailure(e.to_string())
}
