//! Pluggable dump compression.
//!
//! Three strategies: gzip (in-process), zstd (external `zstd` binary) and
//! encrypted 7z (external `7z` binary with header encryption). All of them
//! clamp the configured level into the engine's valid range instead of
//! rejecting it, and all of them consume their input: after `compress` the
//! source file no longer exists.

use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::exec::ExecError;
use crate::job::BackupJob;

mod gzip;
mod sevenzip;
mod zstd;

pub use gzip::GzipCompressor;
pub use sevenzip::SevenZipCompressor;
pub use zstd::ZstdCompressor;

/// Which compression strategy a backup configuration uses.
///
/// The variant doubles as the artifact's extension-based type tag.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    #[default]
    #[display("gzip")]
    Gzip,
    #[display("zstd")]
    Zstd,
    #[serde(rename = "7z")]
    #[value(name = "7z")]
    #[display("7z")]
    SevenZip,
}

impl CompressionKind {
    /// Artifact extension without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Zstd => "zst",
            Self::SevenZip => "7z",
        }
    }
}

/// Compression section of the application config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub kind: CompressionKind,

    /// Compression level; silently clamped to the strategy's valid range.
    #[serde(default = "default_level")]
    pub level: u32,

    /// Archive passphrase, required for (and only used by) the 7z strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

fn default_level() -> u32 {
    6
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { kind: CompressionKind::Gzip, level: default_level(), passphrase: None }
    }
}

#[derive(Debug, Display, Error, From)]
pub enum CompressError {
    #[display("{_0}")]
    #[from]
    Exec(ExecError),

    #[display("compression io error: {_0}")]
    #[from]
    Io(io::Error),

    /// The extracted 7z archive contains no `dump.sql`/`dump.db`.
    #[display("no dump file found in extracted archive {}", _0.display())]
    MissingDumpFile(#[error(ignore)] PathBuf),

    #[display("encrypted 7z archives require a passphrase")]
    MissingPassphrase,
}

/// One compression strategy.
///
/// `compress`/`decompress` log their work to the owning job and return the
/// path of the produced file. Callers must not assume the input file still
/// exists afterwards.
pub trait Compressor {
    fn compress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError>;
    fn decompress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError>;

    /// Artifact extension without the leading dot (`gz`, `zst`, `7z`).
    fn extension(&self) -> &'static str;

    /// Where `compress(path)` will put its output.
    fn compressed_path(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(self.extension());
        PathBuf::from(name)
    }

    /// Where `decompress(path)` will put its output (the path with the
    /// compression extension stripped).
    fn decompressed_path(&self, path: &Path) -> PathBuf {
        path.with_extension("")
    }
}

/// Clamps `level` into `[min, max]`; out-of-range input is corrected, never
/// rejected. Idempotent for already-valid levels.
pub fn clamp_level(level: u32, min: u32, max: u32) -> u32 {
    level.clamp(min, max)
}

/// Builds the configured strategy.
pub fn compressor_for(config: &CompressionConfig) -> Result<Box<dyn Compressor>, CompressError> {
    match config.kind {
        CompressionKind::Gzip => Ok(Box::new(GzipCompressor::new(config.level))),
        CompressionKind::Zstd => Ok(Box::new(ZstdCompressor::new(config.level))),
        CompressionKind::SevenZip => {
            let passphrase =
                config.passphrase.clone().ok_or(CompressError::MissingPassphrase)?;
            Ok(Box::new(SevenZipCompressor::new(config.level, passphrase)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_is_idempotent_for_valid_levels() {
        for level in 1..=9 {
            assert_eq!(clamp_level(level, 1, 9), level);
        }
    }

    #[test]
    fn out_of_range_levels_are_clamped_not_rejected() {
        assert_eq!(clamp_level(0, 1, 9), 1);
        assert_eq!(clamp_level(42, 1, 9), 9);
        assert_eq!(clamp_level(100, 1, 19), 19);
    }

    #[test]
    fn artifact_paths_append_and_strip_the_extension() {
        let gzip = GzipCompressor::new(6);
        let path = Path::new("/tmp/work/17.sql");
        assert_eq!(gzip.compressed_path(path), Path::new("/tmp/work/17.sql.gz"));
        assert_eq!(gzip.decompressed_path(Path::new("/tmp/work/17.sql.gz")), path);
        assert_eq!(gzip.extension(), "gz");

        let zstd = ZstdCompressor::new(3);
        assert_eq!(zstd.compressed_path(path), Path::new("/tmp/work/17.sql.zst"));

        let seven = SevenZipCompressor::new(5, "key".into());
        assert_eq!(seven.compressed_path(path), Path::new("/tmp/work/17.sql.7z"));
    }

    #[test]
    fn seven_zip_without_passphrase_is_rejected() {
        let config = CompressionConfig {
            kind: CompressionKind::SevenZip,
            level: 5,
            passphrase: None,
        };
        assert!(matches!(compressor_for(&config), Err(CompressError::MissingPassphrase)));
    }

    #[test]
    fn kind_serializes_as_its_extension_tag() {
        assert_eq!(serde_json::to_string(&CompressionKind::SevenZip).unwrap(), "\"7z\"");
        assert_eq!(serde_json::to_string(&CompressionKind::Gzip).unwrap(), "\"gzip\"");
    }
}
