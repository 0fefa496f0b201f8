use std::path::{Path, PathBuf};

use crate::exec::{self, CommandLine};
use crate::job::BackupJob;

use super::{clamp_level, CompressError, Compressor};

const LEVEL_MIN: u32 = 1;
const LEVEL_MAX: u32 = 19;

/// Compression through the external `zstd` binary.
///
/// `--rm` makes the tool consume its input, matching the gzip strategy.
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: u32,
}

impl ZstdCompressor {
    pub fn new(level: u32) -> Self {
        Self { level: clamp_level(level, LEVEL_MIN, LEVEL_MAX) }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn compress_command(&self, path: &Path) -> CommandLine {
        CommandLine::new("zstd")
            .arg(format!("-{}", self.level))
            .arg("-q")
            .arg("--rm")
            .arg("-f")
            .arg(path.display().to_string())
    }

    fn decompress_command(&self, path: &Path) -> CommandLine {
        CommandLine::new("zstd")
            .arg("-d")
            .arg("-q")
            .arg("--rm")
            .arg("-f")
            .arg(path.display().to_string())
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        exec::run(&self.compress_command(path), job)?;
        Ok(self.compressed_path(path))
    }

    fn decompress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        exec::run(&self.decompress_command(path), job)?;
        Ok(self.decompressed_path(path))
    }

    fn extension(&self) -> &'static str {
        "zst"
    }
}
