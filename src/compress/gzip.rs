use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::job::{BackupJob, LogLevel};

use super::{clamp_level, CompressError, Compressor};

const LEVEL_MIN: u32 = 1;
const LEVEL_MAX: u32 = 9;

/// In-process gzip, streamed file to file.
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self { level: clamp_level(level, LEVEL_MIN, LEVEL_MAX) }
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        let target = self.compressed_path(path);

        let mut reader = BufReader::new(File::open(path)?);
        let writer = BufWriter::new(File::create(&target)?);
        let mut encoder = GzEncoder::new(writer, Compression::new(self.level));
        let read = io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?;

        // Mirror the gzip CLI: the uncompressed source is consumed.
        fs::remove_file(path)?;

        job.log(
            LogLevel::Debug,
            format!("Compressed {read} bytes with gzip level {} into {}", self.level, target.display()),
        );
        Ok(target)
    }

    fn decompress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        let target = self.decompressed_path(path);

        let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
        let mut writer = BufWriter::new(File::create(&target)?);
        let written = io::copy(&mut decoder, &mut writer)?;

        fs::remove_file(path)?;

        job.log(
            LogLevel::Debug,
            format!("Decompressed {} into {} ({written} bytes)", path.display(), target.display()),
        );
        Ok(target)
    }

    fn extension(&self) -> &'static str {
        "gz"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_consumes_the_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("9.sql");
        fs::write(&dump, b"CREATE TABLE t (id INT);\n").unwrap();

        let compressor = GzipCompressor::new(6);
        let mut job = BackupJob::for_snapshot(1, 9);

        let artifact = compressor.compress(&dump, &mut job).unwrap();
        assert_eq!(artifact, dir.path().join("9.sql.gz"));
        assert!(!dump.exists(), "gzip consumes its input");
        assert!(artifact.exists());

        let restored = compressor.decompress(&artifact, &mut job).unwrap();
        assert_eq!(restored, dump);
        assert!(!artifact.exists());
        assert_eq!(fs::read(&restored).unwrap(), b"CREATE TABLE t (id INT);\n");
    }

    #[test]
    fn level_is_clamped_on_construction() {
        assert_eq!(GzipCompressor::new(0).level(), 1);
        assert_eq!(GzipCompressor::new(9).level(), 9);
        assert_eq!(GzipCompressor::new(99).level(), 9);
    }
}
