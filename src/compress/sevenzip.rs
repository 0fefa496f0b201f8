use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::exec::{self, CommandLine};
use crate::job::{BackupJob, LogLevel};

use super::{clamp_level, CompressError, Compressor};

const LEVEL_MIN: u32 = 1;
const LEVEL_MAX: u32 = 9;

/// Names the archive tool can give the dump inside an encrypted archive.
const INNER_NAMES: [&str; 2] = ["dump.sql", "dump.db"];

/// Passphrase-protected 7z archives through the external `7z` binary.
///
/// Header encryption (`-mhe=on`) hides the member names, so the archive
/// cannot even be listed without the key. Because of that, decompression
/// cannot rely on a deterministic output path: the extracted tree is scanned
/// for `dump.sql` or `dump.db`, first match wins. Compression stages its
/// input under that fixed inner name to keep the scan well-defined.
#[derive(Debug, Clone)]
pub struct SevenZipCompressor {
    level: u32,
    passphrase: String,
}

impl SevenZipCompressor {
    pub fn new(level: u32, passphrase: String) -> Self {
        Self { level: clamp_level(level, LEVEL_MIN, LEVEL_MAX), passphrase }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Staging directory keyed to the input path, so concurrent pipelines
    /// sharing one working directory never collide on the inner name.
    fn staging_dir(&self, path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".stage");
        PathBuf::from(name)
    }

    fn extraction_dir(&self, archive: &Path) -> PathBuf {
        let mut name = archive.as_os_str().to_os_string();
        name.push(".extracted");
        PathBuf::from(name)
    }

    fn inner_name(path: &Path) -> &'static str {
        match path.extension().and_then(|e| e.to_str()) {
            Some("db") => "dump.db",
            _ => "dump.sql",
        }
    }

    fn archive_command(&self, archive: &Path, staged: &Path) -> CommandLine {
        CommandLine::new("7z")
            .arg("a")
            .arg("-t7z")
            .arg(format!("-mx={}", self.level))
            .arg("-mhe=on")
            .secret_flag("-p", &self.passphrase)
            .arg(archive.display().to_string())
            .arg(staged.display().to_string())
    }

    fn extract_command(&self, archive: &Path, target: &Path) -> CommandLine {
        CommandLine::new("7z")
            .arg("x")
            .arg("-y")
            .secret_flag("-p", &self.passphrase)
            .arg(format!("-o{}", target.display()))
            .arg(archive.display().to_string())
    }
}

impl Compressor for SevenZipCompressor {
    fn compress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        let staging = self.staging_dir(path);
        fs::create_dir_all(&staging)?;
        let staged = staging.join(Self::inner_name(path));
        fs::rename(path, &staged)?;

        let archive = self.compressed_path(path);
        let result = exec::run(&self.archive_command(&archive, &staged), job);

        // The staged copy (and with it the original dump) is consumed either
        // way; a half-written archive must not leave plaintext behind.
        if let Err(e) = fs::remove_dir_all(&staging) {
            log::warn!(target: "compress", "Removing staging dir {} failed: {e}", staging.display());
        }
        result?;

        job.log(
            LogLevel::Debug,
            format!("Archived dump into encrypted {} (level {})", archive.display(), self.level),
        );
        Ok(archive)
    }

    fn decompress(&self, path: &Path, job: &mut BackupJob) -> Result<PathBuf, CompressError> {
        let target = self.extraction_dir(path);
        fs::create_dir_all(&target)?;
        exec::run(&self.extract_command(path, &target), job)?;

        let dump = find_dump_file(&target)?
            .ok_or_else(|| CompressError::MissingDumpFile(target.clone()))?;
        job.log(LogLevel::Debug, format!("Extracted dump to {}", dump.display()));
        Ok(dump)
    }

    fn extension(&self) -> &'static str {
        "7z"
    }
}

/// Depth-first scan for a file named `dump.sql` or `dump.db`; entries are
/// visited in name order so the first match is deterministic.
fn find_dump_file(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut subdirs = Vec::new();
    for entry in &entries {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if INNER_NAMES.contains(&name) {
                return Ok(Some(path));
            }
        }
    }

    for subdir in subdirs {
        if let Some(found) = find_dump_file(&subdir)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_is_clamped_into_the_7z_range() {
        assert_eq!(SevenZipCompressor::new(0, "k".into()).level(), 1);
        assert_eq!(SevenZipCompressor::new(12, "k".into()).level(), 9);
    }

    #[test]
    fn archive_command_enables_header_encryption_and_masks_the_key() {
        let compressor = SevenZipCompressor::new(5, "topsecret".into());
        let cmd = compressor
            .archive_command(Path::new("/w/4.sql.7z"), Path::new("/w/4.sql.stage/dump.sql"));

        let argv: Vec<_> = cmd.argv().collect();
        assert!(argv.contains(&"-mhe=on"));
        assert!(argv.contains(&"-mx=5"));
        assert!(argv.contains(&"-ptopsecret"));
        assert!(!cmd.sanitized().contains("topsecret"));
        assert!(cmd.sanitized().contains("-p***"));
    }

    #[test]
    fn inner_name_follows_the_dump_extension() {
        assert_eq!(SevenZipCompressor::inner_name(Path::new("/w/1.sql")), "dump.sql");
        assert_eq!(SevenZipCompressor::inner_name(Path::new("/w/1.db")), "dump.db");
    }

    #[test]
    fn dump_scan_finds_the_first_match_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::write(dir.path().join("nested/dump.sql"), b"sql").unwrap();

        let found = find_dump_file(dir.path()).unwrap().unwrap();
        assert_eq!(found, dir.path().join("nested/dump.sql"));
    }

    #[test]
    fn dump_scan_reports_nothing_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("other.bin"), b"x").unwrap();
        assert!(find_dump_file(dir.path()).unwrap().is_none());
    }
}
