//! SQLite adapter.
//!
//! No subprocess at all: a SQLite "dump" is a byte-for-byte copy of the
//! database file, and a restore replaces the whole file. When the server
//! lives behind SSH the copy streams through an SFTP-backed [Filesystem]
//! instead of the local disk.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::job::{BackupJob, LogLevel};
use crate::volume::Filesystem;

use super::{ConnectionProbe, DatabaseDriver, DriverError, OperationResult};

#[derive(Debug)]
pub struct SqliteDriver {
    path: PathBuf,
    /// Remote access to the database file; `None` means local disk.
    remote: Option<Arc<dyn Filesystem>>,
}

impl SqliteDriver {
    pub fn new(path: PathBuf) -> Self {
        Self { path, remote: None }
    }

    pub fn remote(path: PathBuf, fs: Arc<dyn Filesystem>) -> Self {
        Self { path, remote: Some(fs) }
    }

    fn copy_from_database(&self, output: &Path) -> io::Result<u64> {
        match &self.remote {
            Some(fs) => {
                let mut reader = fs.read_stream(&self.path.display().to_string())?;
                let mut writer = File::create(output)?;
                io::copy(&mut reader, &mut writer)
            }
            None => fs::copy(&self.path, output),
        }
    }

    fn copy_to_database(&self, input: &Path) -> io::Result<u64> {
        match &self.remote {
            Some(fs) => {
                let mut reader = File::open(input)?;
                fs.write_stream(&self.path.display().to_string(), &mut reader)
            }
            None => fs::copy(input, &self.path),
        }
    }
}

impl DatabaseDriver for SqliteDriver {
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError> {
        let bytes = self.copy_from_database(output)?;
        Ok(OperationResult::Performed {
            message: format!("Copied database file {} ({bytes} bytes)", self.path.display()),
        })
    }

    fn restore(&self, input: &Path) -> Result<OperationResult, DriverError> {
        let bytes = self.copy_to_database(input)?;
        Ok(OperationResult::Performed {
            message: format!("Replaced database file {} ({bytes} bytes)", self.path.display()),
        })
    }

    fn prepare_for_restore(&self, _schema: &str, job: &mut BackupJob) -> Result<(), DriverError> {
        // Restoring replaces the whole file; there is no schema to prepare.
        job.log(LogLevel::Debug, "SQLite restore replaces the database file; nothing to prepare");
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(DriverError::MissingFilePath)?;
        Ok(vec![name])
    }

    fn test_connection(&self) -> ConnectionProbe {
        let start = Instant::now();
        let result = match &self.remote {
            Some(fs) => fs
                .file_size(&self.path.display().to_string())
                .map_err(|e| e.to_string()),
            None => fs::metadata(&self.path).map(|m| m.len()).map_err(|e| e.to_string()),
        };
        match result {
            Ok(size) => ConnectionProbe::Success {
                latency: start.elapsed(),
                server_info: format!("sqlite file {} ({size} bytes)", self.path.display()),
            },
            Err(message) => ConnectionProbe::Failed { message },
        }
    }
}
