//! The backup pipeline: dump → compress → transfer → verify.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use derive_more::{Display, Error, From};
use serde_json::json;

use crate::catalog::{Catalog, Method, Snapshot};
use crate::compress::{self, CompressError, CompressionConfig};
use crate::config::ServerConfig;
use crate::drivers::{DatabaseDriver, DriverError, OperationResult};
use crate::exec::{self, ExecError};
use crate::job::{BackupJob, LogLevel};
use crate::notify::{Event, Notifier};
use crate::util::clock::Clock;
use crate::volume::Filesystem;

use super::{artifact_name, dump_extension, remove_temp_files, sha256_hex};

#[derive(Debug, Display, Error, From)]
pub enum BackupTaskError {
    #[display("{_0}")]
    #[from]
    Driver(DriverError),

    #[display("{_0}")]
    #[from]
    Exec(ExecError),

    #[display("{_0}")]
    #[from]
    Compress(CompressError),

    #[display("preparing the working directory failed: {_0}")]
    Workspace(io::Error),

    #[display("transferring the artifact to the volume failed: {_0}")]
    Transfer(io::Error),

    #[display("verifying the stored artifact failed: {_0}")]
    Verify(io::Error),
}

/// One backup of one logical database, end to end.
///
/// Snapshot and job records land in the catalog whether the pipeline succeeds
/// or fails; the error is reported to the caller either way so a scheduler
/// can decide whether to continue with the next database.
pub struct BackupTask<'a> {
    pub server: &'a ServerConfig,
    pub database: String,
    pub volume: &'a dyn Filesystem,
    pub compression: &'a CompressionConfig,
    pub working_dir: &'a Path,
    pub method: Method,
    pub clock: &'a dyn Clock,
    pub notifier: &'a dyn Notifier,
}

impl BackupTask<'_> {
    /// Runs the pipeline, returning the id of the recorded snapshot.
    pub fn run(
        &self,
        catalog: &Mutex<Catalog>,
        driver: &dyn DatabaseDriver,
    ) -> Result<u64, BackupTaskError> {
        let started = self.clock.now();
        let (snapshot_id, job_id) = {
            let mut catalog = catalog.lock().expect("catalog mutex poisoned");
            (catalog.allocate_id(), catalog.allocate_id())
        };

        let mut job = BackupJob::for_snapshot(job_id, snapshot_id);
        let mut snapshot = Snapshot {
            id: snapshot_id,
            server: self.server.name.clone(),
            database_name: self.database.clone(),
            database_type: self.server.engine,
            compression_type: self.compression.kind,
            method: self.method,
            job_id,
            path: String::new(),
            file_size: 0,
            checksum: None,
            started_at: started,
            file_exists: None,
            file_verified_at: None,
        };

        job.log(
            LogLevel::Info,
            format!("Starting {} backup of {}/{}", self.method, self.server.name, self.database),
        );
        job.mark_running();

        let dump_path = self
            .working_dir
            .join(format!("{snapshot_id}.{}", dump_extension(self.server.engine)));
        let result = self.execute(driver, &mut job, &mut snapshot, &dump_path);

        // Always clear local temp files: the dump, the compressed artifact
        // and the 7z staging directory, success or not.
        let mut staged = dump_path.clone().into_os_string();
        staged.push(".stage");
        remove_temp_files(&[
            dump_path.clone(),
            compressed_sibling(&dump_path, self.compression.kind.extension()),
            PathBuf::from(staged),
        ]);

        match &result {
            Ok(()) => {
                job.log(LogLevel::Info, "Backup completed");
                job.mark_completed();
            }
            Err(e) => {
                job.log_with_context(
                    LogLevel::Error,
                    format!("Backup failed: {e}"),
                    json!({ "trace": format!("{e:?}") }),
                );
                job.mark_failed(e.to_string(), format!("{e:?}"));
                self.notifier.notify(&Event::BackupFailed {
                    server: self.server.name.clone(),
                    database: self.database.clone(),
                    error: e.to_string(),
                });
            }
        }

        let mut catalog = catalog.lock().expect("catalog mutex poisoned");
        catalog.jobs.push(job);
        catalog.snapshots.push(snapshot);

        result.map(|()| snapshot_id)
    }

    fn execute(
        &self,
        driver: &dyn DatabaseDriver,
        job: &mut BackupJob,
        snapshot: &mut Snapshot,
        dump_path: &Path,
    ) -> Result<(), BackupTaskError> {
        fs::create_dir_all(self.working_dir).map_err(BackupTaskError::Workspace)?;

        job.log(
            LogLevel::Info,
            format!("Dumping {} to {}", self.database, dump_path.display()),
        );
        match driver.dump(dump_path)? {
            OperationResult::Command(cmd) => {
                exec::run(&cmd, job)?;
            }
            OperationResult::Performed { message } => job.log(LogLevel::Info, message),
        }

        job.log(LogLevel::Info, format!("Compressing dump with {}", self.compression.kind));
        let compressor = compress::compressor_for(self.compression)?;
        let artifact = compressor.compress(dump_path, job)?;

        let name = artifact_name(
            &self.server.name,
            &self.database,
            snapshot.started_at,
            dump_extension(self.server.engine),
            compressor.extension(),
        );
        job.log(LogLevel::Info, format!("Transferring artifact to volume as {name}"));
        let mut reader = File::open(&artifact).map_err(BackupTaskError::Transfer)?;
        self.volume
            .write_stream(&name, &mut reader)
            .map_err(BackupTaskError::Transfer)?;

        // Size and checksum are read back from the volume so they attest the
        // stored copy, not the local one.
        let size = self.volume.file_size(&name).map_err(BackupTaskError::Verify)?;
        let mut stored = self.volume.read_stream(&name).map_err(BackupTaskError::Verify)?;
        let checksum = sha256_hex(stored.as_mut()).map_err(BackupTaskError::Verify)?;
        job.log_with_context(
            LogLevel::Info,
            format!("Artifact stored ({size} bytes)"),
            json!({ "checksum": checksum }),
        );

        snapshot.path = name;
        snapshot.file_size = size;
        snapshot.checksum = Some(checksum);
        Ok(())
    }
}

fn compressed_sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
