//! The restore pipeline: download → decompress → prepare → load.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use derive_more::{Display, Error, From};
use serde_json::json;

use crate::catalog::{Catalog, Method, Restore, Snapshot};
use crate::compress::{self, CompressError, CompressionConfig};
use crate::config::ServerConfig;
use crate::drivers::{DatabaseDriver, DriverError, EngineKind, OperationResult};
use crate::exec::{self, ExecError};
use crate::job::{BackupJob, LogLevel};
use crate::notify::{Event, Notifier};
use crate::util::clock::Clock;
use crate::volume::Filesystem;

use super::{dump_extension, remove_temp_files};

#[derive(Debug, Display, Error, From)]
pub enum RestoreTaskError {
    /// Raised before any record is created; a snapshot can only be loaded
    /// into a server of the same engine.
    #[display("cannot restore a {snapshot} snapshot to {target} server {server}")]
    EngineMismatch { snapshot: EngineKind, target: EngineKind, server: String },

    /// The snapshot never finished its transfer; there is nothing to fetch.
    #[display("snapshot {_0} has no stored artifact to restore")]
    MissingArtifact(#[error(ignore)] u64),

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

    #[display("downloading the artifact failed: {_0}")]
    Download(io::Error),
}

/// One restore of one snapshot into a target server, end to end.
pub struct RestoreTask<'a> {
    /// Target server; its engine must match the snapshot's.
    pub server: &'a ServerConfig,
    pub snapshot: &'a Snapshot,
    /// Destination schema name on the target.
    pub schema: String,
    pub volume: &'a dyn Filesystem,
    /// Level and passphrase for decompression; the strategy itself follows
    /// the snapshot's recorded compression type.
    pub compression: &'a CompressionConfig,
    pub working_dir: &'a Path,
    pub method: Method,
    pub actor: Option<String>,
    pub clock: &'a dyn Clock,
    pub notifier: &'a dyn Notifier,
}

impl RestoreTask<'_> {
    /// Runs the pipeline, returning the id of the recorded restore.
    pub fn run(
        &self,
        catalog: &Mutex<Catalog>,
        driver: &dyn DatabaseDriver,
    ) -> Result<u64, RestoreTaskError> {
        // Validation failures happen before any job or restore record exists.
        if self.server.engine != self.snapshot.database_type {
            return Err(RestoreTaskError::EngineMismatch {
                snapshot: self.snapshot.database_type,
                target: self.server.engine,
                server: self.server.name.clone(),
            });
        }
        if self.snapshot.path.is_empty() {
            return Err(RestoreTaskError::MissingArtifact(self.snapshot.id));
        }

        let (restore_id, job_id) = {
            let mut catalog = catalog.lock().expect("catalog mutex poisoned");
            (catalog.allocate_id(), catalog.allocate_id())
        };

        let mut job = BackupJob::for_restore(job_id, restore_id);
        let restore = Restore {
            id: restore_id,
            snapshot_id: self.snapshot.id,
            server: self.server.name.clone(),
            database_name: self.schema.clone(),
            method: self.method,
            actor: self.actor.clone(),
            job_id,
            started_at: self.clock.now(),
        };

        job.log(
            LogLevel::Info,
            format!(
                "Starting restore of snapshot {} into {}/{}",
                self.snapshot.id, self.server.name, self.schema
            ),
        );
        job.mark_running();

        let archive_path = self.working_dir.join(format!(
            "restore-{restore_id}.{}.{}",
            dump_extension(self.snapshot.database_type),
            self.snapshot.compression_type.extension(),
        ));
        let result = self.execute(driver, &mut job, &archive_path);

        // Always clear the downloaded archive, the decompressed dump and any
        // 7z extraction directory.
        let mut extracted = archive_path.clone().into_os_string();
        extracted.push(".extracted");
        remove_temp_files(&[
            archive_path.clone(),
            archive_path.with_extension(""),
            PathBuf::from(extracted),
        ]);

        match &result {
            Ok(()) => {
                job.log(LogLevel::Info, "Restore completed");
                job.mark_completed();
            }
            Err(e) => {
                job.log_with_context(
                    LogLevel::Error,
                    format!("Restore failed: {e}"),
                    json!({ "trace": format!("{e:?}") }),
                );
                job.mark_failed(e.to_string(), format!("{e:?}"));
                self.notifier.notify(&Event::RestoreFailed {
                    server: self.server.name.clone(),
                    database: self.schema.clone(),
                    error: e.to_string(),
                });
            }
        }

        let mut catalog = catalog.lock().expect("catalog mutex poisoned");
        catalog.jobs.push(job);
        catalog.restores.push(restore);

        result.map(|()| restore_id)
    }

    fn execute(
        &self,
        driver: &dyn DatabaseDriver,
        job: &mut BackupJob,
        archive_path: &Path,
    ) -> Result<(), RestoreTaskError> {
        fs::create_dir_all(self.working_dir).map_err(RestoreTaskError::Workspace)?;

        job.log(LogLevel::Info, format!("Downloading artifact {}", self.snapshot.path));
        let mut stream = self
            .volume
            .read_stream(&self.snapshot.path)
            .map_err(RestoreTaskError::Download)?;
        let mut file = File::create(archive_path).map_err(RestoreTaskError::Download)?;
        io::copy(&mut stream, &mut file).map_err(RestoreTaskError::Download)?;
        drop(file);

        let config = CompressionConfig {
            kind: self.snapshot.compression_type,
            level: self.compression.level,
            passphrase: self.compression.passphrase.clone(),
        };
        let compressor = compress::compressor_for(&config)?;
        job.log(LogLevel::Info, format!("Decompressing {} artifact", config.kind));
        let dump_path = compressor.decompress(archive_path, job)?;

        job.log(LogLevel::Info, format!("Preparing target schema {}", self.schema));
        driver.prepare_for_restore(&self.schema, job)?;

        job.log(LogLevel::Info, "Loading dump into the target database");
        match driver.restore(&dump_path)? {
            OperationResult::Command(cmd) => {
                exec::run(&cmd, job)?;
            }
            OperationResult::Performed { message } => job.log(LogLevel::Info, message),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Method;
    use crate::compress::CompressionKind;
    use crate::drivers::SqliteDriver;
    use crate::notify::LogNotifier;
    use crate::util::clock::SystemClock;
    use crate::volume::LocalVolume;
    use chrono::{TimeZone, Utc};

    fn snapshot(engine: EngineKind, path: &str) -> Snapshot {
        Snapshot {
            id: 42,
            server: "prod".into(),
            database_name: "app".into(),
            database_type: engine,
            compression_type: CompressionKind::Gzip,
            method: Method::Manual,
            job_id: 41,
            path: path.into(),
            file_size: 1,
            checksum: Some("ab".into()),
            started_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap(),
            file_exists: None,
            file_verified_at: None,
        }
    }

    fn target(engine: EngineKind, file: Option<std::path::PathBuf>) -> ServerConfig {
        ServerConfig {
            name: "target".into(),
            engine,
            host: None,
            port: None,
            username: None,
            password: None,
            file_path: file,
            databases: vec![],
            tunnel: None,
            retention: None,
        }
    }

    #[test]
    fn engine_mismatch_is_rejected_before_any_record_exists() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("t.sqlite");
        std::fs::write(&db, b"x").unwrap();

        let snapshot = snapshot(EngineKind::MySql, "prod-app.sql.gz");
        let server = target(EngineKind::Sqlite, Some(db.clone()));
        let volume = LocalVolume::new(dir.path());
        let compression = CompressionConfig::default();
        let catalog = Mutex::new(Catalog::default());

        let task = RestoreTask {
            server: &server,
            snapshot: &snapshot,
            schema: "app".into(),
            volume: &volume,
            compression: &compression,
            working_dir: dir.path(),
            method: Method::Manual,
            actor: None,
            clock: &SystemClock,
            notifier: &LogNotifier,
        };

        let driver = SqliteDriver::new(db);
        let err = task.run(&catalog, &driver).unwrap_err();
        assert!(matches!(err, RestoreTaskError::EngineMismatch { .. }));

        let catalog = catalog.lock().unwrap();
        assert!(catalog.jobs.is_empty());
        assert!(catalog.restores.is_empty());
    }

    #[test]
    fn snapshot_without_artifact_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("t.sqlite");
        std::fs::write(&db, b"x").unwrap();

        let snapshot = snapshot(EngineKind::Sqlite, "");
        let server = target(EngineKind::Sqlite, Some(db.clone()));
        let volume = LocalVolume::new(dir.path());
        let compression = CompressionConfig::default();
        let catalog = Mutex::new(Catalog::default());

        let task = RestoreTask {
            server: &server,
            snapshot: &snapshot,
            schema: "app".into(),
            volume: &volume,
            compression: &compression,
            working_dir: dir.path(),
            method: Method::Manual,
            actor: None,
            clock: &SystemClock,
            notifier: &LogNotifier,
        };

        let driver = SqliteDriver::new(db);
        let err = task.run(&catalog, &driver).unwrap_err();
        assert!(matches!(err, RestoreTaskError::MissingArtifact(42)));
        assert!(catalog.lock().unwrap().jobs.is_empty());
    }
}
