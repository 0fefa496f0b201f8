//! End-to-end pipeline runs against a real scratch directory and a local
//! volume, with SQLite standing in for the networked engines.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;

use snapvault_lib::catalog::{Catalog, Method};
use snapvault_lib::compress::CompressionConfig;
use snapvault_lib::drivers::{
    ConnectionProbe, DatabaseDriver, DriverError, EngineKind, OperationResult, SqliteDriver,
};
use snapvault_lib::exec::CommandLine;
use snapvault_lib::job::{BackupJob, JobStatus};
use snapvault_lib::notify::{Event, Notifier};
use snapvault_lib::tasks::backup::BackupTask;
use snapvault_lib::tasks::restore::RestoreTask;
use snapvault_lib::util::clock::FixedClock;
use snapvault_lib::volume::{Filesystem, LocalVolume};

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<String>>);

impl RecordingNotifier {
    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &Event) {
        self.0.lock().unwrap().push(serde_json::to_string(event).unwrap());
    }
}

fn sqlite_server(name: &str, file: &Path) -> snapvault_lib::config::ServerConfig {
    snapvault_lib::config::ServerConfig {
        name: name.into(),
        engine: EngineKind::Sqlite,
        host: None,
        port: None,
        username: None,
        password: None,
        file_path: Some(file.to_path_buf()),
        databases: vec!["app".into()],
        tunnel: None,
        retention: None,
    }
}

#[test]
fn sqlite_backup_produces_a_verifiable_gzip_artifact() {
    let data_dir = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let db_path = data_dir.path().join("app.db");
    fs::write(&db_path, b"not really sqlite, but bytes are bytes").unwrap();

    let server = sqlite_server("prod", &db_path);
    let volume = LocalVolume::new(store.path());
    let compression = CompressionConfig::default();
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    let notifier = RecordingNotifier::default();
    let catalog = Mutex::new(Catalog::default());

    let task = BackupTask {
        server: &server,
        database: "app".into(),
        volume: &volume,
        compression: &compression,
        working_dir: work.path(),
        method: Method::Scheduled,
        clock: &clock,
        notifier: &notifier,
    };
    let driver = SqliteDriver::new(db_path.clone());
    let snapshot_id = task.run(&catalog, &driver).unwrap();

    let catalog = catalog.into_inner().unwrap();
    let snapshot = catalog.snapshot(snapshot_id).unwrap();
    assert_eq!(snapshot.path, "prod-app-2024-01-15-100000.db.gz");
    assert!(snapshot.file_size > 0);
    assert_eq!(snapshot.file_size, volume.file_size(&snapshot.path).unwrap());
    assert_eq!(snapshot.checksum.as_ref().unwrap().len(), 64);

    let job = catalog.job(snapshot.job_id).unwrap();
    assert_eq!(job.status(), JobStatus::Completed);
    assert!(job.completed_at().is_some());

    // The artifact decompresses back to the original database bytes.
    let mut restored = Vec::new();
    GzDecoder::new(volume.read_stream(&snapshot.path).unwrap())
        .read_to_end(&mut restored)
        .unwrap();
    assert_eq!(restored, b"not really sqlite, but bytes are bytes");

    // The scratch directory is left clean.
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    assert!(notifier.events().is_empty());
}

#[derive(Debug)]
struct DeniedDumpDriver;

impl DatabaseDriver for DeniedDumpDriver {
    fn dump(&self, _output: &Path) -> Result<OperationResult, DriverError> {
        Ok(OperationResult::Command(
            CommandLine::new("sh")
                .arg("-c")
                .arg("echo 'Access denied for user' >&2; exit 1"),
        ))
    }

    fn restore(&self, _input: &Path) -> Result<OperationResult, DriverError> {
        unreachable!("not exercised")
    }

    fn prepare_for_restore(&self, _: &str, _: &mut BackupJob) -> Result<(), DriverError> {
        unreachable!("not exercised")
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        Ok(vec!["app".into()])
    }

    fn test_connection(&self) -> ConnectionProbe {
        ConnectionProbe::Failed { message: "stub".into() }
    }
}

#[test]
fn failed_dump_records_the_stderr_text_and_notifies() {
    let data_dir = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let db_path = data_dir.path().join("app.db");
    let server = sqlite_server("prod", &db_path);
    let volume = LocalVolume::new(store.path());
    let compression = CompressionConfig::default();
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    let notifier = RecordingNotifier::default();
    let catalog = Mutex::new(Catalog::default());

    let task = BackupTask {
        server: &server,
        database: "app".into(),
        volume: &volume,
        compression: &compression,
        working_dir: work.path(),
        method: Method::Scheduled,
        clock: &clock,
        notifier: &notifier,
    };
    let err = task.run(&catalog, &DeniedDumpDriver).unwrap_err();
    assert_eq!(err.to_string(), "Access denied for user");

    // The failure is still fully recorded.
    let catalog = catalog.into_inner().unwrap();
    assert_eq!(catalog.snapshots.len(), 1);
    let snapshot = &catalog.snapshots[0];
    assert!(snapshot.path.is_empty());
    assert!(snapshot.checksum.is_none());

    let job = catalog.job(snapshot.job_id).unwrap();
    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(job.error_message(), Some("Access denied for user"));
    assert!(job.completed_at().is_some());
    assert!(job.error_trace().is_some());

    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].contains("backup_failed"), "got {}", events[0]);
    assert!(events[0].contains("Access denied for user"));
}

#[test]
fn sqlite_snapshot_restores_into_another_server() {
    let data_dir = tempfile::tempdir().unwrap();
    let store = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let source_path = data_dir.path().join("source.db");
    fs::write(&source_path, b"payload-v1").unwrap();

    let volume = LocalVolume::new(store.path());
    let compression = CompressionConfig::default();
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap());
    let notifier = RecordingNotifier::default();
    let catalog = Mutex::new(Catalog::default());

    let source = sqlite_server("prod", &source_path);
    let backup = BackupTask {
        server: &source,
        database: "app".into(),
        volume: &volume,
        compression: &compression,
        working_dir: work.path(),
        method: Method::Scheduled,
        clock: &clock,
        notifier: &notifier,
    };
    let snapshot_id = backup.run(&catalog, &SqliteDriver::new(source_path)).unwrap();

    let target_path = data_dir.path().join("staging.db");
    let target = sqlite_server("staging", &target_path);
    let snapshot = catalog.lock().unwrap().snapshot(snapshot_id).unwrap().clone();

    let restore = RestoreTask {
        server: &target,
        snapshot: &snapshot,
        schema: "app".into(),
        volume: &volume,
        compression: &compression,
        working_dir: work.path(),
        method: Method::Manual,
        actor: Some("ops".into()),
        clock: &clock,
        notifier: &notifier,
    };
    let restore_id = restore
        .run(&catalog, &SqliteDriver::new(target_path.clone()))
        .unwrap();

    assert_eq!(fs::read(&target_path).unwrap(), b"payload-v1");

    let catalog = catalog.into_inner().unwrap();
    let record = catalog.restore(restore_id).unwrap();
    assert_eq!(record.snapshot_id, snapshot_id);
    assert_eq!(record.server, "staging");
    assert_eq!(record.actor.as_deref(), Some("ops"));
    assert_eq!(catalog.job(record.job_id).unwrap().status(), JobStatus::Completed);

    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    assert!(notifier.events().is_empty());
}
