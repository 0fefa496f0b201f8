//! Persisted snapshot/job/restore records.
//!
//! The catalog is the minimal record store the pipelines need: flat vectors
//! with monotonic ids, serialized as JSON next to the config file. It is not
//! an ORM and does not try to be one.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::compress::CompressionKind;
use crate::drivers::EngineKind;
use crate::job::{BackupJob, JobStatus};

/// How a pipeline run was triggered.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[display("manual")]
    Manual,
    #[display("scheduled")]
    Scheduled,
}

/// One attempted or completed backup artifact for one logical database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: u64,
    /// Owning server; doubles as the retention-policy key.
    pub server: String,
    pub database_name: String,
    pub database_type: EngineKind,
    pub compression_type: CompressionKind,
    pub method: Method,
    pub job_id: u64,

    /// Final artifact location on the volume; empty until transfer completes.
    pub path: String,
    pub file_size: u64,
    /// Hex sha-256 of the artifact, set only on success.
    pub checksum: Option<String>,
    pub started_at: DateTime<Utc>,

    /// Maintained by the verification engine.
    pub file_exists: Option<bool>,
    pub file_verified_at: Option<DateTime<Utc>>,
}

/// One restore of a snapshot into a target server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Restore {
    pub id: u64,
    pub snapshot_id: u64,
    /// Target server name.
    pub server: String,
    /// Destination schema name on the target.
    pub database_name: String,
    pub method: Method,
    pub actor: Option<String>,
    pub job_id: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    next_id: u64,
    pub snapshots: Vec<Snapshot>,
    pub jobs: Vec<BackupJob>,
    pub restores: Vec<Restore>,
}

#[derive(Debug, Display, Error, From)]
pub enum CatalogError {
    #[display("catalog io error: {_0}")]
    Io(io::Error),
    #[display("catalog is not valid JSON: {_0}")]
    Json(serde_json::Error),
}

impl Catalog {
    /// Loads the catalog; a missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        match fs::read(path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(CatalogError::Io(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let raw = serde_json::to_vec_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn snapshot(&self, id: u64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    pub fn snapshot_mut(&mut self, id: u64) -> Option<&mut Snapshot> {
        self.snapshots.iter_mut().find(|s| s.id == id)
    }

    pub fn job(&self, id: u64) -> Option<&BackupJob> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn restore(&self, id: u64) -> Option<&Restore> {
        self.restores.iter().find(|r| r.id == id)
    }

    /// Whether the snapshot's driving job finished successfully.
    pub fn snapshot_completed(&self, snapshot: &Snapshot) -> bool {
        self.job(snapshot.job_id)
            .is_some_and(|job| job.status() == JobStatus::Completed)
    }

    /// Completed snapshots belonging to `server`.
    pub fn completed_snapshots_for(&self, server: &str) -> Vec<&Snapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.server == server && self.snapshot_completed(s))
            .collect()
    }

    /// Removes the snapshot record and its job. The volume artifact is the
    /// caller's concern.
    pub fn remove_snapshot(&mut self, id: u64) {
        if let Some(snapshot) = self.snapshot(id) {
            let job_id = snapshot.job_id;
            self.jobs.retain(|j| j.id != job_id);
        }
        self.snapshots.retain(|s| s.id != id);
    }
}
