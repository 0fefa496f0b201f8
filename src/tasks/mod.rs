//! Orchestration of backup and restore pipeline runs.
//!
//! Each run is one sequential thread of execution; the caller may run many
//! pipelines concurrently (one per database). Temp files are keyed by the
//! owning snapshot/restore id, so concurrent runs never collide.

use std::fs;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::drivers::EngineKind;

pub mod backup;
pub mod restore;

pub use backup::{BackupTask, BackupTaskError};
pub use restore::{RestoreTask, RestoreTaskError};

/// Deterministic artifact name: server and database with every run of
/// non-alphanumeric characters replaced by `-`, then the start timestamp.
///
/// `("Prod", "app", 2024-01-15 10:00:00, "sql", "gz")` becomes
/// `Prod-app-2024-01-15-100000.sql.gz`.
pub fn artifact_name(
    server: &str,
    database: &str,
    at: DateTime<Utc>,
    dump_ext: &str,
    compress_ext: &str,
) -> String {
    let unsafe_chars = Regex::new(r"[^A-Za-z0-9]+").unwrap();
    let server = unsafe_chars.replace_all(server, "-");
    let database = unsafe_chars.replace_all(database, "-");
    let stamp = at.format("%Y-%m-%d-%H%M%S");
    format!("{server}-{database}-{stamp}.{dump_ext}.{compress_ext}")
}

/// Extension of the raw (uncompressed) dump for `engine`.
pub(crate) fn dump_extension(engine: EngineKind) -> &'static str {
    match engine {
        EngineKind::Sqlite => "db",
        _ => "sql",
    }
}

/// Streaming hex sha-256.
pub(crate) fn sha256_hex(reader: &mut dyn Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Best-effort removal of pipeline temp files; failures are logged, never
/// raised, so cleanup cannot mask the real pipeline outcome.
pub(crate) fn remove_temp_files<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        if path.is_file() {
            if let Err(e) = fs::remove_file(path) {
                log::warn!(target: "tasks", "Removing temp file {} failed: {e}", path.display());
            }
        } else if path.is_dir() {
            if let Err(e) = fs::remove_dir_all(path) {
                log::warn!(target: "tasks", "Removing temp dir {} failed: {e}", path.display());
            }
        }
    }
}
