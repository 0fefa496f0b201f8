//! Artifact verification sweeps.
//!
//! Walks every snapshot whose backup completed and checks that its artifact
//! is still present on the volume. A snapshot that goes missing raises one
//! notification; once recorded as missing it is not reported again until it
//! reappears.

use crate::catalog::Catalog;
use crate::notify::{Event, Notifier};
use crate::util::clock::Clock;
use crate::volume::Filesystem;

pub struct VerificationEngine<'a> {
    pub volume: &'a dyn Filesystem,
    pub clock: &'a dyn Clock,
    pub notifier: &'a dyn Notifier,
}

impl VerificationEngine<'_> {
    /// Sweeps the catalog and returns how many snapshots were checked.
    pub fn sweep(&self, catalog: &mut Catalog) -> usize {
        let now = self.clock.now();
        let completed_jobs: std::collections::HashSet<u64> = catalog
            .jobs
            .iter()
            .filter(|j| j.status() == crate::job::JobStatus::Completed)
            .map(|j| j.id)
            .collect();

        let mut checked = 0;
        let mut newly_missing: Vec<String> = Vec::new();

        for snapshot in &mut catalog.snapshots {
            if snapshot.path.is_empty() || !completed_jobs.contains(&snapshot.job_id) {
                continue;
            }
            checked += 1;

            match self.volume.file_exists(&snapshot.path) {
                Ok(true) => {
                    if snapshot.file_exists == Some(false) {
                        log::info!(
                            target: "verify",
                            "Artifact {} of snapshot {} reappeared",
                            snapshot.path,
                            snapshot.id
                        );
                    }
                    snapshot.file_exists = Some(true);
                    snapshot.file_verified_at = Some(now);
                }
                Ok(false) => {
                    if snapshot.file_exists != Some(false) {
                        log::warn!(
                            target: "verify",
                            "Artifact {} of snapshot {} is missing",
                            snapshot.path,
                            snapshot.id
                        );
                        newly_missing.push(snapshot.path.clone());
                    }
                    snapshot.file_exists = Some(false);
                    snapshot.file_verified_at = Some(now);
                }
                Err(e) => {
                    // Inconclusive: record the attempt, keep the last verdict.
                    log::warn!(
                        target: "verify",
                        "Could not verify artifact {} of snapshot {}: {e}",
                        snapshot.path,
                        snapshot.id
                    );
                    snapshot.file_verified_at = Some(now);
                }
            }
        }

        if !newly_missing.is_empty() {
            self.notifier.notify(&Event::SnapshotsMissing {
                count: newly_missing.len(),
                artifacts: newly_missing,
            });
        }

        checked
    }
}
