//! Retention evaluation and snapshot deletion.
//!
//! Runs per backup policy, only ever touching snapshots whose job completed,
//! so it is safe to run alongside in-flight pipelines. Artifact deletion is
//! best-effort: one unreachable volume must never block cleanup of the rest
//! of the batch.

use std::collections::HashMap;

use chrono::Duration;

use crate::catalog::Catalog;
use crate::util::clock::Clock;
use crate::util::retention::{gfs_keep_set, RetentionPolicy};
use crate::volume::Filesystem;

pub struct CleanupEngine<'a> {
    pub volume: &'a dyn Filesystem,
    pub clock: &'a dyn Clock,
    /// Log "would delete" lines instead of deleting.
    pub dry_run: bool,
}

impl CleanupEngine<'_> {
    /// Applies `policy` to every completed snapshot of `server` and deletes
    /// whatever is not retained. Returns the ids that were (or, on dry-run,
    /// would have been) deleted.
    pub fn run(&self, catalog: &mut Catalog, server: &str, policy: &RetentionPolicy) -> Vec<u64> {
        match policy {
            RetentionPolicy::Forever => {
                log::debug!(target: "cleanup", "Policy for {server} keeps everything, skipping");
                Vec::new()
            }
            RetentionPolicy::Days { days } => self.run_days(catalog, server, *days),
            RetentionPolicy::Gfs { daily, weekly, monthly } => {
                if policy.is_empty_gfs() {
                    log::warn!(
                        target: "cleanup",
                        "GFS policy for {server} has no tiers configured, skipping"
                    );
                    return Vec::new();
                }
                self.run_gfs(
                    catalog,
                    server,
                    daily.unwrap_or(0),
                    weekly.unwrap_or(0),
                    monthly.unwrap_or(0),
                )
            }
        }
    }

    fn run_days(&self, catalog: &mut Catalog, server: &str, days: u32) -> Vec<u64> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let doomed: Vec<u64> = catalog
            .completed_snapshots_for(server)
            .into_iter()
            .filter(|s| s.started_at < cutoff)
            .map(|s| s.id)
            .collect();

        log::info!(
            target: "cleanup",
            "{server}: {} snapshot(s) older than {days} day(s)",
            doomed.len()
        );
        self.delete_batch(catalog, &doomed)
    }

    fn run_gfs(
        &self,
        catalog: &mut Catalog,
        server: &str,
        daily: u32,
        weekly: u32,
        monthly: u32,
    ) -> Vec<u64> {
        let now = self.clock.now();

        // Each logical database climbs its own GFS ladder.
        let mut partitions: HashMap<String, Vec<(u64, chrono::DateTime<chrono::Utc>)>> =
            HashMap::new();
        for snapshot in catalog.completed_snapshots_for(server) {
            partitions
                .entry(snapshot.database_name.clone())
                .or_default()
                .push((snapshot.id, snapshot.started_at));
        }

        let mut doomed = Vec::new();
        for (database, snapshots) in &partitions {
            let kept = gfs_keep_set(snapshots, daily, weekly, monthly, now);
            let expired: Vec<u64> = snapshots
                .iter()
                .map(|(id, _)| *id)
                .filter(|id| !kept.contains(id))
                .collect();
            log::info!(
                target: "cleanup",
                "{server}/{database}: keeping {} of {} snapshot(s)",
                kept.len(),
                snapshots.len()
            );
            doomed.extend(expired);
        }

        self.delete_batch(catalog, &doomed)
    }

    fn delete_batch(&self, catalog: &mut Catalog, ids: &[u64]) -> Vec<u64> {
        let mut deleted = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.dry_run {
                let path = catalog.snapshot(id).map(|s| s.path.clone()).unwrap_or_default();
                log::info!(target: "cleanup", "Would delete snapshot {id} ({path})");
                deleted.push(id);
                continue;
            }
            if delete_snapshot(catalog, self.volume, id) {
                deleted.push(id);
            }
        }
        deleted
    }
}

/// Deletes one snapshot: the volume artifact best-effort, then the metadata.
/// Artifact-deletion failure is logged and never blocks the metadata delete.
pub fn delete_snapshot(catalog: &mut Catalog, volume: &dyn Filesystem, id: u64) -> bool {
    let Some(snapshot) = catalog.snapshot(id) else {
        log::warn!(target: "cleanup", "Snapshot {id} does not exist");
        return false;
    };

    if !snapshot.path.is_empty() {
        if let Err(e) = volume.delete(&snapshot.path) {
            log::warn!(
                target: "cleanup",
                "Deleting artifact {} of snapshot {id} failed ({e}); removing metadata anyway",
                snapshot.path
            );
        }
    }

    catalog.remove_snapshot(id);
    log::info!(target: "cleanup", "Deleted snapshot {id}");
    true
}
