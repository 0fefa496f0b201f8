//! Fire-and-forget notification dispatch.
//!
//! Consumed by the orchestrator failure paths (one event per failed run) and
//! by the verification engine (one aggregated event per sweep). Delivery
//! channels (mail, chat webhooks, ...) are implemented elsewhere; the crate
//! ships a logger-backed dispatcher.

use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    BackupFailed { server: String, database: String, error: String },
    RestoreFailed { server: String, database: String, error: String },
    /// Aggregated result of one verification sweep: artifacts that were
    /// present on the previous sweep and are gone now.
    SnapshotsMissing { count: usize, artifacts: Vec<String> },
}

/// Notification sink. Implementations must never fail the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Dispatcher that writes events to the application log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => log::warn!(target: "notify", "{json}"),
            Err(e) => log::warn!(target: "notify", "Unserializable event: {e}"),
        }
    }
}
