//! The job ledger: execution record and state machine shared by backup and
//! restore pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a [BackupJob].
///
/// Transitions are at-most-once: pending → running → completed | failed.
/// A finished job is never resurrected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Severity of a message log entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// One entry of the append-only job log.
///
/// The log mixes free-form progress messages with records of executed shell
/// commands; the tag keeps rendering exhaustive at compile time.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Message {
        level: LogLevel,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
        at: DateTime<Utc>,
    },
    Command {
        /// Sanitized command line; secrets are already masked.
        command: String,
        /// Combined stdout/stderr of the process.
        output: String,
        exit_code: i32,
        at: DateTime<Utc>,
    },
}

/// Execution record of exactly one snapshot or one restore.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: u64,
    pub snapshot_id: Option<u64>,
    pub restore_id: Option<u64>,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    error_trace: Option<String>,
    logs: Vec<LogEntry>,
}

impl BackupJob {
    pub fn for_snapshot(id: u64, snapshot_id: u64) -> Self {
        Self::new(id, Some(snapshot_id), None)
    }

    pub fn for_restore(id: u64, restore_id: u64) -> Self {
        Self::new(id, None, Some(restore_id))
    }

    fn new(id: u64, snapshot_id: Option<u64>, restore_id: Option<u64>) -> Self {
        debug_assert!(
            snapshot_id.is_some() ^ restore_id.is_some(),
            "a job drives exactly one snapshot or one restore"
        );

        Self {
            id,
            snapshot_id,
            restore_id,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            error_trace: None,
            logs: Vec::new(),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Human-readable single-line failure summary.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Full diagnostic rendering of the failure, kept out of UI summaries.
    pub fn error_trace(&self) -> Option<&str> {
        self.error_trace.as_deref()
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn log(&mut self, level: LogLevel, text: impl Into<String>) {
        self.push_message(level, text.into(), None);
    }

    pub fn log_with_context(
        &mut self,
        level: LogLevel,
        text: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.push_message(level, text.into(), Some(context));
    }

    fn push_message(&mut self, level: LogLevel, text: String, context: Option<serde_json::Value>) {
        log::debug!(target: "job", "[job {}] {text}", self.id);
        self.logs.push(LogEntry::Message { level, text, context, at: Utc::now() });
    }

    /// Records one executed command with its combined output and exit code.
    pub fn log_command(&mut self, command: String, output: String, exit_code: i32) {
        self.logs.push(LogEntry::Command { command, output, exit_code, at: Utc::now() });
    }

    pub fn mark_running(&mut self) {
        if self.status != JobStatus::Pending {
            log::warn!(target: "job", "Job {} cannot start from {:?}", self.id, self.status);
            return;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        if self.status != JobStatus::Running {
            log::warn!(target: "job", "Job {} cannot complete from {:?}", self.id, self.status);
            return;
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, trace: impl Into<String>) {
        if !matches!(self.status, JobStatus::Pending | JobStatus::Running) {
            log::warn!(target: "job", "Job {} cannot fail from {:?}", self.id, self.status);
            return;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(message.into());
        self.error_trace = Some(trace.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut job = BackupJob::for_snapshot(1, 10);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.snapshot_id, Some(10));
        assert_eq!(job.restore_id, None);

        job.mark_running();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.started_at().is_some());

        job.mark_completed();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.completed_at().is_some());
    }

    #[test]
    fn failed_job_is_never_resurrected() {
        let mut job = BackupJob::for_restore(1, 5);
        job.mark_running();
        job.mark_failed("boom", "trace");
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error_message(), Some("boom"));

        job.mark_completed();
        job.mark_running();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error_message(), Some("boom"));
    }

    #[test]
    fn completing_a_pending_job_is_a_noop() {
        let mut job = BackupJob::for_snapshot(1, 2);
        job.mark_completed();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.completed_at().is_none());
    }

    #[test]
    fn log_entries_keep_insertion_order() {
        let mut job = BackupJob::for_snapshot(1, 2);
        job.log(LogLevel::Info, "first");
        job.log_command("echo hi".into(), "hi\n".into(), 0);
        job.log_with_context(LogLevel::Error, "third", serde_json::json!({"n": 3}));

        assert_eq!(job.logs().len(), 3);
        assert!(matches!(job.logs()[0], LogEntry::Message { .. }));
        assert!(matches!(job.logs()[1], LogEntry::Command { exit_code: 0, .. }));
        assert!(matches!(job.logs()[2], LogEntry::Message { context: Some(_), .. }));
    }

    #[test]
    fn log_entries_round_trip_through_serde() {
        let mut job = BackupJob::for_snapshot(1, 2);
        job.log(LogLevel::Info, "dumping");
        job.log_command("mysqldump --password=***".into(), "".into(), 0);

        let json = serde_json::to_string(&job).unwrap();
        let back: BackupJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.logs().len(), 2);
        assert!(matches!(&back.logs()[1], LogEntry::Command { command, .. } if command.contains("***")));
    }
}
