//! Structured subprocess invocation with credential masking.
//!
//! Commands are built as argv arrays, never as shell strings, so interpolated
//! values round-trip verbatim and no shell escaping is involved. Secrets are
//! tracked per argument/environment variable and masked both in the persisted
//! command line and in captured process output.

use std::io;
use std::process::Command;

use derive_more::{Display, Error};

use crate::job::{BackupJob, LogLevel};

const MASK: &str = "***";

#[derive(Clone, Debug)]
struct Arg {
    value: String,
    /// Sanitized rendering; `None` means the value itself is safe to show.
    display: Option<String>,
}

#[derive(Clone, Debug)]
struct EnvVar {
    name: String,
    value: String,
    secret: bool,
}

/// One external command: program, argv and environment, with secret tracking.
#[derive(Clone, Debug)]
pub struct CommandLine {
    program: String,
    args: Vec<Arg>,
    envs: Vec<EnvVar>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), envs: Vec::new() }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg { value: value.into(), display: None });
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for value in values {
            self = self.arg(value);
        }
        self
    }

    /// An argument whose value is fully masked in the sanitized line.
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg { value: value.into(), display: Some(MASK.to_string()) });
        self
    }

    /// A `--flag=secret` style argument: the flag stays visible, the value is
    /// masked.
    pub fn secret_flag(mut self, prefix: &str, secret: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: format!("{prefix}{}", secret.into()),
            display: Some(format!("{prefix}{MASK}")),
        });
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push(EnvVar { name: name.into(), value: value.into(), secret: false });
        self
    }

    /// An environment variable whose value never appears in logs (passwords
    /// handed to `PGPASSWORD` and friends).
    pub fn secret_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push(EnvVar { name: name.into(), value: value.into(), secret: true });
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The raw argument values, as handed to the process.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|a| a.value.as_str())
    }

    /// The command line with every secret replaced by `***`; this is the only
    /// form that may be persisted or logged.
    pub fn sanitized(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.envs.len() + self.args.len());
        for env in &self.envs {
            let value = if env.secret { MASK } else { env.value.as_str() };
            parts.push(format!("{}={value}", env.name));
        }
        parts.push(self.program.clone());
        for arg in &self.args {
            parts.push(arg.display.clone().unwrap_or_else(|| arg.value.clone()));
        }
        parts.join(" ")
    }

    fn secret_values(&self) -> Vec<&str> {
        let args = self.args.iter().filter(|a| a.display.is_some()).map(|a| a.value.as_str());
        let envs = self.envs.iter().filter(|e| e.secret).map(|e| e.value.as_str());
        args.chain(envs).collect()
    }

    /// Replaces every literal occurrence of a secret in `text` with `***`.
    fn scrub(&self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for secret in self.secret_values() {
            if !secret.is_empty() {
                scrubbed = scrubbed.replace(secret, MASK);
            }
        }
        scrubbed
    }
}

#[derive(Debug, Display, Error)]
pub enum ExecError {
    /// The process ran but exited non-zero. The message is the trimmed stderr
    /// so it can double as the job's `error_message`.
    #[display("{message}")]
    NonZeroExit { command: String, exit_code: i32, message: String },

    /// The process could not be started at all.
    #[display("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
}

/// Runs `cmd`, appending a command log entry to `job`, and returns the
/// combined (scrubbed) output. Non-zero exit is an error carrying the trimmed
/// stderr.
pub fn run(cmd: &CommandLine, job: &mut BackupJob) -> Result<String, ExecError> {
    let sanitized = cmd.sanitized();
    log::debug!(target: "exec", "Running: {sanitized}");

    let output = spawn(cmd).map_err(|e| {
        job.log(LogLevel::Error, e.to_string());
        e
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = cmd.scrub(&format!("{stdout}{stderr}"));
    let exit_code = output.status.code().unwrap_or(-1);

    job.log_command(sanitized.clone(), combined.clone(), exit_code);

    if output.status.success() {
        Ok(combined)
    } else {
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            format!("command `{}` exited with code {exit_code}", cmd.program())
        } else {
            cmd.scrub(trimmed)
        };
        Err(ExecError::NonZeroExit { command: sanitized, exit_code, message })
    }
}

/// Runs `cmd` without an owning job (connection probes, database listing).
pub fn capture(cmd: &CommandLine) -> Result<String, ExecError> {
    let sanitized = cmd.sanitized();
    log::debug!(target: "exec", "Running: {sanitized}");

    let output = spawn(cmd)?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if output.status.success() {
        Ok(cmd.scrub(&stdout))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            format!("command `{}` exited with code {exit_code}", cmd.program())
        } else {
            cmd.scrub(trimmed)
        };
        Err(ExecError::NonZeroExit { command: sanitized, exit_code, message })
    }
}

fn spawn(cmd: &CommandLine) -> Result<std::process::Output, ExecError> {
    let mut command = Command::new(&cmd.program);
    command.args(cmd.argv());
    for env in &cmd.envs {
        command.env(&env.name, &env.value);
    }
    command
        .output()
        .map_err(|source| ExecError::Spawn { program: cmd.program.clone(), source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, LogEntry};

    #[test]
    fn sanitized_masks_secret_args_and_envs() {
        let cmd = CommandLine::new("mysqldump")
            .arg("--host=db.example.com")
            .secret_flag("--password=", "s3cret")
            .secret_env("MYSQL_PWD", "s3cret")
            .arg("app");

        let line = cmd.sanitized();
        assert_eq!(line, "MYSQL_PWD=*** mysqldump --host=db.example.com --password=*** app");
        assert!(!line.contains("s3cret"));

        // The process itself still receives the real value.
        assert!(cmd.argv().any(|a| a == "--password=s3cret"));
    }

    #[test]
    fn run_logs_command_entry_with_exit_code() {
        let mut job = BackupJob::for_snapshot(1, 1);
        let cmd = CommandLine::new("sh").arg("-c").arg("echo out");
        let output = run(&cmd, &mut job).unwrap();
        assert_eq!(output.trim(), "out");

        match &job.logs()[0] {
            LogEntry::Command { command, output, exit_code, .. } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(output.trim(), "out");
                assert_eq!(*exit_code, 0);
            }
            other => panic!("expected command entry, got {other:?}"),
        }
    }

    #[test]
    fn non_zero_exit_carries_trimmed_stderr() {
        let mut job = BackupJob::for_snapshot(1, 1);
        let cmd = CommandLine::new("sh")
            .arg("-c")
            .arg("echo 'Access denied for user' >&2; exit 1");

        let err = run(&cmd, &mut job).unwrap_err();
        assert_eq!(err.to_string(), "Access denied for user");
        match err {
            ExecError::NonZeroExit { exit_code, .. } => assert_eq!(exit_code, 1),
            other => panic!("unexpected error: {other}"),
        }
        // The failed command is still on the job log.
        assert!(matches!(job.logs()[0], LogEntry::Command { exit_code: 1, .. }));
    }

    #[test]
    fn secrets_are_scrubbed_from_captured_output() {
        let mut job = BackupJob::for_snapshot(1, 1);
        let cmd = CommandLine::new("sh")
            .arg("-c")
            .arg("echo leaking hunter2 here")
            .secret_env("PGPASSWORD", "hunter2");

        let output = run(&cmd, &mut job).unwrap();
        assert_eq!(output.trim(), "leaking *** here");
        assert_eq!(job.status(), JobStatus::Pending); // exec never touches status
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let mut job = BackupJob::for_snapshot(1, 1);
        let cmd = CommandLine::new("definitely-not-a-real-binary-xyz");
        let err = run(&cmd, &mut job).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
        // Spawn failure leaves a message entry, not a command entry.
        assert!(matches!(job.logs()[0], LogEntry::Message { .. }));
    }
}
