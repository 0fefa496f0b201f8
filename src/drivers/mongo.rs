//! MongoDB adapter.
//!
//! Dump and restore use archive mode. Restoring remaps the namespace with
//! `--nsFrom`/`--nsTo`, so a snapshot of database `app` can land in `app_copy`
//! on a different server; `--drop` clears existing collections, which is why
//! `prepare_for_restore` has nothing to do.

use std::path::Path;

use crate::config::Endpoint;
use crate::exec::{self, CommandLine};
use crate::job::{BackupJob, LogLevel};

use super::{
    probe_tcp, ConnectionProbe, DatabaseDriver, DriverError, EngineKind, OperationResult,
};

const EXCLUDED_DATABASES: [&str; 3] = ["admin", "local", "config"];

#[derive(Debug)]
pub struct MongoDriver {
    endpoint: Endpoint,
    username: Option<String>,
    password: Option<String>,
    /// The database this driver is bound to (dump source / restore target).
    database: String,
    /// On restore: the database name recorded in the snapshot, when it
    /// differs from the target.
    restore_from: Option<String>,
}

impl MongoDriver {
    pub fn new(
        endpoint: Endpoint,
        username: Option<String>,
        password: Option<String>,
        database: String,
        restore_from: Option<String>,
    ) -> Self {
        Self { endpoint, username, password, database, restore_from }
    }

    fn connection_args(&self, mut cmd: CommandLine) -> CommandLine {
        cmd = cmd
            .arg("--host")
            .arg(&self.endpoint.host)
            .arg("--port")
            .arg(self.endpoint.port.to_string());
        if let Some(user) = &self.username {
            cmd = cmd
                .arg("--username")
                .arg(user)
                .arg("--authenticationDatabase")
                .arg("admin");
        }
        if let Some(password) = &self.password {
            cmd = cmd.arg("--password").secret_arg(password);
        }
        cmd
    }
}

impl DatabaseDriver for MongoDriver {
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new("mongodump"))
            .arg("--db")
            .arg(&self.database)
            .arg(format!("--archive={}", output.display()));
        Ok(OperationResult::Command(cmd))
    }

    fn restore(&self, input: &Path) -> Result<OperationResult, DriverError> {
        let source = self.restore_from.as_deref().unwrap_or(&self.database);
        let cmd = self
            .connection_args(CommandLine::new("mongorestore"))
            .arg(format!("--archive={}", input.display()))
            .arg(format!("--nsFrom={source}.*"))
            .arg(format!("--nsTo={}.*", self.database))
            .arg("--drop");
        Ok(OperationResult::Command(cmd))
    }

    fn prepare_for_restore(&self, _schema: &str, job: &mut BackupJob) -> Result<(), DriverError> {
        // --drop on the restore command replaces existing collections.
        job.log(LogLevel::Debug, "mongorestore --drop handles existing collections; nothing to prepare");
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new("mongosh"))
            .arg("--quiet")
            .arg("--eval")
            .arg("db.getMongo().getDBNames().join('\\n')");
        let output = exec::capture(&cmd)?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !EXCLUDED_DATABASES.contains(line))
            .map(str::to_string)
            .collect())
    }

    fn test_connection(&self) -> ConnectionProbe {
        probe_tcp(&self.endpoint, EngineKind::MongoDb)
    }
}
