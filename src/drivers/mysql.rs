//! MySQL / MariaDB adapter.
//!
//! Dump and restore go through the engine's own client tooling; the MariaDB
//! flavor swaps binary names (`mariadb-dump`/`mariadb`) but is otherwise
//! identical.

use std::path::Path;

use crate::config::Endpoint;
use crate::exec::{self, CommandLine};
use crate::job::{BackupJob, LogLevel};

use super::{
    probe_tcp, ConnectionProbe, DatabaseDriver, DriverError, EngineKind, OperationResult,
};

/// Schemas that are never user data.
const EXCLUDED_DATABASES: [&str; 4] =
    ["information_schema", "performance_schema", "mysql", "sys"];

/// Dump flags this tool always sets: consistent reads, restorable output,
/// binary-safe blobs.
const DUMP_FLAGS: [&str; 6] = [
    "--single-transaction",
    "--routines",
    "--add-drop-table",
    "--complete-insert",
    "--hex-blob",
    "--quote-names",
];

#[derive(Debug)]
pub struct MySqlDriver {
    endpoint: Endpoint,
    username: Option<String>,
    password: Option<String>,
    database: String,
    mariadb: bool,
}

impl MySqlDriver {
    pub fn new(
        endpoint: Endpoint,
        username: Option<String>,
        password: Option<String>,
        database: String,
        mariadb: bool,
    ) -> Self {
        Self { endpoint, username, password, database, mariadb }
    }

    fn engine(&self) -> EngineKind {
        if self.mariadb {
            EngineKind::MariaDb
        } else {
            EngineKind::MySql
        }
    }

    fn dump_binary(&self) -> &'static str {
        if self.mariadb {
            "mariadb-dump"
        } else {
            "mysqldump"
        }
    }

    fn client_binary(&self) -> &'static str {
        if self.mariadb {
            "mariadb"
        } else {
            "mysql"
        }
    }

    fn connection_args(&self, mut cmd: CommandLine) -> CommandLine {
        cmd = cmd
            .arg(format!("--host={}", self.endpoint.host))
            .arg(format!("--port={}", self.endpoint.port));
        if let Some(user) = &self.username {
            cmd = cmd.arg(format!("--user={user}"));
        }
        if let Some(password) = &self.password {
            cmd = cmd.secret_flag("--password=", password);
        }
        cmd
    }

    /// A client invocation running one statement batch.
    fn client_command(&self, database: Option<&str>, statement: &str) -> CommandLine {
        let mut cmd = self.connection_args(CommandLine::new(self.client_binary()));
        if let Some(db) = database {
            cmd = cmd.arg(db);
        }
        cmd.arg("-e").arg(statement)
    }
}

/// Escapes a schema name for use inside backquotes.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

impl DatabaseDriver for MySqlDriver {
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new(self.dump_binary()).args(DUMP_FLAGS))
            .arg(&self.database)
            .arg(format!("--result-file={}", output.display()));
        Ok(OperationResult::Command(cmd))
    }

    fn restore(&self, input: &Path) -> Result<OperationResult, DriverError> {
        // `source` runs inside the client so the dump streams from disk
        // instead of travelling through an argv.
        let statement = format!("source {}", input.display());
        Ok(OperationResult::Command(self.client_command(Some(&self.database), &statement)))
    }

    fn prepare_for_restore(&self, schema: &str, job: &mut BackupJob) -> Result<(), DriverError> {
        job.log(LogLevel::Info, format!("Recreating schema {schema}"));
        let ident = quote_ident(schema);
        let statement = format!(
            "DROP DATABASE IF EXISTS {ident}; \
             CREATE DATABASE {ident} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;"
        );
        exec::run(&self.client_command(None, &statement), job)?;
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new(self.client_binary()))
            .arg("--skip-column-names")
            .arg("-e")
            .arg("SHOW DATABASES");
        let output = exec::capture(&cmd)?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !EXCLUDED_DATABASES.contains(line))
            .map(str::to_string)
            .collect())
    }

    fn test_connection(&self) -> ConnectionProbe {
        probe_tcp(&self.endpoint, self.engine())
    }
}
