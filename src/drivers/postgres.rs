//! PostgreSQL adapter.
//!
//! Passwords travel through `PGPASSWORD` rather than argv so they never show
//! up in a process listing. Preparing a restore target has to terminate other
//! backends first: Postgres refuses to drop a database with live connections.

use std::path::Path;

use crate::config::Endpoint;
use crate::exec::{self, CommandLine};
use crate::job::{BackupJob, LogLevel};

use super::{
    probe_tcp, ConnectionProbe, DatabaseDriver, DriverError, EngineKind, OperationResult,
};

/// System and cloud-vendor maintenance databases.
const EXCLUDED_DATABASES: [&str; 4] = ["postgres", "rdsadmin", "azure_maintenance", "azure_sys"];

const DUMP_FLAGS: [&str; 5] = [
    "--clean",
    "--if-exists",
    "--no-owner",
    "--no-privileges",
    "--quote-all-identifiers",
];

/// Database psql connects to for administrative statements.
const MAINTENANCE_DB: &str = "postgres";

#[derive(Debug)]
pub struct PostgresDriver {
    endpoint: Endpoint,
    username: Option<String>,
    password: Option<String>,
    database: String,
}

impl PostgresDriver {
    pub fn new(
        endpoint: Endpoint,
        username: Option<String>,
        password: Option<String>,
        database: String,
    ) -> Self {
        Self { endpoint, username, password, database }
    }

    fn connection_args(&self, mut cmd: CommandLine) -> CommandLine {
        cmd = cmd
            .arg(format!("--host={}", self.endpoint.host))
            .arg(format!("--port={}", self.endpoint.port));
        if let Some(user) = &self.username {
            cmd = cmd.arg(format!("--username={user}"));
        }
        if let Some(password) = &self.password {
            cmd = cmd.secret_env("PGPASSWORD", password);
        }
        cmd
    }

    /// One administrative statement against the maintenance database.
    fn admin_command(&self, statement: &str) -> CommandLine {
        self.connection_args(CommandLine::new("psql"))
            .arg(format!("--dbname={MAINTENANCE_DB}"))
            .arg("--tuples-only")
            .arg("--no-align")
            .arg("-c")
            .arg(statement)
    }
}

/// Escapes a name for use as a double-quoted identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escapes a value for use as a single-quoted string literal.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl DatabaseDriver for PostgresDriver {
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new("pg_dump").args(DUMP_FLAGS))
            .arg(format!("--dbname={}", self.database))
            .arg(format!("--file={}", output.display()));
        Ok(OperationResult::Command(cmd))
    }

    fn restore(&self, input: &Path) -> Result<OperationResult, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new("psql"))
            .arg(format!("--dbname={}", self.database))
            .arg("--file")
            .arg(input.display().to_string());
        Ok(OperationResult::Command(cmd))
    }

    fn prepare_for_restore(&self, schema: &str, job: &mut BackupJob) -> Result<(), DriverError> {
        let exists_sql =
            format!("SELECT 1 FROM pg_database WHERE datname = {}", quote_literal(schema));
        let exists = exec::run(&self.admin_command(&exists_sql), job)?.trim() == "1";

        if exists {
            job.log(
                LogLevel::Info,
                format!("Schema {schema} exists; terminating its backends before dropping it"),
            );
            let terminate_sql = format!(
                "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                 WHERE datname = {} AND pid <> pg_backend_pid()",
                quote_literal(schema)
            );
            exec::run(&self.admin_command(&terminate_sql), job)?;
        }

        exec::run(
            &self.admin_command(&format!("DROP DATABASE IF EXISTS {}", quote_ident(schema))),
            job,
        )?;
        exec::run(&self.admin_command(&format!("CREATE DATABASE {}", quote_ident(schema))), job)?;
        job.log(LogLevel::Info, format!("Recreated schema {schema}"));
        Ok(())
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let cmd = self.admin_command("SELECT datname FROM pg_database WHERE datistemplate = false");
        let output = exec::capture(&cmd)?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !EXCLUDED_DATABASES.contains(line))
            .map(str::to_string)
            .collect())
    }

    fn test_connection(&self) -> ConnectionProbe {
        probe_tcp(&self.endpoint, EngineKind::PostgreSql)
    }
}
