//! Per-engine database adapters.
//!
//! Every engine implements the same capability contract — dump, restore,
//! prepare-for-restore, list-databases, test-connection — behind one trait,
//! selected by the [EngineKind] tag. Implementations differ wildly: most
//! engines drive external CLI tooling, SQLite copies bytes, Redis is
//! backup-only.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::config::{Endpoint, ServerConfig};
use crate::exec::{CommandLine, ExecError};
use crate::job::BackupJob;

mod mongo;
mod mysql;
mod postgres;
mod redis;
mod sqlite;

pub use mongo::MongoDriver;
pub use mysql::MySqlDriver;
pub use postgres::PostgresDriver;
pub use redis::RedisDriver;
pub use sqlite::SqliteDriver;

/// Bound on connection probes; dump/restore subprocesses are deliberately
/// unbounded.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported database engines.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[display("mysql")]
    MySql,
    #[display("mariadb")]
    MariaDb,
    #[display("postgresql")]
    PostgreSql,
    #[display("sqlite")]
    Sqlite,
    #[display("redis")]
    Redis,
    #[display("mongodb")]
    MongoDb,
}

impl EngineKind {
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::MySql | Self::MariaDb => Some(3306),
            Self::PostgreSql => Some(5432),
            Self::Redis => Some(6379),
            Self::MongoDb => Some(27017),
            Self::Sqlite => None,
        }
    }
}

/// What a driver wants done for a dump/restore step.
///
/// Either a command line for the shell executor, or a record of work the
/// driver performed directly (engines that need no subprocess).
#[derive(Debug)]
pub enum OperationResult {
    Command(CommandLine),
    Performed { message: String },
}

/// Outcome of a connectivity probe.
///
/// Timeouts and explicit refusals are distinct because scheduling and cleanup
/// paths word their user-facing messages differently for the two.
#[derive(Debug)]
pub enum ConnectionProbe {
    Success { latency: Duration, server_info: String },
    TimedOut { after: Duration },
    Failed { message: String },
}

impl ConnectionProbe {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl std::fmt::Display for ConnectionProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success { latency, server_info } => {
                write!(f, "ok ({:?}): {server_info}", latency)
            }
            Self::TimedOut { after } => {
                write!(f, "timed out after {:?} (server unreachable)", after)
            }
            Self::Failed { message } => write!(f, "connection failed: {message}"),
        }
    }
}

#[derive(Debug, Display, Error, From)]
pub enum DriverError {
    /// Engine cannot perform the operation at all (Redis restore).
    #[display("{engine} does not support {operation}")]
    Unsupported { engine: EngineKind, operation: &'static str },

    #[display("server has no database file configured")]
    MissingFilePath,

    #[display("database io error: {_0}")]
    #[from]
    Io(io::Error),

    #[display("{_0}")]
    #[from]
    Exec(ExecError),
}

/// The per-engine capability contract.
pub trait DatabaseDriver: Send + std::fmt::Debug {
    /// Plans (or performs) a dump of the driver's database into `output`.
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError>;

    /// Plans (or performs) loading the dump at `input` into the database.
    fn restore(&self, input: &Path) -> Result<OperationResult, DriverError>;

    /// Puts the target schema into a state the restore command can load into
    /// (drop + recreate where the engine needs it). Runs its commands itself,
    /// logging to `job`.
    fn prepare_for_restore(&self, schema: &str, job: &mut BackupJob) -> Result<(), DriverError>;

    /// Logical databases visible on the server, minus engine system schemas.
    fn list_databases(&self) -> Result<Vec<String>, DriverError>;

    fn test_connection(&self) -> ConnectionProbe;
}

/// Builds the driver for `server` bound to one logical `database`.
///
/// `restore_from` names the source database of a restore when it differs from
/// the target (MongoDB needs it for namespace remapping).
pub fn driver_for(
    server: &ServerConfig,
    endpoint: &Endpoint,
    database: &str,
    restore_from: Option<&str>,
) -> Result<Box<dyn DatabaseDriver>, DriverError> {
    match server.engine {
        EngineKind::MySql | EngineKind::MariaDb => Ok(Box::new(MySqlDriver::new(
            endpoint.clone(),
            server.username.clone(),
            server.password.clone(),
            database.to_string(),
            server.engine == EngineKind::MariaDb,
        ))),
        EngineKind::PostgreSql => Ok(Box::new(PostgresDriver::new(
            endpoint.clone(),
            server.username.clone(),
            server.password.clone(),
            database.to_string(),
        ))),
        EngineKind::Sqlite => {
            let path = server.file_path.clone().ok_or(DriverError::MissingFilePath)?;
            Ok(Box::new(SqliteDriver::new(path)))
        }
        EngineKind::Redis => Ok(Box::new(RedisDriver::new(
            endpoint.clone(),
            server.password.clone(),
        ))),
        EngineKind::MongoDb => Ok(Box::new(MongoDriver::new(
            endpoint.clone(),
            server.username.clone(),
            server.password.clone(),
            database.to_string(),
            restore_from.map(str::to_string),
        ))),
    }
}

/// TCP-level connectivity probe shared by the networked engines.
pub(crate) fn probe_tcp(endpoint: &Endpoint, engine: EngineKind) -> ConnectionProbe {
    let target = format!("{}:{}", endpoint.host, endpoint.port);
    let start = Instant::now();

    let addr = match target.to_socket_addrs().map(|mut it| it.next()) {
        Ok(Some(addr)) => addr,
        Ok(None) => return ConnectionProbe::Failed { message: format!("{target} does not resolve") },
        Err(e) => return ConnectionProbe::Failed { message: e.to_string() },
    };

    match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
        Ok(_) => ConnectionProbe::Success {
            latency: start.elapsed(),
            server_info: format!("{engine} at {target}"),
        },
        Err(e) if e.kind() == io::ErrorKind::TimedOut => {
            ConnectionProbe::TimedOut { after: CONNECT_TIMEOUT }
        }
        Err(e) => ConnectionProbe::Failed { message: e.to_string() },
    }
}
