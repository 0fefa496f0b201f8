//! Redis adapter — backup only, by design.
//!
//! `redis-cli --rdb` pulls a point-in-time RDB snapshot over the replication
//! protocol. There is no sane inverse through a client connection (loading an
//! RDB requires server-side file access and a restart), so restore and
//! prepare fail with an explicit unsupported error.

use std::path::Path;

use crate::config::Endpoint;
use crate::exec::CommandLine;
use crate::job::BackupJob;

use super::{
    probe_tcp, ConnectionProbe, DatabaseDriver, DriverError, EngineKind, OperationResult,
};

/// Name under which the single RDB namespace is reported; Redis has no
/// enumerable logical databases worth distinguishing for backup purposes.
const RDB_DATABASE: &str = "redis";

#[derive(Debug)]
pub struct RedisDriver {
    endpoint: Endpoint,
    password: Option<String>,
}

impl RedisDriver {
    pub fn new(endpoint: Endpoint, password: Option<String>) -> Self {
        Self { endpoint, password }
    }

    fn connection_args(&self, mut cmd: CommandLine) -> CommandLine {
        cmd = cmd
            .arg("-h")
            .arg(&self.endpoint.host)
            .arg("-p")
            .arg(self.endpoint.port.to_string());
        if let Some(password) = &self.password {
            cmd = cmd.arg("--no-auth-warning").arg("-a").secret_arg(password);
        }
        cmd
    }
}

impl DatabaseDriver for RedisDriver {
    fn dump(&self, output: &Path) -> Result<OperationResult, DriverError> {
        let cmd = self
            .connection_args(CommandLine::new("redis-cli"))
            .arg("--rdb")
            .arg(output.display().to_string());
        Ok(OperationResult::Command(cmd))
    }

    fn restore(&self, _input: &Path) -> Result<OperationResult, DriverError> {
        Err(DriverError::Unsupported { engine: EngineKind::Redis, operation: "restore" })
    }

    fn prepare_for_restore(&self, _schema: &str, _job: &mut BackupJob) -> Result<(), DriverError> {
        Err(DriverError::Unsupported {
            engine: EngineKind::Redis,
            operation: "prepare for restore",
        })
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        Ok(vec![RDB_DATABASE.to_string()])
    }

    fn test_connection(&self) -> ConnectionProbe {
        probe_tcp(&self.endpoint, EngineKind::Redis)
    }
}
