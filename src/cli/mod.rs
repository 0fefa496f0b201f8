use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::catalog::Method;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Path of the configuration file.
    #[arg(long, env = "SNAPVAULT_CONFIG", default_value = "snapvault.toml")]
    pub config: PathBuf,

    /// Path of the snapshot catalog.
    #[arg(long, env = "SNAPVAULT_CATALOG", default_value = "snapvault-catalog.json")]
    pub catalog: PathBuf,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Back up the configured servers.
    Backup {
        /// Only back up this server; all servers when omitted.
        #[arg(long)]
        server: Option<String>,

        /// How this run is recorded in the catalog.
        #[arg(long, value_enum, default_value_t = Method::Manual)]
        method: Method,
    },

    /// Load a snapshot into a target server.
    Restore {
        /// Snapshot id to restore.
        snapshot: u64,

        /// Target server name.
        #[arg(long)]
        server: String,

        /// Destination schema; the snapshot's own database name when omitted.
        #[arg(long)]
        database: Option<String>,

        /// Recorded initiator of the restore.
        #[arg(long)]
        actor: Option<String>,
    },

    /// Apply retention policies and delete expired snapshots.
    Cleanup {
        /// Report what would be deleted without deleting it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Check that the artifacts of completed snapshots still exist.
    Verify,

    /// Delete one snapshot and its artifact.
    Delete {
        /// Snapshot id to delete.
        snapshot: u64,
    },

    /// List the logical databases visible on a server.
    ListDatabases {
        /// Server name.
        server: String,
    },

    /// Probe connectivity of a server.
    TestConnection {
        /// Server name.
        server: String,
    },
}
