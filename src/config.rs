//! Application configuration.
//!
//! Server and volume records are authored elsewhere (a UI, an ops repo); this
//! crate consumes them read-only for the duration of one operation. The TOML
//! file is seeded with a commented default when missing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::compress::CompressionConfig;
use crate::drivers::EngineKind;
use crate::util::retention::RetentionPolicy;
use crate::volume::{Filesystem, LocalVolume};

/// One configured database server. Immutable during a pipeline run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub engine: EngineKind,

    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,

    /// Path of the database file (SQLite only).
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Logical databases to back up; queried from the server when empty.
    #[serde(default)]
    pub databases: Vec<String>,

    /// Optional SSH-tunnel override: connect through this address instead of
    /// `host`/`port`. Tunnel establishment itself happens elsewhere.
    #[serde(default)]
    pub tunnel: Option<TunnelConfig>,

    /// Per-server retention; falls back to the global policy when unset.
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub host: String,
    pub port: u16,
}

/// Effective network address a driver connects through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Resolves a server config to the address its tunnel (if any) exposes.
pub trait TunnelResolver {
    fn resolve(&self, server: &ServerConfig) -> Endpoint;

    /// Releases any resources the resolver holds (open tunnels).
    fn close(&self) {}
}

/// Pass-through resolver: honors a static tunnel override, otherwise the
/// configured address with the engine's default port.
#[derive(Debug, Default)]
pub struct DirectResolver;

impl TunnelResolver for DirectResolver {
    fn resolve(&self, server: &ServerConfig) -> Endpoint {
        if let Some(tunnel) = &server.tunnel {
            return Endpoint { host: tunnel.host.clone(), port: tunnel.port };
        }
        Endpoint {
            host: server.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: server.port.or_else(|| server.engine.default_port()).unwrap_or(0),
        }
    }
}

/// Storage volume configuration; consumed only through [Filesystem].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VolumeConfig {
    Local { root: PathBuf },
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self::Local { root: PathBuf::from("backups") }
    }
}

impl VolumeConfig {
    pub fn filesystem(&self) -> Box<dyn Filesystem> {
        match self {
            Self::Local { root } => Box::new(LocalVolume::new(root.clone())),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub volume: VolumeConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    /// Global retention policy; servers may override it individually.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Scratch space for dumps during a pipeline run.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir().join("snapvault")
}

#[derive(Debug, Display, Error, From)]
pub enum ConfigError {
    #[display("reading the config file failed: {_0}")]
    Read(io::Error),
    #[display("parsing the config file failed: {_0}")]
    Parse(toml::de::Error),
}

impl AppConfig {
    /// Retention policy in effect for `server`.
    pub fn retention_for(&self, server: &ServerConfig) -> RetentionPolicy {
        server.retention.unwrap_or(self.retention)
    }

    /// Loads the config, seeding a default file when none exists yet.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Writing default config to {} because it doesn't exist yet", path.display());
                let default_config = Self::default();
                let raw = toml::to_string_pretty(&default_config)
                    .expect("default config should be serializable");
                if let Err(e) = fs::write(path, raw) {
                    log::warn!("Writing default config to {} failed: {e}", path.display());
                }
                Ok(default_config)
            }
            Err(e) => Err(ConfigError::Read(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_resolver_prefers_the_tunnel_override() {
        let mut server = ServerConfig {
            name: "prod".into(),
            engine: EngineKind::MySql,
            host: Some("db.internal".into()),
            port: Some(3306),
            username: None,
            password: None,
            file_path: None,
            databases: vec![],
            tunnel: None,
            retention: None,
        };

        let resolver = DirectResolver;
        assert_eq!(
            resolver.resolve(&server),
            Endpoint { host: "db.internal".into(), port: 3306 }
        );

        server.tunnel = Some(TunnelConfig { host: "127.0.0.1".into(), port: 13306 });
        assert_eq!(
            resolver.resolve(&server),
            Endpoint { host: "127.0.0.1".into(), port: 13306 }
        );
    }

    #[test]
    fn missing_port_falls_back_to_the_engine_default() {
        let server = ServerConfig {
            name: "pg".into(),
            engine: EngineKind::PostgreSql,
            host: Some("pg.internal".into()),
            port: None,
            username: None,
            password: None,
            file_path: None,
            databases: vec![],
            tunnel: None,
            retention: None,
        };
        assert_eq!(DirectResolver.resolve(&server).port, 5432);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AppConfig {
            servers: vec![ServerConfig {
                name: "prod".into(),
                engine: EngineKind::MariaDb,
                host: Some("db".into()),
                port: None,
                username: Some("backup".into()),
                password: Some("pw".into()),
                file_path: None,
                databases: vec!["app".into()],
                tunnel: None,
                retention: Some(RetentionPolicy::Days { days: 14 }),
            }],
            ..Default::default()
        };

        let raw = toml::to_string_pretty(&config).unwrap();
        let back: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back.servers.len(), 1);
        assert_eq!(back.servers[0].engine, EngineKind::MariaDb);
        assert!(matches!(
            back.retention_for(&back.servers[0]),
            RetentionPolicy::Days { days: 14 }
        ));
    }
}
