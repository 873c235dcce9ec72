//! Server configuration: TOML file + CLI overrides.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9000
//! room = "Lobby"
//! side_channels = 5
//! shutdown_grace_ms = 1000
//!
//! [heartbeat]
//! interval_secs = 25
//! max_misses = 2
//!
//! [storage]
//! files_dir = "./data/files"
//! staging_dir = "./data/tmp"
//!
//! [history]
//! capacity = 1000
//! replay_on_join = false
//!
//! [tls]
//! cert = "cert.pem"
//! key = "key.pem"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{error::ServerError, heartbeat::HeartbeatConfig};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub history: HistorySection,
    #[serde(default)]
    pub tls: TlsSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_room")]
    pub room: String,
    #[serde(default = "default_side_channels")]
    pub side_channels: u16,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            room: default_room(),
            side_channels: default_side_channels(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// `[heartbeat]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatSection {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_max_misses")]
    pub max_misses: u32,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
            max_misses: default_max_misses(),
        }
    }
}

/// `[storage]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_files_dir")]
    pub files_dir: PathBuf,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            files_dir: default_files_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

/// `[history]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HistorySection {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub replay_on_join: bool,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            replay_on_join: false,
        }
    }
}

/// `[tls]` section of the config TOML. Both paths or neither.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_room() -> String {
    "Lobby".to_string()
}
fn default_side_channels() -> u16 {
    5
}
fn default_shutdown_grace_ms() -> u64 {
    1000
}
fn default_heartbeat_interval() -> u64 {
    25
}
fn default_max_misses() -> u32 {
    2
}
fn default_files_dir() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data/tmp")
}
fn default_history_capacity() -> usize {
    1000
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub room: Option<String>,
    pub side_channels: Option<u16>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Certificate and key for the TLS transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// Control-channel port; side-channels listen on `port + 1 ..= port + side_channels`
    pub port: u16,
    pub room: String,
    pub side_channels: u16,
    pub heartbeat: HeartbeatConfig,
    pub history_capacity: usize,
    pub replay_history: bool,
    pub files_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub tls: Option<TlsPaths>,
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::assemble(ConfigFile::default(), CliOverrides::default(), None)
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides) -> Result<Self, ServerError> {
        let file_config = match config_path {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading config file");
                let content = std::fs::read_to_string(path)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| ServerError::Config(format!("config parse error: {}", e)))?
            }
            Some(path) => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                ConfigFile::default()
            }
            None => ConfigFile::default(),
        };

        let cert = overrides.cert.clone().or(file_config.tls.cert.clone());
        let key = overrides.key.clone().or(file_config.tls.key.clone());
        let tls = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            (None, None) => None,
            _ => {
                return Err(ServerError::Config(
                    "TLS needs both a certificate and a key".to_string(),
                ));
            }
        };

        let config = Self::assemble(file_config, overrides, tls);
        config.validate()?;
        Ok(config)
    }

    fn assemble(file: ConfigFile, overrides: CliOverrides, tls: Option<TlsPaths>) -> Self {
        Self {
            host: overrides.host.unwrap_or(file.server.host),
            port: overrides.port.unwrap_or(file.server.port),
            room: overrides.room.unwrap_or(file.server.room),
            side_channels: overrides.side_channels.unwrap_or(file.server.side_channels),
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(file.heartbeat.interval_secs),
                max_misses: file.heartbeat.max_misses,
            },
            history_capacity: file.history.capacity,
            replay_history: file.history.replay_on_join,
            files_dir: file.storage.files_dir,
            staging_dir: file.storage.staging_dir,
            tls,
            shutdown_grace: Duration::from_millis(file.server.shutdown_grace_ms),
        }
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.port.checked_add(self.side_channels).is_none() {
            return Err(ServerError::Config(format!(
                "side-channel ports {}..={} exceed 65535",
                self.port as u32 + 1,
                self.port as u32 + self.side_channels as u32
            )));
        }
        if self.heartbeat.interval.is_zero() || self.heartbeat.max_misses == 0 {
            return Err(ServerError::Config(
                "heartbeat interval and max_misses must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Ports of the side-channel pool
    pub fn side_channel_ports(&self) -> impl Iterator<Item = u16> + '_ {
        (1..=self.side_channels).filter_map(|offset| self.port.checked_add(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        // テスト項目: 設定ファイルなしでは既定値が使われる
        // given (前提条件) / when (操作):
        let config = ServerConfig::load(None, CliOverrides::default()).unwrap();

        // then (期待する結果):
        assert_eq!(config.port, 9000);
        assert_eq!(config.room, "Lobby");
        assert_eq!(config.side_channels, 5);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(25));
        assert_eq!(config.heartbeat.max_misses, 2);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.shutdown_grace, Duration::from_secs(1));
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_cli_overrides_file() {
        // テスト項目: CLI の値が設定ファイルの値より優先される
        // given (前提条件):
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parlor.toml");
        std::fs::write(
            &path,
            "[server]\nport = 7000\nroom = \"Den\"\n\n[heartbeat]\ninterval_secs = 5\n",
        )
        .unwrap();
        let overrides = CliOverrides {
            port: Some(7100),
            ..Default::default()
        };

        // when (操作):
        let config = ServerConfig::load(Some(&path), overrides).unwrap();

        // then (期待する結果):
        assert_eq!(config.port, 7100);
        assert_eq!(config.room, "Den");
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.side_channel_ports().collect::<Vec<_>>(), vec![
            7101, 7102, 7103, 7104, 7105
        ]);
    }

    #[test]
    fn test_side_channels_must_fit_port_range() {
        // テスト項目: サイドチャネルのポートが 65535 を超える設定は拒否される
        // given (前提条件):
        let overrides = CliOverrides {
            port: Some(65533),
            ..Default::default()
        };

        // when (操作):
        let result = ServerConfig::load(None, overrides);

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_tls_needs_cert_and_key() {
        // テスト項目: 証明書だけ指定して鍵がない場合は設定エラーになる
        // given (前提条件):
        let overrides = CliOverrides {
            cert: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };

        // when (操作):
        let result = ServerConfig::load(None, overrides);

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        // テスト項目: TOML として不正な設定ファイルは設定エラーになる
        // given (前提条件):
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("parlor.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        // when (操作):
        let result = ServerConfig::load(Some(&path), CliOverrides::default());

        // then (期待する結果):
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
