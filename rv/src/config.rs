//! Rendezvous configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default round deadline in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 500;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Broker configuration
    pub broker: BrokerConfig,

    /// IPC endpoint configuration
    pub ipc: IpcConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::default_locations() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed: a broken config file is reported properly by
    /// `load` once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => Some(path.clone()),
            None => Self::default_locations().into_iter().find(|p| p.exists()),
        }?;
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".rendezvous.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("rendezvous").join("rendezvous.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker id; generated when absent
    pub id: Option<String>,

    /// Deadline for one coordination round in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            id: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl BrokerConfig {
    /// Round deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// IPC endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Unix socket path; defaults to the runtime directory
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,
}

impl IpcConfig {
    /// Configured socket path, or the default one
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::ipc::get_socket_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert!(config.broker.id.is_none());
        assert_eq!(config.broker.timeout_ms, 500);
        assert_eq!(config.broker.timeout(), Duration::from_millis(500));
        assert!(config.ipc.socket_path.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

broker:
  id: main-broker
  timeout-ms: 1000

ipc:
  socket-path: /tmp/rv-test/broker.sock
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.broker.id.as_deref(), Some("main-broker"));
        assert_eq!(config.broker.timeout_ms, 1000);
        assert_eq!(config.ipc.socket_path(), PathBuf::from("/tmp/rv-test/broker.sock"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
broker:
  id: only-id
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.broker.id.as_deref(), Some("only-id"));
        assert_eq!(config.broker.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(config.ipc.socket_path().ends_with("rendezvous/broker.sock"));
    }

    #[test]
    fn test_load_explicit_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rv.yml");
        fs::write(&path, "log-level: warn\nbroker:\n  timeout-ms: 42\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.broker.timeout_ms, 42);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");

        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
