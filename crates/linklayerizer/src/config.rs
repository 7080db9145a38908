//! Configuration file support for linklayerizer
//!
//! Loads and validates daemon configuration from TOML files.
//! Default location: /etc/linklayerizer/linklayerizer.toml

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default config file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linklayerizer/linklayerizer.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Component id; connections must name it as their logic id
    #[serde(default = "default_engine_id")]
    pub id: String,

    /// Priority stamped on flows synthesized from layerizer links
    #[serde(default)]
    pub default_flow_priority: u16,
}

/// Daemon loop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Inbound channel capacity
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// Complete linklayerizer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerizerConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_engine_id() -> String {
    "linklayerizer".to_string()
}

fn default_queue_depth() -> usize {
    1024
}

fn default_heartbeat_interval() -> u64 {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id: default_engine_id(),
            default_flow_priority: 0,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            heartbeat_interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl LayerizerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io(e)),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.heartbeat_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.id.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.id must not be empty".to_string()));
        }
        if self.daemon.queue_depth == 0 {
            return Err(ConfigError::Invalid("daemon.queue_depth must be > 0".to_string()));
        }
        if self.daemon.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "daemon.heartbeat_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
