//! Configuration loading for tandem-broker.
//!
//! Configuration is loaded from a TOML file (default: `broker.toml`). Every
//! section and field is optional; a missing file means all defaults.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for tandem-broker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Periodic stats broadcast.
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the bus, health and metrics (default: 127.0.0.1:3004).
    /// Must be a loopback address.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Seconds a new connection has to send `identify` (default: 5).
    #[serde(default = "default_identify_timeout_secs")]
    pub identify_timeout_secs: u64,
    /// Largest accepted text frame in bytes (default: 1MB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Frames buffered per connection before new ones are dropped
    /// (default: 256).
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Stats broadcast configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    /// Broadcast interval in seconds (default: 30).
    #[serde(default = "default_broadcast_interval")]
    pub broadcast_interval_secs: u64,
    /// Enable the broadcast (default: true).
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1:3004".to_string()
}

fn default_identify_timeout_secs() -> u64 {
    5
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1MB
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_broadcast_interval() -> u64 {
    30
}

fn default_stats_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            identify_timeout_secs: default_identify_timeout_secs(),
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: default_broadcast_interval(),
            enabled: default_stats_enabled(),
        }
    }
}

impl LimitsConfig {
    /// Identify timeout as a `Duration`.
    pub fn identify_timeout(&self) -> Duration {
        Duration::from_secs(self.identify_timeout_secs)
    }
}

impl StatsConfig {
    /// Broadcast interval as a `Duration`.
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::Invalid {
                field: "server.bind_address",
                reason: format!("not a socket address: {}", self.server.bind_address),
            })
    }

    /// Check values that serde cannot.
    ///
    /// The broker has no authentication, so it only ever listens on loopback.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.bind_addr()?;
        if !addr.ip().is_loopback() {
            return Err(ConfigError::Invalid {
                field: "server.bind_address",
                reason: format!("{} is not a loopback address", addr.ip()),
            });
        }
        if self.limits.identify_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.identify_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.limits.max_message_size == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_message_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.limits.outbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.outbound_buffer",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.stats.broadcast_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "stats.broadcast_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value parsed but is not acceptable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
