//! Core configuration types.

use super::defaults::{default_database_path, default_ping_interval, default_ping_timeout};
use super::{
    HttpConfig, LimitsConfig, ListenConfig, PresenceConfig, SecurityConfig, UploadsConfig,
};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable overriding `security.jwt_secret`.
pub const JWT_SECRET_ENV: &str = "HUDDLE_JWT_SECRET";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// WebSocket listener.
    pub listen: ListenConfig,
    /// HTTP API listener (optional).
    pub http: Option<HttpConfig>,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Tokens and flood protection.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Presence reconciliation.
    #[serde(default)]
    pub presence: PresenceConfig,
    /// Size and paging limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// File uploads.
    #[serde(default)]
    pub uploads: UploadsConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV)
            && !secret.is_empty()
        {
            self.security.jwt_secret = secret;
        }
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, used in logs.
    pub name: String,
    /// Prometheus metrics HTTP port (default: 9090, 0 disables the exporter).
    pub metrics_port: Option<u16>,
    /// Idle timeout configuration for ping/pong keepalive.
    #[serde(default)]
    pub idle_timeouts: IdleTimeoutsConfig,
}

/// Idle timeout configuration for client connection keepalive.
///
/// The server pings connections that have been silent for `ping` seconds.
/// If no frame arrives within `timeout` seconds after that, the connection
/// is treated as lost.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleTimeoutsConfig {
    /// Seconds of idle before sending a ping (default: 90).
    #[serde(default = "default_ping_interval")]
    pub ping: u64,

    /// Seconds to wait for any frame after a ping (default: 120).
    #[serde(default = "default_ping_timeout")]
    pub timeout: u64,
}

impl Default for IdleTimeoutsConfig {
    fn default() -> Self {
        Self {
            ping: default_ping_interval(),
            timeout: default_ping_timeout(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}
