//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::limits::{HubLimits, RateLimitConfig};
use super::listen::ListenConfig;
use crate::protocol::{GroupId, UserId};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Hub daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// WebSocket listener.
    pub listen: ListenConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Queue sizes and timeouts.
    #[serde(default)]
    pub hub: HubLimits,
    /// Keepalive timers.
    #[serde(default)]
    pub idle_timeouts: IdleTimeoutsConfig,
    /// Per-connection flood protection.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Users and rooms inserted at startup if missing.
    #[serde(default)]
    pub seed: SeedConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity and side-channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, used in logs and the health endpoint.
    pub name: String,
    /// Port for the HTTP side-channel (`/metrics`, `/health`, `/events`).
    /// 0 disables it.
    #[serde(default)]
    pub http_port: u16,
}

/// Keepalive configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleTimeoutsConfig {
    /// Seconds between server PINGs (default: 30).
    #[serde(default = "default_ping_interval")]
    pub ping: u64,

    /// Seconds without any inbound traffic before the connection is dropped
    /// (default: 60).
    #[serde(default = "default_ping_timeout")]
    pub timeout: u64,
}

impl IdleTimeoutsConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for IdleTimeoutsConfig {
    fn default() -> Self {
        Self {
            ping: default_ping_interval(),
            timeout: default_ping_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    60
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or ":memory:".
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

fn default_database_path() -> String {
    "linkhub.db".to_string()
}

/// Startup seed data.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub rooms: Vec<SeedRoom>,
}

/// A user known to the persistence layer.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// A chat room and its member list.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRoom {
    pub id: GroupId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
}
