//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, DatabaseConfig, seed data)
//! - [`listen`]: WebSocket listener configuration (ListenConfig)
//! - [`limits`]: Hub queue sizing and flood protection (HubLimits, RateLimitConfig)
//! - [`validation`]: Startup validation

mod limits;
mod listen;
mod types;
pub mod validation;

pub use limits::{HubLimits, RateLimitConfig};
pub use listen::ListenConfig;
pub use types::{
    Config, ConfigError, DatabaseConfig, IdleTimeoutsConfig, SeedConfig, SeedRoom, SeedUser,
    ServerConfig,
};
