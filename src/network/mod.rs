//! Network module.
//!
//! Contains the Gateway (WebSocket listener), Connection handler, and rate limiting.

mod connection;
mod gateway;
pub mod limit;

pub use connection::{Connection, ConnectionConfig, LifecycleError};
pub use gateway::Gateway;
