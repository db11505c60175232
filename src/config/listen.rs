//! WebSocket listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:8081").
    pub address: SocketAddr,
    /// Allowed `Origin` header values for the upgrade request.
    /// Empty means any origin is accepted.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

impl ListenConfig {
    /// Whether an upgrade request carrying `origin` may proceed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allow_origins.is_empty() {
            return true;
        }
        match origin {
            Some(origin) => self.allow_origins.iter().any(|allowed| allowed == origin),
            None => false,
        }
    }
}
