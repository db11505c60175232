//! Hub sizing and flood protection configuration.

use serde::Deserialize;
use std::time::Duration;

/// Queue sizes and timeouts for the hub control loop and connections.
///
/// Every queue in the hub is bounded; these values decide how much burst each
/// one absorbs before backpressure kicks in.
#[derive(Debug, Clone, Deserialize)]
pub struct HubLimits {
    /// Control loop request queue capacity (default: 1024).
    #[serde(default = "default_request_queue_capacity")]
    pub request_queue_capacity: usize,
    /// How long a submitter waits for queue space before reporting
    /// saturation, in milliseconds (default: 2000).
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    /// Per-connection outbound queue capacity (default: 64).
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum time a single outbound write may take, in milliseconds
    /// (default: 10000). Also bounds the wait on a full outbound queue.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Largest inbound text frame accepted, in bytes (default: 65536).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Unread notifications replayed after identification (default: 50).
    #[serde(default = "default_notification_backlog")]
    pub notification_backlog: usize,
}

impl HubLimits {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for HubLimits {
    fn default() -> Self {
        Self {
            request_queue_capacity: default_request_queue_capacity(),
            submit_timeout_ms: default_submit_timeout_ms(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            notification_backlog: default_notification_backlog(),
        }
    }
}

fn default_request_queue_capacity() -> usize {
    1024
}

fn default_submit_timeout_ms() -> u64 {
    2000
}

fn default_outbound_queue_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    10_000
}

fn default_max_frame_bytes() -> usize {
    64 * 1024
}

fn default_notification_backlog() -> usize {
    50
}

/// Per-connection flood protection.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained inbound frames per second (default: 10).
    #[serde(default = "default_messages_per_second")]
    pub messages_per_second: u32,
    /// Burst size (default: 20).
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Rate limit strikes before the connection is closed (default: 3).
    #[serde(default = "default_max_violations")]
    pub max_violations: u8,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: default_messages_per_second(),
            burst: default_burst(),
            max_violations: default_max_violations(),
        }
    }
}

fn default_messages_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    20
}

fn default_max_violations() -> u8 {
    3
}
