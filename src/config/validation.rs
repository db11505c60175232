//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("idle_timeouts.timeout ({timeout}s) must exceed idle_timeouts.ping ({ping}s)")]
    IdleTimeoutTooShort { ping: u64, timeout: u64 },
    #[error("rate_limit.{0} must be positive")]
    InvalidRate(&'static str),
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
    #[error("duplicate seed user id {0}")]
    DuplicateSeedUser(u64),
    #[error("seed room {room} lists unknown member {user}")]
    UnknownRoomMember { room: u64, user: u64 },
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }

    let hub = &config.hub;
    for (name, value) in [
        ("hub.request_queue_capacity", hub.request_queue_capacity as u64),
        ("hub.outbound_queue_capacity", hub.outbound_queue_capacity as u64),
        ("hub.submit_timeout_ms", hub.submit_timeout_ms),
        ("hub.write_timeout_ms", hub.write_timeout_ms),
        ("hub.max_frame_bytes", hub.max_frame_bytes as u64),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }

    let idle = &config.idle_timeouts;
    if idle.ping == 0 {
        errors.push(ValidationError::ZeroLimit("idle_timeouts.ping"));
    }
    if idle.timeout == 0 {
        errors.push(ValidationError::ZeroLimit("idle_timeouts.timeout"));
    }
    if idle.timeout <= idle.ping {
        errors.push(ValidationError::IdleTimeoutTooShort {
            ping: idle.ping,
            timeout: idle.timeout,
        });
    }

    if config.rate_limit.messages_per_second == 0 {
        errors.push(ValidationError::InvalidRate("messages_per_second"));
    }
    if config.rate_limit.burst == 0 {
        errors.push(ValidationError::InvalidRate("burst"));
    }

    if config.database.path != ":memory:"
        && let Some(parent) = Path::new(&config.database.path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    let mut user_ids = HashSet::new();
    for user in &config.seed.users {
        if !user_ids.insert(user.id) {
            errors.push(ValidationError::DuplicateSeedUser(user.id));
        }
    }
    for room in &config.seed.rooms {
        for member in &room.members {
            if !user_ids.contains(member) {
                errors.push(ValidationError::UnknownRoomMember {
                    room: room.id,
                    user: *member,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
