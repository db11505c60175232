//! Unified error handling for the hub.
//!
//! Envelope, hub-submission and per-frame handler errors, with static codes
//! for metrics labeling and client-visible replies where one is warranted.

use thiserror::Error;

use crate::db::DbError;
use crate::hub::ConnId;
use crate::network::LifecycleError;
use crate::protocol::{EnvelopeKind, GroupId, OutboundFrame, UserId};

// ============================================================================
// Envelope Errors (router boundary)
// ============================================================================

/// Envelopes that break the addressing rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("envelope names both a recipient and a group")]
    AmbiguousTarget,

    #[error("{0} envelope needs a recipient or a group")]
    MissingTarget(EnvelopeKind),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmbiguousTarget => "ambiguous_target",
            Self::MissingTarget(_) => "missing_target",
            Self::Malformed(_) => "malformed",
        }
    }
}

// ============================================================================
// Hub Errors (control loop submission)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The control loop queue stayed full for the whole submit timeout.
    #[error("hub request queue saturated")]
    QueueSaturated,

    #[error("hub has stopped")]
    Stopped,

    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),
}

impl HubError {
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::QueueSaturated => "queue_saturated",
            Self::Stopped => "stopped",
            Self::UnknownConnection(_) => "unknown_connection",
        }
    }
}

// ============================================================================
// Handler Errors (inbound frame processing)
// ============================================================================

/// Errors raised while handling one inbound frame.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("binary frames are not supported")]
    BinaryFrame,

    #[error("connection is not identified")]
    NotIdentified,

    #[error("connection is already identified as user {0}")]
    AlreadyIdentified(UserId),

    #[error("unknown user {0}")]
    UnknownUser(UserId),

    #[error("sender {claimed} does not match connection user {actual}")]
    SenderMismatch { claimed: UserId, actual: UserId },

    #[error("user is not a member of group {0}")]
    NotGroupMember(GroupId),

    #[error("rate limited")]
    RateLimited,

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl HandlerError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::FrameTooLarge(_) => "frame_too_large",
            Self::BinaryFrame => "binary_frame",
            Self::NotIdentified => "not_identified",
            Self::AlreadyIdentified(_) => "already_identified",
            Self::UnknownUser(_) => "unknown_user",
            Self::SenderMismatch { .. } => "sender_mismatch",
            Self::NotGroupMember(_) => "not_group_member",
            Self::RateLimited => "rate_limited",
            Self::Envelope(e) => e.error_code(),
            Self::Store(_) => "store_error",
            Self::Hub(e) => e.error_code(),
            Self::Lifecycle(_) => "illegal_state",
        }
    }

    /// Convert to an error frame for the client.
    ///
    /// Returns `None` for failures the client can do nothing about.
    pub fn to_reply(&self) -> Option<OutboundFrame> {
        let message = match self {
            Self::Malformed(e) => format!("invalid message format: {e}"),
            Self::Store(_) => "failed to save message".to_string(),
            Self::Hub(HubError::QueueSaturated) => "server busy, try again".to_string(),
            Self::Hub(_) | Self::Lifecycle(_) => return None,
            other => other.to_string(),
        };
        Some(OutboundFrame::error(message))
    }

    /// Whether the connection must be torn down after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Hub(HubError::Stopped)
                | Self::Hub(HubError::UnknownConnection(_))
                | Self::Lifecycle(_)
        )
    }
}

/// Result type for frame handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameType;

    #[test]
    fn envelope_error_codes() {
        assert_eq!(EnvelopeError::AmbiguousTarget.error_code(), "ambiguous_target");
        assert_eq!(
            HandlerError::Envelope(EnvelopeError::MissingTarget(EnvelopeKind::Chat)).error_code(),
            "missing_target"
        );
    }

    #[test]
    fn client_visible_replies() {
        let reply = HandlerError::UnknownUser(42).to_reply().unwrap();
        assert_eq!(reply.kind, FrameType::Error);
        assert!(!reply.success);
        assert_eq!(reply.message.as_deref(), Some("unknown user 42"));

        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let reply = HandlerError::Malformed(decode).to_reply().unwrap();
        assert!(
            reply
                .message
                .unwrap()
                .starts_with("invalid message format")
        );
    }

    #[test]
    fn stopped_hub_is_fatal_and_silent() {
        let err = HandlerError::Hub(HubError::Stopped);
        assert!(err.is_fatal());
        assert!(err.to_reply().is_none());
        assert!(!HandlerError::RateLimited.is_fatal());
    }
}
