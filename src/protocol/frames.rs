//! JSON frame shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{GroupId, UserId};

/// A decoded client frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Bind this connection to a user when the handshake carried no identity.
    Hello { user_id: UserId },
    Join { group_id: GroupId },
    Leave { group_id: GroupId },
    /// Ask which users of a group are online.
    Members { group_id: GroupId },
    /// Mark a replayed notification as read.
    Read { notification_id: String },
    Ping,
    Chat(EnvelopeFields),
    Notification(EnvelopeFields),
    Presence(EnvelopeFields),
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Frame type name for metrics labeling.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Members { .. } => "members",
            Self::Read { .. } => "read",
            Self::Ping => "ping",
            Self::Chat(_) => "chat",
            Self::Notification(_) => "notification",
            Self::Presence(_) => "presence",
        }
    }
}

/// Addressing and content shared by every envelope-carrying frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopeFields {
    /// Claimed sender. When present it must match the connection's user.
    pub sender_id: Option<UserId>,
    pub receiver_id: Option<UserId>,
    #[serde(alias = "chat_room_id")]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub content: String,
    pub alarm_type: Option<String>,
    pub title: Option<String>,
}

/// Frame `type` values emitted by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Chat,
    Notification,
    Presence,
    Connection,
    GroupEvent,
    Members,
    Close,
    Error,
    Pong,
}

/// Every frame the hub writes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub success: bool,
    #[serde(rename = "type")]
    pub kind: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl OutboundFrame {
    pub fn ok(kind: FrameType, payload: Value) -> Self {
        Self {
            success: true,
            kind,
            message: None,
            payload,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: FrameType::Error,
            message: Some(message.into()),
            payload: Value::Null,
        }
    }

    /// Final frame before the server closes the socket.
    pub fn close(message: impl Into<String>) -> Self {
        Self {
            success: false,
            kind: FrameType::Close,
            message: Some(message.into()),
            payload: Value::Null,
        }
    }

    /// Acknowledgement sent once a connection is bound to a user, with the
    /// other users online at that moment.
    pub fn connected(user_id: UserId, online_users: &[UserId]) -> Self {
        Self {
            success: true,
            kind: FrameType::Connection,
            message: Some(format!("user {user_id} connected")),
            payload: serde_json::json!({ "user_id": user_id, "online_users": online_users }),
        }
    }

    /// Reply to a `members` query.
    pub fn members(group_id: GroupId, online_users: &[UserId]) -> Self {
        Self::ok(
            FrameType::Members,
            serde_json::json!({ "group_id": group_id, "online_users": online_users }),
        )
    }

    pub fn pong() -> Self {
        Self::ok(FrameType::Pong, Value::Null)
    }

    /// Serialize once; the result is shared by every recipient.
    pub fn encode(&self) -> Arc<str> {
        match serde_json::to_string(self) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode outbound frame");
                Arc::from(r#"{"success":false,"type":"error","message":"encoding failed"}"#)
            }
        }
    }
}

/// Payload of a `chat` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: String,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub content: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
}

/// Payload of a `notification` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub receiver_id: UserId,
    pub alarm_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Payload of a `presence` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupAction {
    Joined,
    Left,
}

/// Payload of a `group_event` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEventPayload {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub action: GroupAction,
}
