//! Routable messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::{FrameType, GroupId, OutboundFrame, UserId};
use crate::error::EnvelopeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Chat,
    Notification,
    Presence,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Notification => "notification",
            Self::Presence => "presence",
        }
    }

    fn frame_type(self) -> FrameType {
        match self {
            Self::Chat => FrameType::Chat,
            Self::Notification => FrameType::Notification,
            Self::Presence => FrameType::Presence,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an envelope goes. Exactly one of these is chosen per envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    User(UserId),
    Group(GroupId),
    Broadcast,
}

/// A message headed for one user, one group, or everyone.
///
/// `sender_id` is `None` for envelopes originated by the server itself
/// (presence changes, usecase notifications).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub sender_id: Option<UserId>,
    pub target: Target,
    pub payload: Value,
}

impl Envelope {
    /// Build an envelope from optional addressing fields.
    ///
    /// Setting both a recipient and a group is rejected. Setting neither is a
    /// broadcast, which only presence and server-originated envelopes may do.
    pub fn new(
        kind: EnvelopeKind,
        sender_id: Option<UserId>,
        receiver_id: Option<UserId>,
        group_id: Option<GroupId>,
        payload: Value,
    ) -> Result<Self, EnvelopeError> {
        let target = match (receiver_id, group_id) {
            (Some(_), Some(_)) => return Err(EnvelopeError::AmbiguousTarget),
            (Some(user), None) => Target::User(user),
            (None, Some(group)) => Target::Group(group),
            (None, None) => Target::Broadcast,
        };
        let envelope = Self {
            kind,
            sender_id,
            target,
            payload,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    pub fn to_user(kind: EnvelopeKind, user: UserId, payload: Value) -> Self {
        Self {
            kind,
            sender_id: None,
            target: Target::User(user),
            payload,
        }
    }

    pub fn to_group(kind: EnvelopeKind, group: GroupId, payload: Value) -> Self {
        Self {
            kind,
            sender_id: None,
            target: Target::Group(group),
            payload,
        }
    }

    pub fn broadcast(kind: EnvelopeKind, payload: Value) -> Self {
        Self {
            kind,
            sender_id: None,
            target: Target::Broadcast,
            payload,
        }
    }

    /// Check the addressing rules.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.target == Target::Broadcast
            && self.kind != EnvelopeKind::Presence
            && self.sender_id.is_some()
        {
            return Err(EnvelopeError::MissingTarget(self.kind));
        }
        if self.payload.is_null() {
            return Err(EnvelopeError::Malformed("empty payload".to_string()));
        }
        Ok(())
    }

    /// The client-facing frame text.
    pub fn encode(&self) -> Arc<str> {
        OutboundFrame::ok(self.kind.frame_type(), self.payload.clone()).encode()
    }
}
