//! Wire protocol between clients and the hub.
//!
//! Clients speak JSON text frames tagged by `type`. Inbound frames are either
//! session control (`hello`, `join`, `leave`, `ping`) or envelopes (`chat`,
//! `notification`, `presence`). Everything the hub sends back uses the
//! [`OutboundFrame`] shape: `{success, type, message?, payload?}`.

mod envelope;
mod frames;

pub use envelope::{Envelope, EnvelopeKind, Target};
pub use frames::{
    ChatPayload, EnvelopeFields, FrameType, GroupAction, GroupEventPayload, InboundFrame,
    NotificationPayload, OutboundFrame, PresencePayload,
};

/// Application user identifier, owned by the persistence layer.
pub type UserId = u64;

/// Group (chat room) identifier.
pub type GroupId = u64;
