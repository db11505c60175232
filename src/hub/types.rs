use std::sync::Arc;
use tokio::sync::oneshot;

use super::{CloseReason, ConnId, ConnectionHandle};
use crate::error::HubError;
use crate::protocol::{Envelope, GroupId, UserId};

/// What a successful `BindUser` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOutcome {
    /// The user's previous connection, now closed.
    pub superseded: Option<ConnId>,
    /// The user had no connection before.
    pub newly_online: bool,
}

/// Requests processed by the hub control loop, one at a time, in arrival order.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection finished its handshake.
    Register {
        handle: Arc<ConnectionHandle>,
        reply_tx: oneshot::Sender<()>,
    },
    /// A connection is gone. Repeats are harmless.
    Deregister { conn_id: ConnId, reason: CloseReason },
    /// Associate a connection with an authenticated user.
    BindUser {
        conn_id: ConnId,
        user_id: UserId,
        reply_tx: oneshot::Sender<Result<BindOutcome, HubError>>,
    },
    JoinGroup {
        conn_id: ConnId,
        group_id: GroupId,
        reply_tx: Option<oneshot::Sender<bool>>,
    },
    LeaveGroup {
        conn_id: ConnId,
        group_id: GroupId,
        reply_tx: Option<oneshot::Sender<bool>>,
    },
    /// Route an envelope. Recipients are resolved when this is processed.
    Deliver { envelope: Envelope },
    /// Barrier: replies once everything queued before it has been processed.
    Flush { reply_tx: oneshot::Sender<()> },
    /// Close every connection and exit the loop.
    Stop,
}
