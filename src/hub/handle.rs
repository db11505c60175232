//! The hub's view of one connection.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::ConnId;
use crate::protocol::OutboundFrame;

/// Items on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Pre-encoded JSON text frame, shared across recipients.
    Text(Arc<str>),
    /// Write a close frame and stop.
    Close { code: u16, reason: &'static str },
}

/// Why a connection is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    Superseded,
    SlowConsumer,
    WriteFailed,
    IdleTimeout,
    Flooding,
    ProtocolError,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Superseded => "superseded",
            Self::SlowConsumer => "slow_consumer",
            Self::WriteFailed => "write_failed",
            Self::IdleTimeout => "idle_timeout",
            Self::Flooding => "flooding",
            Self::ProtocolError => "protocol_error",
            Self::Shutdown => "shutdown",
        }
    }

    /// WebSocket close code.
    pub fn code(self) -> u16 {
        match self {
            Self::ClientClosed => 1000,
            Self::Shutdown => 1001,
            Self::ProtocolError => 1002,
            Self::Superseded | Self::Flooding => 1008,
            Self::SlowConsumer | Self::WriteFailed | Self::IdleTimeout => 1011,
        }
    }

    /// Explanation sent to the client as a `close` frame, if any.
    fn notice(self) -> Option<&'static str> {
        match self {
            Self::Superseded => Some("signed in from another device"),
            Self::Flooding => Some("too many messages"),
            Self::Shutdown => Some("server shutting down"),
            Self::IdleTimeout => Some("idle timeout"),
            _ => None,
        }
    }
}

/// What happened to a frame offered to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// On the outbound queue.
    Queued,
    /// Behind earlier frames in the overflow; a drain is already running.
    Deferred,
    /// First frame in the overflow; the caller must run `drain_overflow`.
    StartDrain,
    /// The overflow is full too.
    Overflow,
    /// The connection is closing or its queue is gone.
    Closed,
}

/// Frames waiting for space on the outbound queue, in arrival order.
#[derive(Debug, Default)]
struct Overflow {
    queue: VecDeque<Outbound>,
    draining: bool,
}

/// Shared handle the registry stores for each live connection.
///
/// The outbound sender is the only path to the socket. Frames that find the
/// queue full wait in an overflow list drained by a single task, and while
/// that list is non-empty every later frame joins it, so frames reach the
/// socket in the order they were offered. `close` is idempotent: the first
/// reason wins and later calls are no-ops.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnId,
    outbound: mpsc::Sender<Outbound>,
    overflow: Mutex<Overflow>,
    cancel: CancellationToken,
    closed: OnceLock<CloseReason>,
}

impl ConnectionHandle {
    pub fn new(id: ConnId, outbound: mpsc::Sender<Outbound>) -> Arc<Self> {
        Arc::new(Self {
            id,
            outbound,
            overflow: Mutex::new(Overflow::default()),
            cancel: CancellationToken::new(),
            closed: OnceLock::new(),
        })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queue a frame without waiting, behind any overflow.
    ///
    /// Fails with `Full` instead of starting a drain.
    pub fn try_send(&self, msg: Outbound) -> Result<(), TrySendError<Outbound>> {
        if self.is_closing() {
            return Err(TrySendError::Closed(msg));
        }
        let mut overflow = self.overflow.lock();
        if overflow.draining {
            if overflow.queue.len() >= self.outbound.max_capacity() {
                return Err(TrySendError::Full(msg));
            }
            overflow.queue.push_back(msg);
            return Ok(());
        }
        self.outbound.try_send(msg)
    }

    /// Queue a frame, parking it in the overflow when the queue is full.
    pub fn offer(&self, msg: Outbound) -> Offer {
        if self.is_closing() {
            return Offer::Closed;
        }
        let mut overflow = self.overflow.lock();
        if overflow.draining {
            if overflow.queue.len() >= self.outbound.max_capacity() {
                return Offer::Overflow;
            }
            overflow.queue.push_back(msg);
            return Offer::Deferred;
        }
        match self.outbound.try_send(msg) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(msg)) => {
                overflow.queue.push_back(msg);
                overflow.draining = true;
                Offer::StartDrain
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Move the overflow onto the outbound queue in order, waiting at most
    /// `timeout` for space per frame. Run by whoever got `StartDrain`.
    pub async fn drain_overflow(
        &self,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<Outbound>> {
        loop {
            let next = {
                let mut overflow = self.overflow.lock();
                match overflow.queue.pop_front() {
                    Some(msg) => msg,
                    None => {
                        overflow.draining = false;
                        return Ok(());
                    }
                }
            };
            if self.is_closing() {
                return Err(SendTimeoutError::Closed(next));
            }
            self.outbound.send_timeout(next, timeout).await?;
        }
    }

    /// Convenience for frames addressed to this connection only.
    pub fn send_frame(&self, frame: &OutboundFrame) -> Result<(), TrySendError<Outbound>> {
        self.try_send(Outbound::Text(frame.encode()))
    }

    /// Begin teardown. Returns `true` for the call that actually closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.closed.set(reason).is_err() {
            return false;
        }
        // Best effort: a full queue means the client is not reading anyway.
        if let Some(notice) = reason.notice() {
            let _ = self
                .outbound
                .try_send(Outbound::Text(OutboundFrame::close(notice).encode()));
        }
        let _ = self.outbound.try_send(Outbound::Close {
            code: reason.code(),
            reason: reason.as_str(),
        });
        self.cancel.cancel();
        true
    }

    pub fn is_closing(&self) -> bool {
        self.closed.get().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed.get().copied()
    }

    /// Resolves once `close` has been called.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}
