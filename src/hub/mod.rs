//! Real-time hub: connection registry, routing and the control loop.
//!
//! All registry mutations go through [`HubHandle`], which turns each call into
//! a [`HubEvent`] on the control loop's bounded queue. Reads (`is_online`,
//! `snapshot`) are served from the last published snapshot and never touch
//! the queue.

mod actor;
mod conn_id;
mod handle;
mod registry;
mod router;
mod types;

pub use conn_id::{ConnId, ConnIdGenerator};
pub use handle::{CloseReason, ConnectionHandle, Offer, Outbound};
pub use registry::Registry;
pub use types::{BindOutcome, HubEvent};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::error;

use crate::config::HubLimits;
use crate::error::HubError;
use crate::protocol::{Envelope, EnvelopeKind, GroupId, UserId};
use actor::HubActor;
use router::Router;

/// Cheap, cloneable entry point to the hub.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    snapshot_rx: watch::Receiver<Registry>,
    submit_timeout: Duration,
    ids: Arc<ConnIdGenerator>,
}

/// Start the control loop.
pub fn spawn(limits: &HubLimits) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(limits.request_queue_capacity);
    let (snapshot_tx, snapshot_rx) = watch::channel(Registry::new());
    let router = Router::new(limits.write_timeout(), tx.downgrade());
    let task = tokio::spawn(HubActor::new(router, snapshot_tx).run(rx));

    let handle = HubHandle {
        tx,
        snapshot_rx,
        submit_timeout: limits.submit_timeout(),
        ids: Arc::new(ConnIdGenerator::new()),
    };
    (handle, task)
}

impl HubHandle {
    pub fn next_conn_id(&self) -> ConnId {
        self.ids.next()
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit a request that may be refused when the loop is saturated.
    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        match self.tx.send_timeout(event, self.submit_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                error!(
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Hub request queue saturated, request refused"
                );
                crate::metrics::record_queue_saturated();
                Err(HubError::QueueSaturated)
            }
            Err(SendTimeoutError::Closed(_)) => Err(HubError::Stopped),
        }
    }

    /// Submit a request that must never be dropped (setup and teardown).
    ///
    /// Saturation is reported, then the submitter keeps waiting.
    async fn submit_critical(&self, event: HubEvent) -> Result<(), HubError> {
        match self.tx.send_timeout(event, self.submit_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(event)) => {
                error!(
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Hub request queue saturated, blocking on lifecycle request"
                );
                crate::metrics::record_queue_saturated();
                self.tx.send(event).await.map_err(|_| HubError::Stopped)
            }
            Err(SendTimeoutError::Closed(_)) => Err(HubError::Stopped),
        }
    }

    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit_critical(HubEvent::Register { handle, reply_tx })
            .await?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn deregister(&self, conn_id: ConnId, reason: CloseReason) -> Result<(), HubError> {
        self.submit_critical(HubEvent::Deregister { conn_id, reason })
            .await
    }

    pub async fn bind_user(&self, conn_id: ConnId, user_id: UserId) -> Result<BindOutcome, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(HubEvent::BindUser {
            conn_id,
            user_id,
            reply_tx,
        })
        .await?;
        reply_rx.await.map_err(|_| HubError::Stopped)?
    }

    /// Returns `false` if the connection was already a member.
    pub async fn join_group(&self, conn_id: ConnId, group_id: GroupId) -> Result<bool, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(HubEvent::JoinGroup {
            conn_id,
            group_id,
            reply_tx: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    /// Returns `false` if the connection was not a member.
    pub async fn leave_group(&self, conn_id: ConnId, group_id: GroupId) -> Result<bool, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(HubEvent::LeaveGroup {
            conn_id,
            group_id,
            reply_tx: Some(reply_tx),
        })
        .await?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    /// Queue an envelope for routing. Validation happens in the loop;
    /// rejected envelopes are logged there and not reported back.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), HubError> {
        self.submit(HubEvent::Deliver { envelope }).await
    }

    /// Wait until every request submitted before this call has been handled.
    pub async fn flush(&self) -> Result<(), HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit_critical(HubEvent::Flush { reply_tx }).await?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn stop(&self) -> Result<(), HubError> {
        self.submit_critical(HubEvent::Stop).await
    }

    // ========================================================================
    // Interface for usecases
    // ========================================================================

    pub async fn send_message_to_user(
        &self,
        user_id: UserId,
        kind: EnvelopeKind,
        payload: Value,
    ) -> Result<(), HubError> {
        self.deliver(Envelope::to_user(kind, user_id, payload)).await
    }

    pub async fn send_group_message(
        &self,
        group_id: GroupId,
        kind: EnvelopeKind,
        payload: Value,
    ) -> Result<(), HubError> {
        self.deliver(Envelope::to_group(kind, group_id, payload)).await
    }

    pub async fn broadcast_message(&self, kind: EnvelopeKind, payload: Value) -> Result<(), HubError> {
        self.deliver(Envelope::broadcast(kind, payload)).await
    }

    // ========================================================================
    // Snapshot reads
    // ========================================================================

    /// The registry as of the last processed mutation.
    pub fn snapshot(&self) -> Registry {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.snapshot_rx.borrow().is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.snapshot_rx.borrow().online_users()
    }

    pub fn group_online(&self, group_id: GroupId) -> Vec<UserId> {
        self.snapshot_rx.borrow().online_members(group_id)
    }
}
