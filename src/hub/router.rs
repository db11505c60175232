//! Message routing and fan-out.
//!
//! The router runs inside the control loop: it validates an envelope,
//! resolves recipients against the registry as it is at that moment, and
//! offers the encoded frame to every recipient without blocking. A recipient
//! whose queue is full keeps the frame in its ordered overflow, and one
//! detached task per such recipient drains it, waiting at most the write
//! timeout per frame. A recipient that cannot keep up is closed and reported
//! back to the loop for removal.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use super::{CloseReason, ConnId, ConnectionHandle, HubEvent, Offer, Outbound, Registry};
use crate::error::EnvelopeError;
use crate::protocol::{Envelope, Target};

/// Outcome of one fan-out, as seen from the control loop.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub recipients: usize,
    /// Queued immediately.
    pub delivered: usize,
    /// Parked in the recipient's overflow.
    pub deferred: usize,
    /// Connections that must be removed, with the reason.
    pub failed: Vec<(ConnId, CloseReason)>,
}

pub struct Router {
    write_timeout: Duration,
    teardown: mpsc::WeakSender<HubEvent>,
}

impl Router {
    /// `teardown` is the control loop's own queue; the router keeps it weak
    /// so it never holds the loop open.
    pub fn new(write_timeout: Duration, teardown: mpsc::WeakSender<HubEvent>) -> Self {
        Self {
            write_timeout,
            teardown,
        }
    }

    pub fn resolve(&self, registry: &Registry, target: Target) -> Vec<Arc<ConnectionHandle>> {
        match target {
            Target::User(user) => registry.lookup(user).into_iter().collect(),
            Target::Group(group) => registry.members(group),
            Target::Broadcast => registry.all(),
        }
    }

    /// Validate, resolve and fan out one envelope.
    pub fn route(
        &self,
        registry: &Registry,
        envelope: &Envelope,
        exclude: Option<ConnId>,
    ) -> Result<Dispatch, EnvelopeError> {
        envelope.validate()?;

        let mut recipients = self.resolve(registry, envelope.target);
        if let Some(excluded) = exclude {
            recipients.retain(|h| h.id() != excluded);
        }

        crate::metrics::record_envelope(envelope.kind.as_str());
        if recipients.is_empty() {
            debug!(kind = %envelope.kind, target = ?envelope.target, "No recipients");
            return Ok(Dispatch::default());
        }

        Ok(self.fan_out(recipients, envelope.encode()))
    }

    /// Queue `frame` on every recipient without blocking the caller.
    pub fn fan_out(&self, recipients: Vec<Arc<ConnectionHandle>>, frame: Arc<str>) -> Dispatch {
        let mut dispatch = Dispatch {
            recipients: recipients.len(),
            ..Dispatch::default()
        };
        let mut stalled = Vec::new();

        for handle in recipients {
            match handle.offer(Outbound::Text(Arc::clone(&frame))) {
                Offer::Queued => dispatch.delivered += 1,
                Offer::Deferred => dispatch.deferred += 1,
                Offer::StartDrain => {
                    dispatch.deferred += 1;
                    stalled.push(handle);
                }
                Offer::Overflow => {
                    warn!(conn = %handle.id(), "Recipient overflow full, disconnecting");
                    crate::metrics::record_delivery_failure(CloseReason::SlowConsumer.as_str());
                    handle.close(CloseReason::SlowConsumer);
                    dispatch.failed.push((handle.id(), CloseReason::SlowConsumer));
                }
                Offer::Closed => {
                    crate::metrics::record_delivery_failure(CloseReason::WriteFailed.as_str());
                    dispatch.failed.push((handle.id(), CloseReason::WriteFailed));
                }
            }
        }

        crate::metrics::record_fanout(dispatch.recipients);
        crate::metrics::record_deliveries(dispatch.delivered);

        if !stalled.is_empty() {
            self.spawn_slow_path(stalled);
        }
        debug!(
            recipients = dispatch.recipients,
            delivered = dispatch.delivered,
            deferred = dispatch.deferred,
            failed = dispatch.failed.len(),
            "Fan-out complete"
        );
        dispatch
    }

    /// Drain the overflow of each recipient that just started one.
    fn spawn_slow_path(&self, stalled: Vec<Arc<ConnectionHandle>>) {
        let write_timeout = self.write_timeout;
        let teardown = self.teardown.clone();

        tokio::spawn(async move {
            let drains = stalled.into_iter().map(|handle| async move {
                let result = handle.drain_overflow(write_timeout).await;
                (handle, result)
            });

            for (handle, result) in join_all(drains).await {
                let reason = match result {
                    Ok(()) => continue,
                    Err(SendTimeoutError::Timeout(_)) => {
                        warn!(conn = %handle.id(), "Recipient too slow, disconnecting");
                        CloseReason::SlowConsumer
                    }
                    Err(SendTimeoutError::Closed(_)) => {
                        handle.close_reason().unwrap_or(CloseReason::WriteFailed)
                    }
                };
                crate::metrics::record_delivery_failure(reason.as_str());
                handle.close(reason);
                if let Some(tx) = teardown.upgrade() {
                    // Teardown must not be dropped; waiting here is off the loop.
                    let _ = tx
                        .send(HubEvent::Deregister {
                            conn_id: handle.id(),
                            reason,
                        })
                        .await;
                }
            }
        });
    }
}
