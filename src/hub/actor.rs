//! Hub control loop.
//!
//! The only task that mutates the [`Registry`]. Events arrive on one bounded
//! queue and are handled to completion in arrival order; nothing in here
//! awaits, so a slow socket can never stall the loop. After each mutating
//! event a fresh snapshot is published for readers outside the loop, before
//! any reply to that event is sent.

use serde_json::json;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::router::Router;
use super::{BindOutcome, CloseReason, ConnId, ConnectionHandle, HubEvent, Registry};
use crate::error::HubError;
use crate::protocol::{
    Envelope, EnvelopeKind, FrameType, GroupAction, GroupEventPayload, GroupId, OutboundFrame,
    PresencePayload, Target, UserId,
};

pub struct HubActor {
    registry: Registry,
    router: Router,
    snapshot_tx: watch::Sender<Registry>,
    dirty: bool,
}

impl HubActor {
    pub fn new(router: Router, snapshot_tx: watch::Sender<Registry>) -> Self {
        Self {
            registry: Registry::new(),
            router,
            snapshot_tx,
            dirty: false,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<HubEvent>) {
        info!("Hub control loop started");
        while let Some(event) = rx.recv().await {
            let flow = self.handle_event(event);
            self.commit();
            if flow.is_break() {
                break;
            }
        }
        self.shutdown();
        info!("Hub control loop stopped");
    }

    fn handle_event(&mut self, event: HubEvent) -> ControlFlow<()> {
        match event {
            HubEvent::Register { handle, reply_tx } => {
                self.handle_register(handle);
                self.commit();
                let _ = reply_tx.send(());
            }
            HubEvent::Deregister { conn_id, reason } => {
                self.remove_connections([(conn_id, reason)]);
            }
            HubEvent::BindUser {
                conn_id,
                user_id,
                reply_tx,
            } => {
                let result = self.handle_bind(conn_id, user_id);
                self.commit();
                let _ = reply_tx.send(result);
            }
            HubEvent::JoinGroup {
                conn_id,
                group_id,
                reply_tx,
            } => {
                let joined = self.handle_membership(conn_id, group_id, GroupAction::Joined);
                self.commit();
                if let Some(tx) = reply_tx {
                    let _ = tx.send(joined);
                }
            }
            HubEvent::LeaveGroup {
                conn_id,
                group_id,
                reply_tx,
            } => {
                let left = self.handle_membership(conn_id, group_id, GroupAction::Left);
                self.commit();
                if let Some(tx) = reply_tx {
                    let _ = tx.send(left);
                }
            }
            HubEvent::Deliver { envelope } => {
                self.deliver(&envelope, None);
            }
            HubEvent::Flush { reply_tx } => {
                let _ = reply_tx.send(());
            }
            HubEvent::Stop => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn handle_register(&mut self, handle: Arc<ConnectionHandle>) {
        let id = handle.id();
        if self.registry.add(handle) {
            debug!(conn = %id, "Connection registered");
            self.dirty = true;
        } else {
            warn!(conn = %id, "Duplicate registration ignored");
        }
    }

    fn handle_bind(&mut self, conn_id: ConnId, user_id: UserId) -> Result<BindOutcome, HubError> {
        let binding = self.registry.bind_user(conn_id, user_id)?;
        self.dirty = true;

        let superseded = binding.superseded.as_ref().map(|h| h.id());
        if let Some(old) = binding.superseded {
            info!(user_id, old = %old.id(), new = %conn_id, "Session superseded");
            crate::metrics::record_superseded();
            // Already unbound, so its removal does not flip presence.
            self.remove_connections([(old.id(), CloseReason::Superseded)]);
        }
        if let Some(released) = binding.released {
            self.announce_presence(released, false, None);
        }
        if binding.newly_online {
            info!(user_id, conn = %conn_id, "User online");
            self.announce_presence(user_id, true, Some(conn_id));
        }

        Ok(BindOutcome {
            superseded,
            newly_online: binding.newly_online,
        })
    }

    fn handle_membership(&mut self, conn_id: ConnId, group_id: GroupId, action: GroupAction) -> bool {
        let changed = match action {
            GroupAction::Joined => self.registry.join_group(group_id, conn_id),
            GroupAction::Left => self.registry.leave_group(group_id, conn_id),
        };
        if !changed {
            return false;
        }
        self.dirty = true;
        debug!(conn = %conn_id, group_id, ?action, "Group membership changed");

        if let Some(user_id) = self.registry.user_of(conn_id) {
            let payload = GroupEventPayload {
                group_id,
                user_id,
                action,
            };
            let frame = OutboundFrame::ok(FrameType::GroupEvent, json!(payload)).encode();
            let mut members = self.router.resolve(&self.registry, Target::Group(group_id));
            members.retain(|h| h.id() != conn_id);
            let dispatch = self.router.fan_out(members, frame);
            self.remove_connections(dispatch.failed);
        }
        true
    }

    /// Route an envelope and retire any recipient whose queue is gone.
    fn deliver(&mut self, envelope: &Envelope, exclude: Option<ConnId>) {
        match self.router.route(&self.registry, envelope, exclude) {
            Ok(dispatch) => {
                if !dispatch.failed.is_empty() {
                    self.remove_connections(dispatch.failed);
                }
            }
            Err(e) => {
                warn!(
                    kind = %envelope.kind,
                    sender = ?envelope.sender_id,
                    error = %e,
                    "Envelope rejected"
                );
                crate::metrics::record_rejected(e.error_code());
            }
        }
    }

    fn announce_presence(&mut self, user_id: UserId, is_online: bool, exclude: Option<ConnId>) {
        let payload = PresencePayload {
            user_id,
            is_online,
            status: None,
        };
        let envelope = Envelope::broadcast(EnvelopeKind::Presence, json!(payload));
        self.deliver(&envelope, exclude);
    }

    /// Remove connections, including any that fail while being told about it.
    fn remove_connections(&mut self, initial: impl IntoIterator<Item = (ConnId, CloseReason)>) {
        let mut pending: VecDeque<(ConnId, CloseReason)> = initial.into_iter().collect();

        while let Some((id, reason)) = pending.pop_front() {
            let Some(removed) = self.registry.remove(id) else {
                continue;
            };
            self.dirty = true;
            removed.handle.close(reason);
            debug!(conn = %id, reason = reason.as_str(), groups = removed.groups.len(), "Connection removed");

            if let Some(user_id) = removed.went_offline {
                info!(user_id, conn = %id, "User offline");
                let payload = PresencePayload {
                    user_id,
                    is_online: false,
                    status: None,
                };
                let envelope = Envelope::broadcast(EnvelopeKind::Presence, json!(payload));
                if let Ok(dispatch) = self.router.route(&self.registry, &envelope, None) {
                    pending.extend(dispatch.failed);
                }
            }
        }
    }

    /// Publish a snapshot if anything changed.
    fn commit(&mut self) {
        if std::mem::take(&mut self.dirty) {
            self.publish();
        }
    }

    fn publish(&self) {
        crate::metrics::set_registry_gauges(
            self.registry.connection_count(),
            self.registry.user_count(),
            self.registry.group_count(),
        );
        self.snapshot_tx.send_replace(self.registry.clone());
    }

    fn shutdown(&mut self) {
        let handles = self.registry.all();
        info!(connections = handles.len(), "Closing all connections");
        for handle in handles {
            handle.close(CloseReason::Shutdown);
        }
        self.registry = Registry::new();
        self.publish();
    }
}
