//! Per-frame handling for one connection.
//!
//! A [`Session`] owns everything the reader needs between frames: the user
//! bound to the connection, its lifecycle state and its flood guard. Chat
//! and notification frames are written through to the store before they are
//! handed to the hub, so a frame that fails to persist is never delivered.

use serde_json::json;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info, warn};

use super::ConnectionConfig;
use super::lifecycle::ConnState;
use crate::db::{ChatMessage, NotificationRecord, Store};
use crate::error::{EnvelopeError, HandlerError, HandlerResult};
use crate::hub::{CloseReason, ConnId, ConnectionHandle, HubHandle};
use crate::network::limit::{FloodCheck, FloodGuard};
use crate::protocol::{
    Envelope, EnvelopeFields, EnvelopeKind, FrameType, GroupId, InboundFrame, OutboundFrame,
    PresencePayload, Target, UserId,
};
use crate::telemetry::{FrameTimer, spans};

const DEFAULT_ALARM_TYPE: &str = "message";

pub(super) struct Session {
    pub(super) id: ConnId,
    pub(super) handle: Arc<ConnectionHandle>,
    pub(super) state: ConnState,
    hub: HubHandle,
    store: Arc<dyn Store>,
    config: Arc<ConnectionConfig>,
    flood: FloodGuard,
    user: Option<UserId>,
    user_name: Option<String>,
    span: Span,
}

impl Session {
    pub(super) fn new(
        handle: Arc<ConnectionHandle>,
        state: ConnState,
        hub: HubHandle,
        store: Arc<dyn Store>,
        config: Arc<ConnectionConfig>,
        span: Span,
    ) -> Self {
        Self {
            id: handle.id(),
            handle,
            state,
            hub,
            store,
            flood: FloodGuard::new(&config.rate_limit),
            config,
            user: None,
            user_name: None,
            span,
        }
    }

    /// Handle one text frame. `Break` means the connection must close.
    pub(super) async fn handle_text(&mut self, text: &str) -> ControlFlow<CloseReason> {
        if text.len() > self.config.limits.max_frame_bytes {
            return self.fail("oversized", HandlerError::FrameTooLarge(text.len()));
        }

        match self.flood.check() {
            FloodCheck::Ok => {}
            FloodCheck::RateLimited { strikes } => {
                crate::metrics::record_rate_limited();
                debug!(conn = %self.id, strikes, "Frame rate limited");
                return self.fail("rate_limited", HandlerError::RateLimited);
            }
            FloodCheck::Disconnect => {
                crate::metrics::record_rate_limited();
                warn!(conn = %self.id, "Flood limit exceeded, disconnecting");
                return ControlFlow::Break(CloseReason::Flooding);
            }
        }

        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => return self.fail("undecodable", HandlerError::Malformed(e)),
        };

        let name = frame.name();
        let _timer = FrameTimer::new(name);
        match self.dispatch(frame).instrument(spans::frame(name)).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => self.fail(name, e),
        }
    }

    /// Report a handler error to metrics and to the client.
    pub(super) fn fail(&self, frame: &'static str, err: HandlerError) -> ControlFlow<CloseReason> {
        crate::metrics::record_frame_error(frame, err.error_code());
        debug!(conn = %self.id, frame, error = %err, "Frame rejected");
        if let Some(reply) = err.to_reply() {
            self.reply(&reply);
        }
        if err.is_fatal() {
            ControlFlow::Break(CloseReason::ProtocolError)
        } else {
            ControlFlow::Continue(())
        }
    }

    async fn dispatch(&mut self, frame: InboundFrame) -> HandlerResult {
        match frame {
            InboundFrame::Hello { user_id } => self.identify(user_id).await,
            InboundFrame::Join { group_id } => self.join(group_id).await,
            InboundFrame::Leave { group_id } => {
                self.hub.leave_group(self.id, group_id).await?;
                Ok(())
            }
            InboundFrame::Members { group_id } => {
                let user = self.require_user()?;
                if !self.store.is_group_member(group_id, user).await? {
                    return Err(HandlerError::NotGroupMember(group_id));
                }
                let online = self.hub.group_online(group_id);
                self.reply(&OutboundFrame::members(group_id, &online));
                Ok(())
            }
            InboundFrame::Read { notification_id } => {
                let user = self.require_user()?;
                let updated = self
                    .store
                    .mark_notification_read(&notification_id, user)
                    .await?;
                debug!(user_id = user, notification_id, updated, "Notification read");
                Ok(())
            }
            InboundFrame::Ping => {
                self.reply(&OutboundFrame::pong());
                Ok(())
            }
            InboundFrame::Chat(fields) => self.chat(fields).await,
            InboundFrame::Notification(fields) => self.notification(fields).await,
            InboundFrame::Presence(fields) => self.presence(fields).await,
        }
    }

    /// Bind the connection to `user_id` and replay its unread notifications.
    pub(super) async fn identify(&mut self, user_id: UserId) -> HandlerResult {
        if let Some(current) = self.user {
            return Err(HandlerError::AlreadyIdentified(current));
        }
        let record = self
            .store
            .get_user_by_id(user_id)
            .await?
            .ok_or(HandlerError::UnknownUser(user_id))?;

        let outcome = self.hub.bind_user(self.id, user_id).await?;
        self.state = self.state.advance(ConnState::Identified)?;
        self.user = Some(user_id);
        self.user_name = Some(record.name);
        self.span.record("user_id", user_id);

        info!(
            conn = %self.id,
            user_id,
            superseded = ?outcome.superseded,
            newly_online = outcome.newly_online,
            "Connection identified"
        );
        let mut online = self.hub.online_users();
        online.retain(|u| *u != user_id);
        self.reply(&OutboundFrame::connected(user_id, &online));
        self.replay_backlog(user_id).await;
        Ok(())
    }

    async fn replay_backlog(&self, user_id: UserId) {
        let backlog = match self
            .store
            .get_notifications_by_receiver(user_id, self.config.limits.notification_backlog)
            .await
        {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to load notification backlog");
                return;
            }
        };

        // Stored newest first; replay in the order they were sent.
        for record in backlog.iter().rev() {
            let frame = OutboundFrame::ok(FrameType::Notification, json!(record.to_payload()));
            if self.handle.send_frame(&frame).is_err() {
                warn!(user_id, "Outbound queue full, notification replay cut short");
                break;
            }
        }
        if !backlog.is_empty() {
            debug!(user_id, count = backlog.len(), "Notification backlog replayed");
        }
    }

    async fn join(&mut self, group_id: GroupId) -> HandlerResult {
        let user = self.require_user()?;
        if !self.store.is_group_member(group_id, user).await? {
            return Err(HandlerError::NotGroupMember(group_id));
        }
        let joined = self.hub.join_group(self.id, group_id).await?;
        debug!(conn = %self.id, user_id = user, group_id, joined, "Join handled");
        Ok(())
    }

    async fn chat(&mut self, fields: EnvelopeFields) -> HandlerResult {
        let sender = self.sender(&fields)?;
        let mut envelope = self.addressed(EnvelopeKind::Chat, sender, &fields)?;
        if fields.content.is_empty() {
            return Err(EnvelopeError::Malformed("content is empty".into()).into());
        }
        if let Target::User(receiver) = envelope.target {
            self.require_known(receiver).await?;
        }

        let message = ChatMessage::new(sender, fields.receiver_id, fields.group_id, fields.content);
        self.store.save_message(&message).await?;

        envelope.payload = json!(message.to_payload(self.user_name.clone()));
        self.hub.deliver(envelope).await?;
        Ok(())
    }

    async fn notification(&mut self, fields: EnvelopeFields) -> HandlerResult {
        let sender = self.sender(&fields)?;
        let mut envelope = self.addressed(EnvelopeKind::Notification, sender, &fields)?;
        let alarm_type = fields
            .alarm_type
            .unwrap_or_else(|| DEFAULT_ALARM_TYPE.to_string());

        envelope.payload = match envelope.target {
            Target::User(receiver) => {
                self.require_known(receiver).await?;
                let record = NotificationRecord::new(
                    Some(sender),
                    receiver,
                    alarm_type,
                    fields.title,
                    fields.content,
                );
                self.store.save_notification(&record).await?;
                if !self.hub.is_online(receiver) {
                    debug!(receiver, id = %record.id, "Receiver offline, notification kept for replay");
                }
                json!(record.to_payload())
            }
            // Group notifications are transient: there is no single receiver row.
            _ => json!({
                "sender_id": sender,
                "group_id": fields.group_id,
                "alarm_type": alarm_type,
                "title": fields.title,
                "content": fields.content,
            }),
        };
        self.hub.deliver(envelope).await?;
        Ok(())
    }

    async fn presence(&mut self, fields: EnvelopeFields) -> HandlerResult {
        let sender = self.sender(&fields)?;
        let status = (!fields.content.is_empty()).then_some(fields.content);
        let payload = PresencePayload {
            user_id: sender,
            is_online: true,
            status,
        };
        let envelope = Envelope::new(
            EnvelopeKind::Presence,
            Some(sender),
            fields.receiver_id,
            fields.group_id,
            json!(payload),
        )?;
        self.hub.deliver(envelope).await?;
        Ok(())
    }

    fn require_user(&self) -> Result<UserId, HandlerError> {
        self.user.ok_or(HandlerError::NotIdentified)
    }

    /// The connection's user, checked against any sender the frame claims.
    fn sender(&self, fields: &EnvelopeFields) -> Result<UserId, HandlerError> {
        let actual = self.require_user()?;
        match fields.sender_id {
            Some(claimed) if claimed != actual => {
                Err(HandlerError::SenderMismatch { claimed, actual })
            }
            _ => Ok(actual),
        }
    }

    /// Validate addressing before anything is persisted.
    fn addressed(
        &self,
        kind: EnvelopeKind,
        sender: UserId,
        fields: &EnvelopeFields,
    ) -> Result<Envelope, HandlerError> {
        let envelope = Envelope::new(
            kind,
            Some(sender),
            fields.receiver_id,
            fields.group_id,
            json!({}),
        )?;
        Ok(envelope)
    }

    async fn require_known(&self, user: UserId) -> HandlerResult {
        match self.store.get_user_by_id(user).await? {
            Some(_) => Ok(()),
            None => Err(HandlerError::UnknownUser(user)),
        }
    }

    fn reply(&self, frame: &OutboundFrame) {
        if let Err(e) = self.handle.send_frame(frame) {
            debug!(conn = %self.id, error = %e, "Dropped reply");
        }
    }
}
