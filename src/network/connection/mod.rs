//! One client connection.
//!
//! The connection task owns the socket. It registers a [`ConnectionHandle`]
//! with the hub, spawns a writer that drains the handle's queue, and reads
//! frames until the client goes away, the handle is closed by the hub, or the
//! idle timeout fires. Teardown always ends in a deregistration.

mod dispatch;
mod lifecycle;
mod writer;

pub use lifecycle::{ConnState, LifecycleError};

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{Instrument, Span, debug, info, warn};

use crate::config::{Config, HubLimits, IdleTimeoutsConfig, RateLimitConfig};
use crate::db::Store;
use crate::error::HandlerError;
use crate::hub::{CloseReason, ConnId, ConnectionHandle, HubHandle};
use crate::protocol::UserId;
use crate::telemetry::spans;
use dispatch::Session;
use writer::WriterSettings;

/// Extra time the writer gets to flush its close frame during teardown.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Per-connection settings, shared by every connection task.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub limits: HubLimits,
    pub idle: IdleTimeoutsConfig,
    pub rate_limit: RateLimitConfig,
}

impl ConnectionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limits: config.hub.clone(),
            idle: config.idle_timeouts.clone(),
            rate_limit: config.rate_limit.clone(),
        }
    }
}

pub struct Connection<S> {
    id: ConnId,
    addr: SocketAddr,
    ws: WebSocketStream<S>,
    hub: HubHandle,
    store: Arc<dyn Store>,
    config: Arc<ConnectionConfig>,
    /// Identity carried on the upgrade request, if any.
    handshake_user: Option<UserId>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        id: ConnId,
        addr: SocketAddr,
        ws: WebSocketStream<S>,
        hub: HubHandle,
        store: Arc<dyn Store>,
        config: Arc<ConnectionConfig>,
        handshake_user: Option<UserId>,
    ) -> Self {
        Self {
            id,
            addr,
            ws,
            hub,
            store,
            config,
            handshake_user,
        }
    }

    /// Run the connection to completion.
    pub async fn run(self) -> Result<CloseReason, HandlerError> {
        let span = spans::connection(self.id, self.addr);
        self.serve(span.clone()).instrument(span).await
    }

    async fn serve(self, span: Span) -> Result<CloseReason, HandlerError> {
        let Connection {
            id,
            ws,
            hub,
            store,
            config,
            handshake_user,
            ..
        } = self;

        let (tx, rx) = mpsc::channel(config.limits.outbound_queue_capacity.max(1));
        let handle = ConnectionHandle::new(id, tx);
        let state = ConnState::Created;
        hub.register(Arc::clone(&handle)).await?;
        let state = state.advance(ConnState::Registered)?;
        info!("Connection registered");

        let (sink, mut stream) = ws.split();
        let writer = tokio::spawn(
            writer::run(
                sink,
                rx,
                Arc::clone(&handle),
                WriterSettings {
                    write_timeout: config.limits.write_timeout(),
                    ping_interval: config.idle.ping_interval(),
                },
            )
            .in_current_span(),
        );

        let mut session = Session::new(
            Arc::clone(&handle),
            state,
            hub.clone(),
            store,
            Arc::clone(&config),
            span,
        );

        let reason = match handshake_user {
            Some(user) => match session.identify(user).await {
                Ok(()) => None,
                Err(e) => session.fail("hello", e).break_value(),
            },
            None => None,
        };
        let reason = match reason {
            Some(reason) => reason,
            None => read_loop(&mut session, &mut stream, config.idle.idle_timeout()).await,
        };

        session.state = session.state.advance(ConnState::Closing)?;
        // The hub may have closed it first; that reason wins.
        handle.close(reason);
        let reason = handle.close_reason().unwrap_or(reason);
        if let Err(e) = hub.deregister(id, reason).await {
            debug!(error = %e, "Deregister after hub stop");
        }

        let writer_deadline = config.limits.write_timeout() + WRITER_GRACE;
        if tokio::time::timeout(writer_deadline, writer).await.is_err() {
            warn!("Writer did not finish in time");
        }
        session.state = session.state.advance(ConnState::Closed)?;
        info!(reason = reason.as_str(), "Connection closed");
        Ok(reason)
    }
}

async fn read_loop<St>(session: &mut Session, stream: &mut St, idle_timeout: Duration) -> CloseReason
where
    St: futures_util::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let handle = Arc::clone(&session.handle);
    loop {
        let next = tokio::select! {
            _ = handle.cancelled() => {
                return handle.close_reason().unwrap_or(CloseReason::ClientClosed);
            }
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(idle_secs = idle_timeout.as_secs(), "Idle timeout");
                return CloseReason::IdleTimeout;
            }
            Ok(None) => return CloseReason::ClientClosed,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "Read error");
                return match e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_) => {
                        CloseReason::ClientClosed
                    }
                    _ => CloseReason::ProtocolError,
                };
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if let ControlFlow::Break(reason) = session.handle_text(&text).await {
                    return reason;
                }
            }
            Message::Binary(_) => {
                if let ControlFlow::Break(reason) = session.fail("binary", HandlerError::BinaryFrame) {
                    return reason;
                }
            }
            Message::Close(_) => return CloseReason::ClientClosed,
            // Pings are answered by tungstenite; both count as activity.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}
