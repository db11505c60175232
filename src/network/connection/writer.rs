//! Outbound half of a connection.
//!
//! Drains the connection's queue onto the socket and sends keepalive pings.
//! Every write is bounded by the write timeout; a write that fails or stalls
//! closes the handle, which in turn stops the reader.

use futures_util::{Sink, SinkExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, warn};

use crate::hub::{CloseReason, ConnectionHandle, Outbound};

pub(super) struct WriterSettings {
    pub write_timeout: Duration,
    pub ping_interval: Duration,
}

enum Step {
    Continue,
    Done,
}

pub(super) async fn run<Si>(
    mut sink: Si,
    mut rx: mpsc::Receiver<Outbound>,
    handle: Arc<ConnectionHandle>,
    settings: WriterSettings,
) where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let write_timeout = settings.write_timeout;
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        tokio::select! {
            biased;

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                match write_outbound(&mut sink, msg, write_timeout).await {
                    Ok(Step::Continue) => {}
                    Ok(Step::Done) => break,
                    Err(()) => {
                        handle.close(CloseReason::WriteFailed);
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if write(&mut sink, Message::Ping(Vec::new()), write_timeout).await.is_err() {
                    handle.close(CloseReason::WriteFailed);
                    break;
                }
            }

            _ = handle.cancelled() => {
                // Flush whatever close() queued, bounded as one write.
                let drained = timeout(write_timeout, drain(&mut sink, &mut rx)).await;
                if drained.is_err() {
                    debug!(conn = %handle.id(), "Gave up draining outbound queue");
                }
                break;
            }
        }
    }

    let _ = timeout(write_timeout, sink.close()).await;
}

async fn drain<Si>(sink: &mut Si, rx: &mut mpsc::Receiver<Outbound>)
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    while let Ok(msg) = rx.try_recv() {
        let msg = to_message(msg);
        let is_close = matches!(msg, Message::Close(_));
        if sink.send(msg).await.is_err() || is_close {
            return;
        }
    }
}

async fn write_outbound<Si>(sink: &mut Si, msg: Outbound, limit: Duration) -> Result<Step, ()>
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    let msg = to_message(msg);
    let step = if matches!(msg, Message::Close(_)) {
        Step::Done
    } else {
        Step::Continue
    };
    write(sink, msg, limit).await.map(|()| step)
}

async fn write<Si>(sink: &mut Si, msg: Message, limit: Duration) -> Result<(), ()>
where
    Si: Sink<Message, Error = WsError> + Unpin,
{
    match timeout(limit, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Socket write failed");
            Err(())
        }
        Err(_) => {
            warn!(timeout_ms = limit.as_millis() as u64, "Socket write timed out");
            Err(())
        }
    }
}

fn to_message(msg: Outbound) -> Message {
    match msg {
        Outbound::Text(text) => Message::Text(text.to_string()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}
