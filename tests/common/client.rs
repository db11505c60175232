//! Test WebSocket client.
//!
//! Sends JSON frames and asserts on the frames the hub sends back.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// A test hub client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect to a test server, optionally carrying `?user_id=`.
    pub async fn connect(address: &str, user_id: Option<u64>) -> anyhow::Result<Self> {
        let url = match user_id {
            Some(id) => format!("ws://{address}/ws?user_id={id}"),
            None => format!("ws://{address}/ws"),
        };
        let (ws, _response) = connect_async(url).await?;
        Ok(Self { ws })
    }

    /// Send a JSON frame.
    pub async fn send(&mut self, frame: Value) -> anyhow::Result<()> {
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send raw text, valid JSON or not.
    pub async fn send_raw(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive a single JSON frame from the server.
    pub async fn recv(&mut self) -> anyhow::Result<Value> {
        self.recv_timeout(Duration::from_secs(5)).await
    }

    /// Receive a JSON frame with a timeout, skipping control frames.
    pub async fn recv_timeout(&mut self, dur: Duration) -> anyhow::Result<Value> {
        loop {
            let msg = timeout(dur, self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(frame) => anyhow::bail!("server closed: {frame:?}"),
                _ => continue,
            }
        }
    }

    /// Receive frames until one of `kind` arrives; returns that frame.
    pub async fn expect_type(&mut self, kind: &str) -> anyhow::Result<Value> {
        loop {
            let frame = self.recv().await?;
            if frame["type"] == kind {
                return Ok(frame);
            }
        }
    }

    /// Assert that nothing of `kind` arrives within `dur`.
    pub async fn expect_silence(&mut self, kind: &str, dur: Duration) -> anyhow::Result<()> {
        loop {
            match self.recv_timeout(dur).await {
                Ok(frame) if frame["type"] == kind => {
                    anyhow::bail!("unexpected {kind} frame: {frame}")
                }
                Ok(_) => continue,
                Err(_) => return Ok(()),
            }
        }
    }

    /// Wait for the server to close the connection; returns the close code.
    pub async fn expect_close(&mut self) -> anyhow::Result<Option<u16>> {
        loop {
            let next = timeout(Duration::from_secs(5), self.ws.next()).await?;
            match next {
                Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return Ok(None),
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
