//! Gateway - TCP listener that upgrades incoming clients to WebSocket.
//!
//! The Gateway binds the listen socket and spawns a Connection task for each
//! client that completes the handshake. Origin checks and the optional
//! `?user_id=` identity both come from the upgrade request.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{error, info, instrument, warn};

use crate::config::ListenConfig;
use crate::db::Store;
use crate::hub::HubHandle;
use crate::network::{Connection, ConnectionConfig};
use crate::protocol::UserId;

/// The Gateway accepts incoming TCP connections and spawns handlers.
pub struct Gateway {
    listener: TcpListener,
    listen: Arc<ListenConfig>,
    hub: HubHandle,
    store: Arc<dyn Store>,
    config: Arc<ConnectionConfig>,
}

impl Gateway {
    /// Bind the gateway to the configured address.
    pub async fn bind(
        listen: ListenConfig,
        hub: HubHandle,
        store: Arc<dyn Store>,
        config: ConnectionConfig,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen.address).await?;
        info!(address = %listen.address, "WebSocket listener bound");
        Ok(Self {
            listener,
            listen: Arc::new(listen),
            hub,
            store,
            config: Arc::new(config),
        })
    }

    /// Run the accept loop. Only returns if the listener fails.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let listen = Arc::clone(&self.listen);
                    let hub = self.hub.clone();
                    let store = Arc::clone(&self.store);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        serve_socket(stream, addr, listen, hub, store, config).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn serve_socket(
    stream: TcpStream,
    addr: SocketAddr,
    listen: Arc<ListenConfig>,
    hub: HubHandle,
    store: Arc<dyn Store>,
    config: Arc<ConnectionConfig>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let mut handshake_user = None;
    let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = req.headers().get("Origin").and_then(|o| o.to_str().ok());
        if !listen.origin_allowed(origin) {
            warn!(%addr, origin = ?origin, "WebSocket origin rejected");
            let mut reject = ErrorResponse::new(Some("origin not allowed".to_string()));
            *reject.status_mut() = http::StatusCode::FORBIDDEN;
            return Err(reject);
        }
        handshake_user = user_from_query(req.uri().query());
        Ok(response)
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let id = hub.next_conn_id();
    info!(%addr, conn = %id, user_id = ?handshake_user, "WebSocket handshake successful");
    let connection = Connection::new(id, addr, ws, hub, store, config, handshake_user);
    if let Err(e) = connection.run().await {
        error!(conn = %id, %addr, error = %e, "WebSocket connection error");
    }
}

/// Extract `user_id` from the upgrade request's query string.
fn user_from_query(query: Option<&str>) -> Option<UserId> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user_id")
        .and_then(|(_, value)| value.parse().ok())
}
