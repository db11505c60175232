//! linkhubd - real-time WebSocket hub.
//!
//! Keeps one live connection per user, routes chat, notification and
//! presence envelopes to users, groups or everyone, and writes messages
//! through to SQLite before delivery.

mod config;
mod db;
mod error;
mod http;
mod hub;
mod metrics;
mod network;
mod protocol;
mod telemetry;

use crate::config::Config;
use crate::db::{Database, Store};
use crate::network::{ConnectionConfig, Gateway};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Time given to connection writers to flush close frames on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LINKHUB_LOG_FORMAT").is_ok_and(|v| v == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        server = %config.server.name,
        listen = %config.listen.address,
        "Starting linkhubd"
    );

    // Initialize database
    let db = Database::new(&config.database.path).await?;
    db.seed(&config.seed).await?;
    let store: Arc<dyn Store> = Arc::new(db);

    metrics::init();
    info!("Metrics initialized");

    let (hub, hub_task) = hub::spawn(&config.hub);

    // Convention: http_port = 0 disables the HTTP side-channel (used by tests).
    if config.server.http_port == 0 {
        info!("HTTP side-channel disabled");
    } else {
        let state = http::HttpState {
            hub: hub.clone(),
            server_name: config.server.name.clone(),
        };
        let port = config.server.http_port;
        tokio::spawn(async move {
            http::run_http_server(port, state).await;
        });
        info!(port, "HTTP side-channel started");
    }

    let gateway = Gateway::bind(
        config.listen.clone(),
        hub.clone(),
        store,
        ConnectionConfig::from_config(&config),
    )
    .await?;

    tokio::select! {
        result = gateway.run() => {
            if let Err(e) = result {
                error!(error = %e, "Gateway stopped");
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    if let Err(e) = hub.stop().await {
        warn!(error = %e, "Hub already stopped");
    }
    if let Err(e) = hub_task.await {
        error!(error = %e, "Hub control loop panicked");
    }
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!("linkhubd stopped");
    Ok(())
}
