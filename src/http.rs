//! HTTP side-channel.
//!
//! Runs on a separate tokio task next to the WebSocket gateway:
//! - `GET /metrics` - Prometheus text format
//! - `GET /health` - registry counts from the latest snapshot
//! - `GET /online` and `GET /groups/{id}/online` - online user ids
//! - `POST /events` - lets backend services push envelopes into the hub

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;

use crate::error::HubError;
use crate::hub::HubHandle;
use crate::protocol::{Envelope, EnvelopeKind, GroupId, Target, UserId};

#[derive(Clone)]
pub struct HttpState {
    pub hub: HubHandle,
    pub server_name: String,
}

/// Body of `POST /events`.
#[derive(Debug, Deserialize)]
pub struct ServiceEvent {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub receiver_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub payload: Value,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let snapshot = state.hub.snapshot();
    Json(json!({
        "status": "ok",
        "server": state.server_name,
        "connections": snapshot.connection_count(),
        "online_users": snapshot.user_count(),
        "groups": snapshot.group_count(),
    }))
}

async fn online(State(state): State<HttpState>) -> Json<Value> {
    Json(json!({ "online_users": state.hub.online_users() }))
}

async fn group_online(
    State(state): State<HttpState>,
    Path(group_id): Path<GroupId>,
) -> Json<Value> {
    Json(json!({
        "group_id": group_id,
        "online_users": state.hub.group_online(group_id),
    }))
}

async fn publish_event(
    State(state): State<HttpState>,
    Json(event): Json<ServiceEvent>,
) -> (StatusCode, Json<Value>) {
    let envelope = match Envelope::new(
        event.kind,
        None,
        event.receiver_id,
        event.group_id,
        event.payload,
    ) {
        Ok(envelope) => envelope,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": e.to_string()})),
            );
        }
    };

    let hub = &state.hub;
    let result = match envelope.target {
        Target::User(user) => {
            hub.send_message_to_user(user, envelope.kind, envelope.payload)
                .await
        }
        Target::Group(group) => {
            hub.send_group_message(group, envelope.kind, envelope.payload)
                .await
        }
        Target::Broadcast => hub.broadcast_message(envelope.kind, envelope.payload).await,
    };

    match result {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({"success": true}))),
        Err(e) => {
            let status = match e {
                HubError::QueueSaturated | HubError::Stopped => StatusCode::SERVICE_UNAVAILABLE,
                HubError::UnknownConnection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(json!({"success": false, "message": e.to_string()})),
            )
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health))
        .route("/online", get(online))
        .route("/groups/:id/online", get(group_online))
        .route("/events", post(publish_event))
        .with_state(state)
}

/// Run the HTTP server.
///
/// Binds to `0.0.0.0:port`. This is a long-running task that should be
/// spawned in the background.
pub async fn run_http_server(port: u16, state: HttpState) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };
    tracing::info!(%addr, "HTTP server listening");

    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %e, "HTTP server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubLimits;
    use crate::hub::{ConnectionHandle, Outbound};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn state() -> HttpState {
        let (hub, _task) = crate::hub::spawn(&HubLimits::default());
        HttpState {
            hub,
            server_name: "test".into(),
        }
    }

    #[tokio::test]
    async fn events_reach_the_addressed_user() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(state.hub.next_conn_id(), tx);
        state.hub.register(Arc::clone(&handle)).await.unwrap();
        state.hub.bind_user(handle.id(), 5).await.unwrap();

        let event = ServiceEvent {
            kind: EnvelopeKind::Notification,
            receiver_id: Some(5),
            group_id: None,
            payload: json!({"title": "order shipped"}),
        };
        let (status, body) = publish_event(State(state.clone()), Json(event)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.0["success"], true);

        state.hub.flush().await.unwrap();
        match rx.try_recv() {
            Ok(Outbound::Text(text)) => {
                let frame: Value = serde_json::from_str(&text).unwrap();
                assert_eq!(frame["type"], "notification");
                assert_eq!(frame["payload"]["title"], "order shipped");
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ambiguous_event_is_a_bad_request() {
        let event = ServiceEvent {
            kind: EnvelopeKind::Chat,
            receiver_id: Some(1),
            group_id: Some(2),
            payload: json!({}),
        };
        let (status, body) = publish_event(State(state()), Json(event)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.0["success"], false);
    }

    #[tokio::test]
    async fn health_reports_registry_counts() {
        let state = state();
        let (tx, _rx) = mpsc::channel(8);
        let handle = ConnectionHandle::new(state.hub.next_conn_id(), tx);
        state.hub.register(handle).await.unwrap();
        state.hub.flush().await.unwrap();

        let Json(body) = health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 1);
        assert_eq!(body["online_users"], 0);
    }

    #[tokio::test]
    async fn online_queries_read_the_snapshot() {
        let state = state();
        let mut receivers = Vec::new();
        for user in [4, 9] {
            let (tx, rx) = mpsc::channel(8);
            let handle = ConnectionHandle::new(state.hub.next_conn_id(), tx);
            state.hub.register(Arc::clone(&handle)).await.unwrap();
            state.hub.bind_user(handle.id(), user).await.unwrap();
            if user == 9 {
                state.hub.join_group(handle.id(), 30).await.unwrap();
            }
            receivers.push(rx);
        }
        state.hub.flush().await.unwrap();

        let Json(body) = online(State(state.clone())).await;
        assert_eq!(body["online_users"], json!([4, 9]));

        let Json(body) = group_online(State(state.clone()), Path(30)).await;
        assert_eq!(body["group_id"], 30);
        assert_eq!(body["online_users"], json!([9]));

        let Json(body) = group_online(State(state), Path(31)).await;
        assert_eq!(body["online_users"], json!([]));
    }

    #[test]
    fn event_body_shape() {
        let event: ServiceEvent = serde_json::from_str(
            r#"{"type":"chat","group_id":10,"payload":{"content":"deploy done"}}"#,
        )
        .unwrap();
        assert_eq!(event.kind, EnvelopeKind::Chat);
        assert_eq!(event.group_id, Some(10));
        assert!(event.receiver_id.is_none());
    }
}
