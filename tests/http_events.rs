//! Integration tests for the HTTP side-channel.

mod common;

use common::TestServer;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// The HTTP listener starts alongside the WebSocket one; give it a moment.
async fn connect(port: u16) -> TcpStream {
    for _ in 0..20 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("HTTP port {port} never opened");
}

/// Minimal HTTP/1.1 exchange; returns the status code and body.
async fn request(port: u16, method: &str, path: &str, body: Option<Value>) -> (u16, String) {
    let mut stream = connect(port).await;
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes()).await.unwrap();

    let mut raw = String::new();
    stream.read_to_string(&mut raw).await.unwrap();
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("No status line");
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    (status, body)
}

#[tokio::test]
async fn test_service_event_reaches_user() {
    let server = TestServer::spawn_with(19601, 19602, "")
        .await
        .expect("Failed to spawn test server");
    let mut bob = server.connect_as(2).await.unwrap();

    let (status, body) = request(
        19602,
        "POST",
        "/events",
        Some(json!({
            "type": "notification",
            "receiver_id": 2,
            "payload": {"title": "Invoice paid", "content": "#1042"}
        })),
    )
    .await;
    assert_eq!(status, 202, "body: {body}");

    let frame = bob.expect_type("notification").await.unwrap();
    assert_eq!(frame["payload"]["title"], "Invoice paid");
}

#[tokio::test]
async fn test_ambiguous_event_is_rejected() {
    let server = TestServer::spawn_with(19603, 19604, "")
        .await
        .expect("Failed to spawn test server");
    let _alice = server.connect_as(1).await.unwrap();

    let (status, _) = request(
        19604,
        "POST",
        "/events",
        Some(json!({"type": "chat", "receiver_id": 1, "group_id": 10, "payload": {}})),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_health_and_metrics() {
    let server = TestServer::spawn_with(19605, 19606, "")
        .await
        .expect("Failed to spawn test server");
    let _alice = server.connect_as(1).await.unwrap();

    // The snapshot is published right after the bind is acknowledged.
    let mut health = String::new();
    for _ in 0..20 {
        let (status, body) = request(19606, "GET", "/health", None).await;
        assert_eq!(status, 200);
        health = body;
        if health.contains("\"online_users\":1") {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(health.contains("\"online_users\":1"), "body: {health}");

    let (status, body) = request(19606, "GET", "/metrics", None).await;
    assert_eq!(status, 200);
    assert!(body.contains("hub_connections"));
}
