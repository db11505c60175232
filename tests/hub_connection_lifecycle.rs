//! Integration tests for connection lifecycle.
//!
//! Tests identifying, superseding, keepalive and disconnecting against a
//! real linkhubd process.

mod common;

use common::TestServer;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_handshake_identity_and_ping() {
    let server = TestServer::spawn(19401)
        .await
        .expect("Failed to spawn test server");

    let mut client = server.connect_as(1).await.expect("Failed to connect");
    client
        .send(json!({"type": "ping"}))
        .await
        .expect("Failed to send ping");
    let pong = client.expect_type("pong").await.expect("No pong");
    assert_eq!(pong["success"], true);
}

#[tokio::test]
async fn test_hello_frame_identifies() {
    let server = TestServer::spawn(19402)
        .await
        .expect("Failed to spawn test server");

    let mut client = server
        .connect_anonymous()
        .await
        .expect("Failed to connect");
    client
        .send(json!({"type": "hello", "user_id": 2}))
        .await
        .unwrap();
    let ack = client.expect_type("connection").await.unwrap();
    assert_eq!(ack["success"], true);
    assert_eq!(ack["message"], "user 2 connected");
    assert_eq!(ack["payload"]["online_users"], json!([]));

    // A second hello on the same connection is refused.
    client
        .send(json!({"type": "hello", "user_id": 3}))
        .await
        .unwrap();
    let err = client.expect_type("error").await.unwrap();
    assert_eq!(err["message"], "connection is already identified as user 2");
}

#[tokio::test]
async fn test_unknown_user_is_refused() {
    let server = TestServer::spawn(19403)
        .await
        .expect("Failed to spawn test server");

    let mut client = server.connect_anonymous().await.unwrap();
    client
        .send(json!({"type": "hello", "user_id": 999}))
        .await
        .unwrap();
    let err = client.expect_type("error").await.unwrap();
    assert_eq!(err["message"], "unknown user 999");
}

#[tokio::test]
async fn test_reconnect_supersedes_old_session() {
    let server = TestServer::spawn(19404)
        .await
        .expect("Failed to spawn test server");

    let mut watcher = server.connect_as(2).await.unwrap();
    let mut first = server.connect_as(1).await.unwrap();
    let online = watcher.expect_type("presence").await.unwrap();
    assert_eq!(online["payload"]["user_id"], 1);
    assert_eq!(online["payload"]["is_online"], true);

    let mut second = server.connect_as(1).await.unwrap();

    let notice = first.expect_type("close").await.unwrap();
    assert_eq!(notice["success"], false);
    assert_eq!(notice["message"], "signed in from another device");
    assert_eq!(first.expect_close().await.unwrap(), Some(1008));

    // User 1 never went offline, so the watcher sees no presence flap.
    watcher
        .expect_silence("presence", Duration::from_millis(300))
        .await
        .unwrap();

    // The new session receives traffic.
    watcher
        .send(json!({"type": "chat", "receiver_id": 1, "content": "still there?"}))
        .await
        .unwrap();
    let chat = second.expect_type("chat").await.unwrap();
    assert_eq!(chat["payload"]["content"], "still there?");
}

#[tokio::test]
async fn test_disconnect_announces_offline() {
    let server = TestServer::spawn(19405)
        .await
        .expect("Failed to spawn test server");

    let mut bob = server.connect_as(2).await.unwrap();
    let alice = server.connect_as(1).await.unwrap();
    bob.expect_type("presence").await.unwrap();

    alice.close().await.unwrap();
    let offline = bob.expect_type("presence").await.unwrap();
    assert_eq!(offline["payload"]["user_id"], 1);
    assert_eq!(offline["payload"]["is_online"], false);
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let server = TestServer::spawn(19406)
        .await
        .expect("Failed to spawn test server");

    let mut client = server.connect_as(1).await.unwrap();
    client.send_raw("this is not json").await.unwrap();
    let err = client.expect_type("error").await.unwrap();
    assert_eq!(err["success"], false);
    assert!(
        err["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid message format")
    );

    client.send(json!({"type": "ping"})).await.unwrap();
    client.expect_type("pong").await.unwrap();
}

#[tokio::test]
async fn test_idle_connection_is_dropped() {
    let server = TestServer::spawn_with(
        19407,
        0,
        r#"
[idle_timeouts]
ping = 5
timeout = 6
"#,
    )
    .await
    .expect("Failed to spawn test server");

    // The client does not read, so it never answers the server's pings.
    let mut client = server.connect_anonymous().await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    let code = client.expect_close().await.unwrap();
    assert_eq!(code, Some(1011));
}
