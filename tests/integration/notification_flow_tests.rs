// ============================================
// tests/integration/notification_flow_tests.rs
// ============================================
//! End-to-end tests for `/ws/notifications`.

use crate::test_utils::{
    assert_silent, connect, connect_notifications, eventually, next_json,
    next_message_with_timeout, spawn_server, test_settings, token_for,
};
use futures_util::SinkExt;
use ridelink_common::{Notification, NotificationKind};
use ridelink_realtime::liveness::Sweep;
use ridelink_realtime::session::CLOSE_HANDSHAKE_TIMEOUT;
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

fn expect_close(message: Message, code: u16, reason: &str) {
    match message {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), code);
            assert_eq!(frame.reason.as_str(), reason);
        },
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_token_is_rejected_with_policy_violation() {
    let (addr, state) = spawn_server(test_settings()).await;

    let mut ws = connect(format!("ws://{addr}/ws/notifications")).await;
    let frame = next_message_with_timeout(&mut ws, 5, "missing token close").await;
    expect_close(frame, 1008, "Authentication required");

    let mut ws = connect(format!("ws://{addr}/ws/notifications?token=")).await;
    let frame = next_message_with_timeout(&mut ws, 5, "empty token close").await;
    expect_close(frame, 1008, "Authentication required");

    assert_eq!(state.notifications.connection_count(), 0);
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let (addr, state) = spawn_server(test_settings()).await;

    let mut ws = connect_notifications(addr, "garbage").await;
    let frame = next_message_with_timeout(&mut ws, 5, "invalid token close").await;
    expect_close(frame, 1008, "Invalid token");
    assert!(!state.notifications.is_user_connected("garbage"));
}

#[tokio::test]
async fn test_connected_frame_then_push() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut ws = connect_notifications(addr, &token_for("rider-1")).await;

    let hello = next_json(&mut ws, "connected frame").await;
    assert_eq!(
        hello,
        json!({"type": "connected", "message": "Connected to notification service"})
    );
    assert!(state.notifications.is_user_connected("rider-1"));

    let notification = Notification::new(
        "rider-1",
        NotificationKind::RideAccepted,
        "Ride accepted",
        "Your driver is on the way",
    )
    .with_data("rideId", "ride-42");
    assert!(state.notifications.push_to_user("rider-1", &notification));

    let frame = next_json(&mut ws, "notification frame").await;
    assert_eq!(frame["type"], "notification");
    assert_eq!(frame["data"]["id"], notification.id.as_str());
    assert_eq!(frame["data"]["userId"], "rider-1");
    assert_eq!(frame["data"]["type"], "ride_accepted");
    assert_eq!(frame["data"]["title"], "Ride accepted");
    assert_eq!(frame["data"]["read"], false);
    assert_eq!(frame["data"]["data"]["rideId"], "ride-42");
    assert!(frame["data"]["createdAt"].is_string());

    // Nobody else is connected
    assert!(!state.notifications.push_to_user("rider-2", &notification));
}

#[tokio::test]
async fn test_push_reaches_every_connection_of_the_user() {
    let (addr, state) = spawn_server(test_settings()).await;
    let token = token_for("rider-1");
    let mut phone = connect_notifications(addr, &token).await;
    let mut tablet = connect_notifications(addr, &token).await;
    let mut other = connect_notifications(addr, &token_for("rider-2")).await;
    for ws in [&mut phone, &mut tablet, &mut other] {
        next_json(ws, "connected frame").await;
    }
    assert_eq!(state.notifications.connection_count_for("rider-1"), 2);
    assert_eq!(state.notifications.connected_user_count(), 2);

    let notification = Notification::new("rider-1", NotificationKind::ChatMessage, "New message", "hi");
    assert!(state.notifications.push_to_user("rider-1", &notification));

    for ws in [&mut phone, &mut tablet] {
        let frame = next_json(ws, "fan-out").await;
        assert_eq!(frame["data"]["id"], notification.id.as_str());
    }
    assert_silent(&mut other, 200).await;
}

#[tokio::test]
async fn test_broadcast_reaches_all_users() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut a = connect_notifications(addr, &token_for("a")).await;
    let mut b = connect_notifications(addr, &token_for("b")).await;
    next_json(&mut a, "connected a").await;
    next_json(&mut b, "connected b").await;

    let notification = Notification::new("", NotificationKind::System, "Maintenance", "Tonight");
    assert_eq!(state.notifications.broadcast(&notification), 2);

    assert_eq!(next_json(&mut a, "broadcast a").await["data"]["type"], "system");
    assert_eq!(next_json(&mut b, "broadcast b").await["data"]["type"], "system");
}

#[tokio::test]
async fn test_client_close_unregisters() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut ws = connect_notifications(addr, &token_for("rider-1")).await;
    next_json(&mut ws, "connected frame").await;

    // Inbound frames are ignored
    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    ws.close(None).await.unwrap();

    let notifications = state.notifications.clone();
    eventually(|| !notifications.is_user_connected("rider-1"), "unregister").await;
}

#[tokio::test]
async fn test_disconnect_user_sends_normal_close() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut ws = connect_notifications(addr, &token_for("rider-1")).await;
    next_json(&mut ws, "connected frame").await;

    assert_eq!(state.notifications.disconnect_user("rider-1", "Signed out"), 1);
    let frame = next_message_with_timeout(&mut ws, 5, "server close").await;
    expect_close(frame, 1000, "Signed out");
    assert!(!state.notifications.is_user_connected("rider-1"));
}

#[tokio::test]
async fn test_disconnect_user_drops_peer_that_ignores_close() {
    let (addr, state) = spawn_server(test_settings()).await;

    // A bare TCP client that completes the upgrade and then never reads or
    // writes a WebSocket frame, so it can never answer the close.
    let mut raw = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /ws/notifications?token={} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n",
        token_for("rider-1")
    );
    raw.write_all(request.as_bytes()).await.unwrap();

    let notifications = state.notifications.clone();
    eventually(|| notifications.is_user_connected("rider-1"), "registration").await;
    assert_eq!(state.notifications.disconnect_user("rider-1", "Banned"), 1);

    // The server gives up on the handshake and drops the transport: EOF.
    let mut received = Vec::new();
    let read = tokio::time::timeout(
        CLOSE_HANDSHAKE_TIMEOUT + Duration::from_secs(3),
        raw.read_to_end(&mut received),
    )
    .await;
    assert!(read.is_ok(), "server kept the silent socket open");
    assert!(received.starts_with(b"HTTP/1.1 101"));
}

#[tokio::test]
async fn test_unresponsive_client_is_reaped() {
    let (addr, state) = spawn_server(test_settings()).await;
    let mut ws = connect_notifications(addr, &token_for("rider-1")).await;
    next_json(&mut ws, "connected frame").await;

    // The client stack answers pings only while it is being polled. We stop
    // reading, so the pong never comes.
    let first = state.notifications.sweep_liveness();
    assert_eq!(first.pinged, 1);
    let second = state.notifications.sweep_liveness();
    assert_eq!(second.reaped, 1);
    assert!(!state.notifications.is_user_connected("rider-1"));
}
