//! Socket driver shared by both endpoints.
//!
//! Splits the socket into a writer task that drains the connection's outbound
//! queue and a reader loop that feeds pongs to the liveness flag and text
//! frames to a [`FrameHandler`]. The loop ends on close, transport error, end
//! of stream or [`Connection::terminate`], or when a server-initiated close is
//! not answered within [`CLOSE_HANDSHAKE_TIMEOUT`]. The handler's `on_close`
//! runs in every case.

use crate::connection::Connection;
use crate::metrics::{WS_ACTIVE, WS_DISCONNECTION};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a graceful close may take to flush queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
/// How long the peer has to answer a server-initiated close
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Endpoint-specific handling of inbound frames
pub trait FrameHandler: Send + Sync + 'static {
    /// One inbound text frame. Runs on the connection's own task, so calls
    /// for the same connection never overlap.
    fn on_text(&self, conn: &Connection, text: &str);

    /// The connection is gone, whatever the reason.
    fn on_close(&self, conn: &Connection);
}

/// Drive `socket` until it closes.
pub async fn drive<H: FrameHandler>(
    socket: WebSocket,
    conn: Connection,
    outbound: mpsc::UnboundedReceiver<Message>,
    handler: H,
) {
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(writer_task(sink, outbound));
    gauge!(WS_ACTIVE).increment(1.0);

    let close_deadline = tokio::time::sleep(CLOSE_HANDSHAKE_TIMEOUT);
    tokio::pin!(close_deadline);
    let mut closing = false;
    let mut terminated = false;
    loop {
        tokio::select! {
            () = conn.terminated() => {
                terminated = true;
                break;
            }
            () = conn.close_requested(), if !closing => {
                closing = true;
                close_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + CLOSE_HANDSHAKE_TIMEOUT);
            }
            () = &mut close_deadline, if closing => {
                tracing::debug!(connection_id = %conn.id(), "Peer did not answer close, dropping transport");
                terminated = true;
                break;
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => handler.on_text(&conn, text.as_str()),
                Some(Ok(Message::Pong(_))) => conn.liveness().mark_alive(),
                Some(Ok(Message::Binary(data))) => {
                    tracing::debug!(connection_id = %conn.id(), len = data.len(), "Ignoring binary frame");
                },
                // Pings are answered by the protocol layer
                Some(Ok(Message::Ping(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(connection_id = %conn.id(), frame = ?frame, "Close frame received");
                    break;
                },
                Some(Err(e)) => {
                    tracing::warn!(connection_id = %conn.id(), error = %e, "WebSocket receive error");
                    break;
                },
                None => break,
            }
        }
    }

    handler.on_close(&conn);
    drop(handler);

    if terminated {
        writer.abort();
    } else {
        // Once every handle is gone the writer drains and closes the sink.
        drop(conn);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
    }

    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "WebSocket send failed");
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}
