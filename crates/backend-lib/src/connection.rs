//! Handle to one live WebSocket.
//!
//! The socket itself is owned by its driver task (see [`crate::session`]).
//! Everything else talks to it through a cloneable [`Connection`]: frames
//! are queued on an unbounded channel drained by the socket writer, so a
//! send never waits on a slow peer.

use crate::error::AppError;
use crate::liveness::Liveness;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Process-unique connection identifier
pub type ConnectionId = Uuid;

/// Cloneable handle to a live socket
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
    liveness: Liveness,
    closed: AtomicBool,
    kill: Notify,
    closing: Notify,
}

impl Connection {
    /// Create a handle plus the receiving end of its outbound queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                tx,
                liveness: Liveness::new(),
                closed: AtomicBool::new(false),
                kill: Notify::new(),
                closing: Notify::new(),
            }),
        };
        (conn, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn liveness(&self) -> &Liveness {
        &self.inner.liveness
    }

    /// True while frames can still reach the writer and nobody closed us.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::Acquire) && !self.inner.tx.is_closed()
    }

    /// Queue a text frame.
    pub fn send_text(&self, text: impl Into<Utf8Bytes>) -> Result<(), AppError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AppError::ConnectionClosed);
        }
        self.inner.tx.send(Message::Text(text.into()))?;
        Ok(())
    }

    /// Serialize `frame` to JSON and queue it.
    pub fn send_json<T: Serialize>(&self, frame: &T) -> Result<(), AppError> {
        let json = serde_json::to_string(frame)?;
        self.send_text(json)
    }

    /// Queue a transport-level ping.
    pub fn ping(&self) -> Result<(), AppError> {
        self.inner.tx.send(Message::Ping(Bytes::new()))?;
        Ok(())
    }

    /// Start a close handshake. Nothing else is sent afterwards. The socket
    /// driver terminates the connection if the peer does not finish the
    /// handshake in time.
    pub fn close_with(&self, frame: CloseFrame) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let _ = self.inner.tx.send(Message::Close(Some(frame)));
            self.inner.closing.notify_one();
        }
    }

    /// Drop the transport without a close handshake.
    pub fn terminate(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.kill.notify_one();
    }

    /// Resolves once [`Connection::close_with`] has queued its close frame.
    pub async fn close_requested(&self) {
        self.inner.closing.notified().await;
    }

    /// Resolves once [`Connection::terminate`] has been called.
    pub async fn terminated(&self) {
        self.inner.kill.notified().await;
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("open", &self.is_open())
            .field("alive", &self.inner.liveness.is_alive())
            .finish()
    }
}
