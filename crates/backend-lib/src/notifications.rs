// ============================
// crates/backend-lib/src/notifications.rs
// ============================
//! Per-user notification delivery.
//!
//! Each connection authenticates with a bearer token in its URL and is then
//! filed under its user id. The REST layer persists a notification first and
//! then calls [`NotificationServer::push_to_user`]; a user without a live
//! connection simply gets it on their next fetch, so failing to deliver is
//! not an error here.
//!
//! Delivery is at-most-once and best-effort: nothing is acknowledged, queued
//! for later or replayed on reconnect.

use crate::auth::TokenVerifier;
use crate::connection::{Connection, ConnectionId};
use crate::error::AppError;
use crate::liveness::{heartbeat, Beat, Sweep, SweepReport};
use crate::metrics::{NOTIFICATION_DELIVERED, NOTIFICATION_UNDELIVERED};
use crate::registry::ConnectionRegistry;
use crate::session::FrameHandler;
use axum::extract::ws::{CloseFrame, Utf8Bytes};
use metrics::counter;
use ridelink_common::{Notification, NotificationFrame, UserId};
use std::sync::Arc;

/// Close code sent when a user's sessions are ended server-side
pub const CLOSE_NORMAL: u16 = 1000;

/// Notification socket server
pub struct NotificationServer {
    registry: ConnectionRegistry<UserId>,
    verifier: Arc<dyn TokenVerifier>,
}

impl NotificationServer {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            verifier,
        }
    }

    /// Resolve the `token` query parameter to a user id.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<UserId, AppError> {
        let token = token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AppError::MissingToken)?;
        self.verifier.verify(token).await
    }

    /// File an authenticated connection under its user and greet it.
    pub fn register(&self, user_id: &str, conn: Connection) -> Result<(), AppError> {
        conn.liveness().mark_alive();
        let count = self.registry.insert(user_id.to_string(), conn.clone());
        tracing::info!(
            user_id = %user_id,
            connection_id = %conn.id(),
            connections = count,
            "Notification client connected"
        );
        conn.send_json(&NotificationFrame::connected())
    }

    /// Forget one connection. The user entry goes away with its last connection.
    pub fn unregister(&self, user_id: &str, id: ConnectionId) -> bool {
        let removed = self.registry.remove(&user_id.to_string(), id);
        if removed {
            tracing::info!(user_id = %user_id, connection_id = %id, "Notification client disconnected");
        }
        removed
    }

    /// Deliver `notification` to every open connection of `user_id`.
    ///
    /// Returns true iff at least one connection accepted it.
    pub fn push_to_user(&self, user_id: &str, notification: &Notification) -> bool {
        let user = user_id.to_string();
        let connections = self.registry.connections_for(&user);
        if connections.is_empty() {
            tracing::debug!(user_id = %user_id, "User not connected, notification not pushed");
            counter!(NOTIFICATION_UNDELIVERED).increment(1);
            return false;
        }

        let Some(payload) = encode(notification) else {
            return false;
        };

        let mut delivered = 0usize;
        for conn in connections {
            if deliver(&conn, &payload) {
                delivered += 1;
            } else {
                self.registry.remove(&user, conn.id());
            }
        }

        counter!(NOTIFICATION_DELIVERED).increment(delivered as u64);
        tracing::debug!(
            user_id = %user_id,
            notification_id = %notification.id,
            delivered,
            "Notification pushed"
        );
        delivered > 0
    }

    /// Deliver `notification` to every connection of every user.
    ///
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, notification: &Notification) -> usize {
        let Some(payload) = encode(notification) else {
            return 0;
        };

        let mut delivered = 0usize;
        for (user, conn) in self.registry.all() {
            if deliver(&conn, &payload) {
                delivered += 1;
            } else {
                self.registry.remove(&user, conn.id());
            }
        }

        counter!(NOTIFICATION_DELIVERED).increment(delivered as u64);
        tracing::info!(notification_id = %notification.id, delivered, "Notification broadcast");
        delivered
    }

    /// Close every connection of `user_id` (sign-out everywhere, account ban).
    ///
    /// Returns how many connections were closed.
    pub fn disconnect_user(&self, user_id: &str, reason: &str) -> usize {
        let connections = self.registry.remove_key(&user_id.to_string());
        for conn in &connections {
            conn.close_with(CloseFrame {
                code: CLOSE_NORMAL,
                reason: Utf8Bytes::from(reason.to_string()),
            });
        }
        if !connections.is_empty() {
            tracing::info!(user_id = %user_id, closed = connections.len(), reason, "User disconnected");
        }
        connections.len()
    }

    pub fn is_user_connected(&self, user_id: &str) -> bool {
        self.registry.contains_key(&user_id.to_string())
    }

    pub fn connected_user_count(&self) -> usize {
        self.registry.key_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn connection_count_for(&self, user_id: &str) -> usize {
        self.registry.connections_for(&user_id.to_string()).len()
    }
}

fn encode(notification: &Notification) -> Option<Utf8Bytes> {
    let frame = NotificationFrame::Notification {
        data: notification.clone(),
    };
    match serde_json::to_string(&frame) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            tracing::error!(notification_id = %notification.id, error = %e, "Failed to serialize notification");
            None
        },
    }
}

// A failed send means the writer is gone; the caller drops the connection.
fn deliver(conn: &Connection, payload: &Utf8Bytes) -> bool {
    if !conn.is_open() {
        return false;
    }
    match conn.send_text(payload.clone()) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Failed to send notification");
            false
        },
    }
}

impl Sweep for NotificationServer {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn sweep_liveness(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for (user, conn) in self.registry.all() {
            let beat = heartbeat(&conn);
            if beat == Beat::Dead {
                self.registry.remove(&user, conn.id());
            }
            report.record(beat);
        }
        report
    }
}

/// Frame handler for one authenticated notification socket
pub struct NotificationSession {
    server: Arc<NotificationServer>,
    user_id: UserId,
}

impl NotificationSession {
    pub fn new(server: Arc<NotificationServer>, user_id: UserId) -> Self {
        Self { server, user_id }
    }
}

impl FrameHandler for NotificationSession {
    fn on_text(&self, conn: &Connection, text: &str) {
        // The protocol has no client frames; anything sent is ignored.
        tracing::debug!(
            user_id = %self.user_id,
            connection_id = %conn.id(),
            len = text.len(),
            "Ignoring client frame on notification socket"
        );
    }

    fn on_close(&self, conn: &Connection) {
        self.server.unregister(&self.user_id, conn.id());
    }
}
