// ============================
// crates/backend-lib/src/ws_router.rs
// ============================
//! HTTP routes: both sockets plus a health check.
use crate::connection::Connection;
use crate::location::LocationSession;
use crate::metrics::{WS_AUTH_REJECTED, WS_CONNECTION};
use crate::notifications::NotificationSession;
use crate::session::drive;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::SinkExt;
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

pub const NOTIFICATIONS_PATH: &str = "/ws/notifications";
pub const LOCATION_PATH: &str = "/ws/vehicle-location";
pub const HEALTH_PATH: &str = "/health";

/// Query string of the notification socket
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(NOTIFICATIONS_PATH, get(notifications_handler))
        .route(LOCATION_PATH, get(location_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check with live connection counts
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "notifications": {
            "users": state.notifications.connected_user_count(),
            "connections": state.notifications.connection_count(),
        },
        "vehicleLocation": {
            "connections": state.locations.peer_count(),
            "viewers": state.locations.viewer_count(),
            "vehicles": state.locations.vehicle_count(),
        },
    }))
}

fn limit_frames(ws: WebSocketUpgrade, state: &AppState) -> WebSocketUpgrade {
    let max = state.settings.server.max_frame_bytes;
    ws.max_message_size(max).max_frame_size(max)
}

async fn notifications_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    counter!(WS_CONNECTION, "endpoint" => "notifications").increment(1);
    // The handshake always completes; a bad token is answered with a close frame.
    limit_frames(ws, &state).on_upgrade(move |socket| notification_socket(socket, state, query.token))
}

async fn notification_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let server = state.notifications;
    let user_id = match server.authenticate(token.as_deref()).await {
        Ok(user_id) => user_id,
        Err(err) => {
            counter!(WS_AUTH_REJECTED).increment(1);
            tracing::warn!(error = %err, code = err.error_code(), "Rejected notification socket");
            if let Some(frame) = err.close_frame() {
                let _ = socket.send(Message::Close(Some(frame))).await;
            }
            let _ = socket.close().await;
            return;
        },
    };

    let (conn, outbound) = Connection::channel();
    if let Err(e) = server.register(&user_id, conn.clone()) {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to register notification socket");
        server.unregister(&user_id, conn.id());
        return;
    }
    tracing::info!(user_id = %user_id, connection_id = %conn.id(), "Notification socket opened");

    drive(socket, conn, outbound, NotificationSession::new(server, user_id)).await;
}

async fn location_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    counter!(WS_CONNECTION, "endpoint" => "vehicle-location").increment(1);
    limit_frames(ws, &state).on_upgrade(move |socket| location_socket(socket, state))
}

async fn location_socket(socket: WebSocket, state: AppState) {
    let server = state.locations;
    let (conn, outbound) = Connection::channel();
    server.connect(conn.clone());
    drive(socket, conn, outbound, LocationSession::new(server)).await;
}
