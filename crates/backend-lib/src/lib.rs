// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Real-time fan-out for the ride-sharing backend.
//!
//! Two WebSocket endpoints share one process: per-user notification
//! delivery and vehicle-location fan-out. Neither persists anything.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod liveness;
pub mod location;
pub mod metrics;
pub mod notifications;
pub mod registry;
pub mod session;
pub mod ws_router;

use crate::auth::{JwtVerifier, TokenVerifier};
use crate::config::Settings;
use crate::error::AppError;
use crate::liveness::spawn_liveness_monitor;
use crate::location::LocationServer;
use crate::notifications::NotificationServer;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Validated settings
    pub settings: Arc<Settings>,
    /// Notification socket server
    pub notifications: Arc<NotificationServer>,
    /// Vehicle-location socket server
    pub locations: Arc<LocationServer>,
}

impl AppState {
    /// Create the state around an explicit token verifier
    pub fn new(settings: Settings, verifier: Arc<dyn TokenVerifier>) -> Self {
        let notifications = Arc::new(NotificationServer::new(verifier));
        let locations = Arc::new(LocationServer::new(&settings));
        Self {
            settings: Arc::new(settings),
            notifications,
            locations,
        }
    }

    /// Create the state with a JWT verifier built from `settings.auth`
    pub fn from_settings(settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;
        let verifier = Arc::new(JwtVerifier::from_settings(&settings.auth));
        Ok(Self::new(settings, verifier))
    }

    /// Start the liveness monitors and the staleness sweeper. Each task
    /// stops by itself once the state is dropped.
    pub fn spawn_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let heartbeat = self.settings.heartbeat_interval();
        vec![
            spawn_liveness_monitor(&self.notifications, heartbeat),
            spawn_liveness_monitor(&self.locations, heartbeat),
            LocationServer::spawn_stale_sweeper(
                &self.locations,
                self.settings.stale_sweep_interval(),
            ),
        ]
    }
}
