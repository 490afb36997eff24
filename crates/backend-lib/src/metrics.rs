// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_AUTH_REJECTED: &str = "ws.auth_rejected";
pub const NOTIFICATION_DELIVERED: &str = "notification.delivered";
pub const NOTIFICATION_UNDELIVERED: &str = "notification.undelivered";
pub const LOCATION_UPDATE: &str = "location.update";
pub const LOCATION_EVICTED: &str = "location.evicted";
pub const LIVENESS_REAPED: &str = "liveness.reaped";
