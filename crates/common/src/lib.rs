// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between ridelink clients and the real-time server.
//! This crate defines the frames exchanged on the two WebSocket endpoints:
//! per-user notification delivery and vehicle-location fan-out.

pub mod location;
pub mod notification;

pub use location::{
    FrameError, InboundFrame, LocationFrame, LocationRequest, LocationUpdate, VehicleKind,
    VehiclePosition, VehicleRemoved, DEFAULT_VEHICLE_TYPE,
};
pub use notification::{Notification, NotificationFrame, NotificationKind};

/// Identity of an authenticated user, as carried in the token subject.
pub type UserId = String;

/// Identity of a vehicle, chosen by the producing client.
pub type VehicleId = String;
