//! Vehicle-location socket protocol.
//!
//! Producers push `update_location` frames, viewers receive `vehicle_position`
//! and `vehicle_removed` frames. Every frame is a JSON object tagged by its
//! `event` field.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Vehicle type assumed when a producer does not send one
pub const DEFAULT_VEHICLE_TYPE: &str = "CAR";

/// Errors produced while decoding an inbound frame.
///
/// The `Display` text is what goes back to the client in the error frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not JSON, or not a JSON object
    #[error("Invalid message format")]
    Malformed(String),
    /// `update_location` without `vehicleId`, `lat` or `lng`
    #[error("Missing required fields: vehicleId, lat, lng")]
    MissingFields,
}

/// Vehicle type tag. Anything other than `CAR` is kept verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum VehicleKind {
    #[default]
    Car,
    Other(String),
}

impl From<String> for VehicleKind {
    fn from(tag: String) -> Self {
        if tag == DEFAULT_VEHICLE_TYPE {
            Self::Car
        } else {
            Self::Other(tag)
        }
    }
}

impl From<VehicleKind> for String {
    fn from(kind: VehicleKind) -> Self {
        match kind {
            VehicleKind::Car => DEFAULT_VEHICLE_TYPE.to_string(),
            VehicleKind::Other(tag) => tag,
        }
    }
}

/// Last known state of one vehicle, as broadcast to viewers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VehiclePosition {
    pub vehicle_id: String,
    #[serde(rename = "type")]
    pub kind: VehicleKind,
    pub lat: f64,
    pub lng: f64,
    pub speed: f64,
    pub bearing: f64,
    /// Producer event time in epoch milliseconds
    pub timestamp: i64,
}

/// Payload of a `vehicle_removed` frame
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRemoved {
    pub vehicle_id: String,
}

/// Body of an `update_location` frame as the producer sent it.
///
/// Every field is optional on the wire; `InboundFrame::parse` only lets
/// through updates that carry `vehicleId`, `lat` and `lng`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

impl LocationUpdate {
    pub fn new(vehicle_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            vehicle_id: Some(vehicle_id.into()),
            lat: Some(lat),
            lng: Some(lng),
            ..Self::default()
        }
    }

    /// Truthy presence check on the required fields: an empty id or a zero
    /// coordinate counts as missing. Coordinates are not range checked.
    pub fn is_complete(&self) -> bool {
        self.vehicle_id.as_deref().is_some_and(|id| !id.is_empty())
            && self.lat.is_some_and(|lat| lat != 0.0)
            && self.lng.is_some_and(|lng| lng != 0.0)
    }

    /// Fill in defaults. `now_millis` stands in for a missing event timestamp.
    pub fn into_position(self, now_millis: i64) -> VehiclePosition {
        VehiclePosition {
            vehicle_id: self.vehicle_id.unwrap_or_default(),
            kind: self.kind.map(VehicleKind::from).unwrap_or_default(),
            lat: self.lat.unwrap_or_default(),
            lng: self.lng.unwrap_or_default(),
            speed: self.speed.unwrap_or(0.0),
            bearing: self.bearing.unwrap_or(0.0),
            timestamp: self.timestamp.unwrap_or(now_millis),
        }
    }
}

// Android clients sometimes send the timestamp as a double.
#[allow(clippy::cast_possible_truncation)]
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

/// A decoded client frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Position report from a producer, required fields present
    UpdateLocation(LocationUpdate),
    /// Viewer asks for the position stream
    Subscribe,
    /// Any other `event` value (or none at all)
    Unknown(Option<String>),
}

impl InboundFrame {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let Value::Object(mut frame) = value else {
            return Err(FrameError::Malformed("expected a JSON object".to_string()));
        };

        let event = frame
            .get("event")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        match event.as_deref() {
            Some("update_location") => {
                let data = frame.remove("data").unwrap_or(Value::Null);
                let update: LocationUpdate =
                    serde_json::from_value(data).map_err(|_| FrameError::MissingFields)?;
                if update.is_complete() {
                    Ok(Self::UpdateLocation(update))
                } else {
                    Err(FrameError::MissingFields)
                }
            },
            Some("subscribe") => Ok(Self::Subscribe),
            _ => Ok(Self::Unknown(event)),
        }
    }
}

/// Frames a client may send, for Rust-side producers and viewers
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LocationRequest {
    UpdateLocation(LocationUpdate),
    Subscribe,
}

/// Frames sent from server to client on `/ws/vehicle-location`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LocationFrame {
    VehiclePosition {
        data: VehiclePosition,
    },
    VehicleRemoved {
        data: VehicleRemoved,
    },
    LocationAck {
        #[serde(rename = "vehicleId")]
        vehicle_id: String,
        timestamp: i64,
    },
    Error {
        message: String,
    },
}

impl LocationFrame {
    pub fn removed(vehicle_id: impl Into<String>) -> Self {
        Self::VehicleRemoved {
            data: VehicleRemoved {
                vehicle_id: vehicle_id.into(),
            },
        }
    }

    pub fn error(err: &FrameError) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}
