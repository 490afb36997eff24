//! Notification socket protocol.
//!
//! The server only ever writes on this socket; clients answer pings and
//! otherwise stay silent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Frames sent from server to client on `/ws/notifications`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationFrame {
    /// Sent once after the bearer token was accepted
    Connected {
        /// Human readable greeting
        message: String,
    },
    /// One delivered notification
    Notification {
        /// The persisted notification record
        data: Notification,
    },
}

impl NotificationFrame {
    pub fn connected() -> Self {
        Self::Connected {
            message: "Connected to notification service".to_string(),
        }
    }
}

/// Category of a notification.
///
/// Tags this build does not know yet are kept verbatim in `Other`, so new
/// categories can roll out in the REST layer first and still reach clients
/// unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    RideRequest,
    RideAccepted,
    RideRejected,
    RideCancelled,
    RideReminder,
    ChatMessage,
    FriendRequest,
    FriendAccepted,
    PostComment,
    PostLike,
    SupportReply,
    TransportAlert,
    System,
    Other(String),
}

impl NotificationKind {
    /// Wire tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::RideRequest => "ride_request",
            Self::RideAccepted => "ride_accepted",
            Self::RideRejected => "ride_rejected",
            Self::RideCancelled => "ride_cancelled",
            Self::RideReminder => "ride_reminder",
            Self::ChatMessage => "chat_message",
            Self::FriendRequest => "friend_request",
            Self::FriendAccepted => "friend_accepted",
            Self::PostComment => "post_comment",
            Self::PostLike => "post_like",
            Self::SupportReply => "support_reply",
            Self::TransportAlert => "transport_alert",
            Self::System => "system",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ride_request" => Self::RideRequest,
            "ride_accepted" => Self::RideAccepted,
            "ride_rejected" => Self::RideRejected,
            "ride_cancelled" => Self::RideCancelled,
            "ride_reminder" => Self::RideReminder,
            "chat_message" => Self::ChatMessage,
            "friend_request" => Self::FriendRequest,
            "friend_accepted" => Self::FriendAccepted,
            "post_comment" => Self::PostComment,
            "post_like" => Self::PostLike,
            "support_reply" => Self::SupportReply,
            "transport_alert" => Self::TransportAlert,
            "system" => Self::System,
            _ => Self::Other(tag),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

/// A notification record, mirroring what the REST layer persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Free-form extension fields (ride id, sender name, deep link, ...)
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Build an unread notification stamped with the current time.
    pub fn new(
        user_id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            data: Map::new(),
            read: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach one extension field.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}
