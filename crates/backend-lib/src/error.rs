// crates/backend-lib/src/error.rs

//! Central error type + WebSocket close-frame mapping.
use axum::extract::ws::CloseFrame;
use thiserror::Error;

/// RFC 6455 close code for policy violations (used for rejected tokens)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingToken => "AUTH_001",
            AppError::InvalidToken(_) => "AUTH_002",
            AppError::ConnectionClosed => "WS_001",
            AppError::Json(_) => "JSON_001",
            AppError::InvalidInput(_) => "VAL_001",
            AppError::Config(_) => "CFG_001",
            AppError::Io(_) => "IO_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for sending to a peer
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::MissingToken => "Authentication required".to_string(),
            AppError::InvalidToken(_) => "Invalid token".to_string(),
            AppError::ConnectionClosed => "Connection closed".to_string(),
            AppError::Json(_) => "Invalid message format".to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                "An internal server error occurred".to_string()
            },
        }
    }

    /// Close frame to end an unauthenticated connection with, if this error
    /// is an authentication failure.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            AppError::MissingToken | AppError::InvalidToken(_) => Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: self.sanitized_message().into(),
            }),
            _ => None,
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AppError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AppError::ConnectionClosed
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
