// =============
// crates/backend-lib/src/auth/service.rs
// =============
//! This module defines the `TokenVerifier` trait, which turns the bearer token
//! presented on the notification socket into a user identity.
use crate::error::AppError;
use async_trait::async_trait;
use ridelink_common::UserId;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return the user it was issued to.
    ///
    /// Fails with [`AppError::InvalidToken`] on a bad signature, an expired
    /// token or a token without a subject.
    async fn verify(&self, token: &str) -> Result<UserId, AppError>;
}
