//! HS256 bearer tokens issued by the REST API.
use crate::auth::TokenVerifier;
use crate::config::AuthSettings;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use ridelink_common::UserId;
use serde::{Deserialize, Serialize};

/// Claims we read from an access token.
///
/// Older mobile builds carry the user id in `userId` or `id` instead of `sub`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub exp: i64,
}

impl Claims {
    /// Subject claims expiring `ttl_secs` from now.
    pub fn for_user(user_id: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            sub: Some(user_id.into()),
            exp: Utc::now().timestamp() + ttl_secs,
            ..Self::default()
        }
    }

    /// First non-empty identity claim
    pub fn subject(&self) -> Option<&str> {
        [&self.sub, &self.user_id, &self.id]
            .into_iter()
            .filter_map(|claim| claim.as_deref())
            .find(|value| !value.is_empty())
    }
}

/// Verifies HS256 tokens against a shared secret
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.jwt_secret.as_bytes(), settings.leeway_secs)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::InvalidToken(e.to_string()))?;
        data.claims
            .subject()
            .map(ToString::to_string)
            .ok_or_else(|| AppError::InvalidToken("missing subject claim".to_string()))
    }
}
