//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id and role. The extractor
//! rejects missing credentials with `AUTH_REQUIRED` and bad or expired
//! tokens with `INVALID_TOKEN`.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::domain::Id;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: i64,
}

/// Authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Id,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_access(&self, owner: &Id) -> bool {
        self.is_admin() || &self.user_id == owner
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::AuthRequired)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::AuthRequired)?;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| AppError::InvalidToken(e.to_string()))?;

        Ok(AuthUser {
            user_id: Id::new(data.claims.sub),
            role: data.claims.role,
        })
    }
}

/// Mint a token for `user_id`. Used by the token tooling and tests.
pub fn issue_token(
    user_id: &Id,
    role: Role,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id.as_str().to_string(),
        role,
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}
