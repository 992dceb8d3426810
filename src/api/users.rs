//! User endpoints.

use axum::extract::State;
use axum::Json;

use super::{ok, AppState, AuthUser};
use crate::error::AppError;

/// `GET /v1/users/me`
pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let user = state
        .repo
        .get_user(&auth.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", auth.user_id)))?;
    Ok(ok(user))
}
