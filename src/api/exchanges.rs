//! Exchange endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ensure_owner, ok, AppState, AuthUser};
use crate::domain::{Exchange, Id, TimeMs};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateExchange {
    pub name: String,
    pub venue: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameExchange {
    pub name: String,
}

/// `POST /v1/exchanges`
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateExchange>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    for (field, value) in [
        ("name", &body.name),
        ("venue", &body.venue),
        ("api_key", &body.api_key),
        ("api_secret", &body.api_secret),
    ] {
        if value.trim().is_empty() {
            return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
        }
    }

    if let Some(conflict) = state
        .repo
        .find_exchange_conflict(&auth.user_id, &body.name, &body.api_key, &body.api_secret, None)
        .await?
    {
        return Err(AppError::Conflict {
            code: conflict.code(),
            message: format!("exchange {} conflicts with an existing one", body.name),
        });
    }

    let exchange = Exchange::new(
        auth.user_id.clone(),
        body.name,
        body.venue,
        body.api_key,
        body.api_secret,
    );
    state.repo.create_exchange(&exchange).await?;
    Ok((StatusCode::CREATED, ok(exchange)))
}

/// `GET /v1/exchanges`
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let exchanges = state.repo.list_exchanges(&auth.user_id).await?;
    Ok(ok(exchanges))
}

/// `GET /v1/exchanges/:id`
pub async fn fetch(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let exchange = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &exchange.user_id)?;
    Ok(ok(exchange))
}

/// `PUT /v1/exchanges/:id` (name is the only mutable attribute)
pub async fn rename(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<RenameExchange>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    let exchange = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &exchange.user_id)?;

    if let Some(conflict) = state
        .repo
        .find_exchange_conflict(
            &exchange.user_id,
            &body.name,
            &exchange.api_key,
            &exchange.api_secret,
            Some(&exchange.id),
        )
        .await?
    {
        return Err(AppError::Conflict {
            code: conflict.code(),
            message: format!("name {} is already in use", body.name),
        });
    }

    state
        .repo
        .rename_exchange(&exchange.id, &body.name, TimeMs::now())
        .await?;
    let updated = load(&state, &exchange.id).await?;
    Ok(ok(updated))
}

/// `DELETE /v1/exchanges/:id`
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let exchange = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &exchange.user_id)?;

    let live = state.repo.count_live_sub_accounts(&exchange.id).await?;
    if live > 0 {
        return Err(AppError::InvalidInput(format!(
            "exchange still has {} live sub-accounts",
            live
        )));
    }

    state
        .repo
        .soft_delete_exchange(&exchange.id, TimeMs::now())
        .await?;
    Ok(ok(json!({ "deleted": true })))
}

async fn load(state: &AppState, id: &Id) -> Result<Exchange, AppError> {
    state
        .repo
        .get_exchange(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("exchange {}", id)))
}
