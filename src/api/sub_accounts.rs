//! Sub-account endpoints, including the direct balance-adjustment path.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ensure_owner, ok, AppState, AuthUser};
use crate::domain::{Decimal, Direction, Id, SubAccount, TimeMs};
use crate::engine;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CreateSubAccount {
    pub exchange_id: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameSubAccount {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceUpdate {
    pub amount: Decimal,
    pub direction: Direction,
    pub reason: String,
    #[serde(default)]
    pub info: Option<serde_json::Value>,
}

/// `POST /v1/sub-accounts`
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateSubAccount>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if body.name.trim().is_empty() || body.symbol.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "name and symbol must not be empty".to_string(),
        ));
    }

    let exchange_id = Id::new(body.exchange_id.clone());
    let exchange = state
        .repo
        .get_exchange(&exchange_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("exchange {}", exchange_id)))?;
    ensure_owner(&auth, &exchange.user_id)?;

    if state
        .repo
        .sub_account_name_exists(&exchange.id, &body.name, None)
        .await?
    {
        return Err(AppError::Conflict {
            code: "SUB_ACCOUNT_NAME_EXISTS",
            message: format!("sub-account {} already exists on this exchange", body.name),
        });
    }

    let account = SubAccount::new(
        exchange.user_id.clone(),
        exchange.id.clone(),
        body.name,
        body.symbol,
    );
    state.repo.create_sub_account(&account).await?;
    Ok((StatusCode::CREATED, ok(account)))
}

/// `GET /v1/exchanges/:id/sub-accounts`
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(exchange_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let exchange_id = Id::new(exchange_id);
    let exchange = state
        .repo
        .get_exchange(&exchange_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("exchange {}", exchange_id)))?;
    ensure_owner(&auth, &exchange.user_id)?;

    let accounts = state.repo.list_sub_accounts(&exchange.id).await?;
    Ok(ok(accounts))
}

/// `GET /v1/sub-accounts/:id`
pub async fn fetch(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let account = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &account.user_id)?;
    Ok(ok(account))
}

/// `PUT /v1/sub-accounts/:id`
pub async fn rename(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<RenameSubAccount>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.name.trim().is_empty() {
        return Err(AppError::InvalidInput("name must not be empty".to_string()));
    }
    let account = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &account.user_id)?;

    if state
        .repo
        .sub_account_name_exists(&account.exchange_id, &body.name, Some(&account.id))
        .await?
    {
        return Err(AppError::Conflict {
            code: "SUB_ACCOUNT_NAME_EXISTS",
            message: format!("sub-account {} already exists on this exchange", body.name),
        });
    }

    state
        .repo
        .rename_sub_account(&account.id, &body.name, TimeMs::now())
        .await?;
    let updated = load(&state, &account.id).await?;
    Ok(ok(updated))
}

/// `DELETE /v1/sub-accounts/:id` (balance must be zero)
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let account = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &account.user_id)?;

    if !account.balance.is_zero() {
        return Err(AppError::InvalidInput(format!(
            "sub-account balance is {}, must be 0 to delete",
            account.balance
        )));
    }

    state
        .repo
        .soft_delete_sub_account(&account.id, TimeMs::now())
        .await?;
    Ok(ok(json!({ "deleted": true })))
}

/// `PUT /v1/sub-accounts/:id/balance`: apply one mutation through the
/// balance engine.
pub async fn update_balance(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<BalanceUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    let account = load(&state, &Id::new(id)).await?;
    ensure_owner(&auth, &account.user_id)?;

    let mut tx = state
        .repo
        .pool()
        .begin()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let (txn, updated) = engine::update_balance(
        &mut tx,
        &account.id,
        body.amount,
        body.direction,
        &body.reason,
        body.info.unwrap_or_else(|| json!({})),
    )
    .await?;
    tx.commit()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(ok(json!({ "transaction": txn, "sub_account": updated })))
}

async fn load(state: &AppState, id: &Id) -> Result<SubAccount, AppError> {
    state
        .repo
        .get_sub_account(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("sub-account {}", id)))
}
