//! Trading-log endpoints: submission runs through the processor, listing
//! supports type/source/time filters, deletion is soft and manual-only.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ensure_owner, ok, AppState, AuthUser};
use crate::db::repo::{Page, TradingLogFilter};
use crate::domain::{Id, LogSource, TimeMs};
use crate::engine::TradingLogRequest;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    pub source: Option<LogSource>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

/// `POST /v1/trading-logs`
pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<TradingLogRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let outcome = state
        .processor
        .process(&auth.user_id, LogSource::Manual, body)
        .await?;

    Ok((
        StatusCode::CREATED,
        ok(json!({
            "log": outcome.log,
            "transactions": outcome.transactions,
            "sub_accounts": outcome.sub_accounts,
        })),
    ))
}

/// `GET /v1/trading-logs`, newest first.
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = TradingLogFilter {
        log_type: query.log_type,
        source: query.source,
        from_ms: query.from_ms.map(TimeMs::new),
        to_ms: query.to_ms.map(TimeMs::new),
    };
    let page = Page::new(query.page, query.page_size);

    let items = state
        .repo
        .list_trading_logs(&auth.user_id, &filter, page)
        .await?;
    let total = state.repo.count_trading_logs(&auth.user_id, &filter).await?;

    Ok(ok(json!({
        "items": items,
        "page": page.page,
        "page_size": page.page_size,
        "total": total,
    })))
}

/// `GET /v1/trading-logs/:id`
pub async fn fetch(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = Id::new(id);
    let log = state
        .repo
        .get_trading_log(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trading log {}", id)))?;
    ensure_owner(&auth, &log.user_id)?;
    Ok(ok(log))
}

/// `DELETE /v1/trading-logs/:id`. Bot-sourced logs are immutable audit
/// records and cannot be deleted.
pub async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = Id::new(id);
    let log = state
        .repo
        .get_trading_log(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trading log {}", id)))?;
    ensure_owner(&auth, &log.user_id)?;

    if log.source != LogSource::Manual {
        return Err(AppError::Forbidden(
            "bot-sourced logs cannot be deleted".to_string(),
        ));
    }

    state.repo.soft_delete_trading_log(&log.id, TimeMs::now()).await?;
    Ok(ok(json!({ "deleted": true })))
}
