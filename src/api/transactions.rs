//! Transaction listing (read-only; the ledger is append-only).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::{ensure_owner, ok, AppState, AuthUser};
use crate::db::repo::Page;
use crate::domain::Id;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// `GET /v1/transactions/sub-account/:id`, oldest first (replay order).
pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = Id::new(id);
    let account = state
        .repo
        .get_sub_account(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("sub-account {}", id)))?;
    ensure_owner(&auth, &account.user_id)?;

    let page = Page::new(query.page, query.page_size);
    let items = state.repo.list_transactions(&account.id, page).await?;
    let total = state.repo.count_transactions(&account.id).await?;

    Ok(ok(json!({
        "items": items,
        "page": page.page,
        "page_size": page.page_size,
        "total": total,
    })))
}
