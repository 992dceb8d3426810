//! HTTP surface: versioned JSON API plus health endpoints.
//!
//! Every success body is `{success: true, data: ...}`; failures render
//! through [`AppError`] as `{success: false, error: {code, message}}`.

pub mod auth;
pub mod exchanges;
pub mod health;
pub mod sub_accounts;
pub mod trading_logs;
pub mod transactions;
pub mod users;

use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bus::MessageBus;
use crate::db::Repository;
use crate::engine::Processor;
use crate::error::AppError;

pub use auth::{issue_token, AuthUser, Role};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub processor: Arc<Processor>,
    /// Absent when the service runs without a bus.
    pub bus: Option<Arc<dyn MessageBus>>,
    pub jwt_secret: String,
}

/// Wrap response data in the uniform success envelope.
pub fn ok<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Ownership gate: admins bypass, everyone else must own the resource.
pub fn ensure_owner(auth: &AuthUser, owner: &crate::domain::Id) -> Result<(), AppError> {
    if auth.can_access(owner) {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "resource belongs to another user".to_string(),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::detail))
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/v1/users/me", get(users::me))
        .route("/v1/exchanges", post(exchanges::create).get(exchanges::list))
        .route(
            "/v1/exchanges/:id",
            get(exchanges::fetch)
                .put(exchanges::rename)
                .delete(exchanges::remove),
        )
        .route(
            "/v1/exchanges/:id/sub-accounts",
            get(sub_accounts::list),
        )
        .route("/v1/sub-accounts", post(sub_accounts::create))
        .route(
            "/v1/sub-accounts/:id",
            get(sub_accounts::fetch)
                .put(sub_accounts::rename)
                .delete(sub_accounts::remove),
        )
        .route(
            "/v1/sub-accounts/:id/balance",
            put(sub_accounts::update_balance),
        )
        .route(
            "/v1/transactions/sub-account/:id",
            get(transactions::list),
        )
        .route(
            "/v1/trading-logs",
            post(trading_logs::create).get(trading_logs::list),
        )
        .route(
            "/v1/trading-logs/:id",
            get(trading_logs::fetch).delete(trading_logs::remove),
        )
        .layer(cors)
        .with_state(state)
}
