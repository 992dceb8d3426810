//! Health endpoints: liveness, readiness, and a detail view.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// `GET /health/live`: the process is up.
pub async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /health/ready`: database reachable and, when configured, the bus too.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (db_ok, bus_ok) = checks(&state).await;
    if db_ok && bus_ok {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}

/// `GET /health`: per-dependency detail.
pub async fn detail(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (db_ok, bus_ok) = checks(&state).await;
    let status = if db_ok && bus_ok { "ok" } else { "degraded" };
    let code = if db_ok && bus_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": status,
            "database": if db_ok { "ok" } else { "unreachable" },
            "bus": match &state.bus {
                None => "disabled",
                Some(_) if bus_ok => "ok",
                Some(_) => "unreachable",
            },
        })),
    )
}

async fn checks(state: &AppState) -> (bool, bool) {
    let db_ok = sqlx::query("SELECT 1")
        .execute(state.repo.pool())
        .await
        .is_ok();
    let bus_ok = match &state.bus {
        Some(bus) => bus.healthy().await,
        None => true,
    };
    (db_ok, bus_ok)
}
