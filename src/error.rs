use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::engine::LedgerError;

/// Application error surfaced through the HTTP API.
///
/// Every variant maps to a stable error code rendered in the uniform
/// `{success:false, error:{code, message}}` envelope.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    AuthRequired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// Uniqueness conflict with a pre-assigned code such as
    /// `EXCHANGE_NAME_EXISTS` or `API_KEY_EXISTS`.
    #[error("Conflict: {message}")]
    Conflict {
        code: &'static str,
        message: String,
    },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "AUTH_REQUIRED",
            AppError::InvalidToken(_) => "INVALID_TOKEN",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict { code, .. } => code,
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRequired | AppError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::InvalidInput(_) | AppError::InsufficientBalance(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance(msg) => AppError::InsufficientBalance(msg),
            LedgerError::Forbidden(msg) => AppError::Forbidden(msg),
            LedgerError::InvalidTradingLog(msg) => AppError::InvalidInput(msg),
            LedgerError::NotFound(msg) => AppError::NotFound(msg),
            LedgerError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
        }));

        (status, body).into_response()
    }
}
