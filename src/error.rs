use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::distributor::UserFailure;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Amount {requested} is below the minimum of {minimum}")]
    BelowMinimum { requested: Decimal, minimum: Decimal },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("{entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: i64,
        expected: &'static str,
        actual: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Wallet not found for user: {0}")]
    WalletNotFound(String),

    #[error("Access denied for user: {0}")]
    AccessDenied(String),

    #[error("Missing caller identity")]
    Unauthenticated,

    #[error(
        "Distribution partially applied: {users_updated} users credited ({total_distributed} total), {users_failed} failed"
    )]
    PartialBatchFailure {
        users_updated: usize,
        users_failed: usize,
        total_distributed: Decimal,
        failures: Vec<UserFailure>,
    },

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn not_pending(entity: &'static str, id: i64, actual: impl std::fmt::Display) -> Self {
        LedgerError::InvalidState {
            entity,
            id,
            expected: "pending",
            actual: actual.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            LedgerError::Validation(_) => {
                tracing::warn!("Validation error: {}", self);
                (StatusCode::BAD_REQUEST, "Validation error")
            }
            LedgerError::BelowMinimum { .. } => {
                tracing::warn!("{}", self);
                (StatusCode::BAD_REQUEST, "Below minimum")
            }
            LedgerError::InsufficientFunds { .. } => {
                tracing::warn!("{}", self);
                (StatusCode::BAD_REQUEST, "Insufficient funds")
            }
            LedgerError::InvalidState { .. } => {
                tracing::warn!("{}", self);
                (StatusCode::CONFLICT, "Invalid state")
            }
            LedgerError::NotFound { .. } | LedgerError::WalletNotFound(_) => {
                tracing::warn!("{}", self);
                (StatusCode::NOT_FOUND, "Not found")
            }
            LedgerError::AccessDenied(_) => {
                tracing::warn!("{}", self);
                (StatusCode::FORBIDDEN, "Access denied")
            }
            LedgerError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated"),
            LedgerError::PartialBatchFailure { .. } => {
                tracing::error!("{}", self);
                (StatusCode::MULTI_STATUS, "Partial batch failure")
            }
            LedgerError::Conflict(_) => {
                tracing::error!("{}", self);
                (StatusCode::CONFLICT, "Concurrent update conflict")
            }
            LedgerError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred")
            }
            LedgerError::Internal(_) => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let mut body = json!({
            "error": error_message,
            "details": self.to_string(),
        });
        if let LedgerError::PartialBatchFailure { failures, .. } = &self {
            body["failures"] = json!(failures);
        }

        let body = Json(body);

        (status, body).into_response()
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(error: rusqlite::Error) -> Self {
        LedgerError::Database(error.to_string())
    }
}

impl From<tokio::task::JoinError> for LedgerError {
    fn from(error: tokio::task::JoinError) -> Self {
        LedgerError::Internal(format!("blocking task failed: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
