//! HTTP error mapping (spec.md §7, §6). The route table names a few codes
//! with no counterpart in `GridbotError` (`MAINNET_ACCOUNT_FORBIDDEN`,
//! `INVALID_STATE_FOR_DELETE`, `EXCHANGE_ACCOUNT_ALREADY_EXISTS`,
//! `ACCOUNT_HAS_BOTS`) — this thin layer's own `ApiError` carries those
//! alongside everything `GridbotError`/`ExchangeError` already classify,
//! rather than stretching the control-plane taxonomy to fit HTTP concerns.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gridbot_crypto::CryptoError;
use gridbot_engine::ProviderError;
use gridbot_exchange::adapter::AdapterConstructionError;
use gridbot_model::config::ConfigError;
use gridbot_model::error::ExchangeError;
use gridbot_risk::autoclose::AutoCloseError;
use gridbot_store::StoreError;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    StateConflict { code: &'static str, message: String },
    #[error("{message}")]
    Forbidden { code: &'static str, message: String },
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::StateConflict { code, .. } => (StatusCode::CONFLICT, code),
            ApiError::Forbidden { code, .. } => (StatusCode::FORBIDDEN, code),
            ApiError::Exchange(e) => (
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.code(),
            ),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        tracing::warn!(code, %self, "request failed");
        (status, Json(ErrorBody { code, message: self.to_string() })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::AlreadyExists(msg) => {
                ApiError::StateConflict { code: "EXCHANGE_ACCOUNT_ALREADY_EXISTS", message: msg }
            }
            StoreError::CasFailed => {
                ApiError::StateConflict { code: "STATE_CONFLICT", message: err.to_string() }
            }
            StoreError::AccountHasBots => {
                ApiError::StateConflict { code: "ACCOUNT_HAS_BOTS", message: err.to_string() }
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Construction(AdapterConstructionError::MainnetNotAllowed) => ApiError::Forbidden {
                code: "MAINNET_ACCOUNT_FORBIDDEN",
                message: err.to_string(),
            },
            ProviderError::MissingCipher => {
                ApiError::Forbidden { code: "MAINNET_ACCOUNT_FORBIDDEN", message: err.to_string() }
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<AutoCloseError> for ApiError {
    fn from(err: AutoCloseError) -> Self {
        match err {
            AutoCloseError::Store(e) => e.into(),
        }
    }
}
