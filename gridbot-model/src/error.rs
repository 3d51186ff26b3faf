//! Error taxonomy (spec.md §7). Pure functions never throw for expected
//! conditions — they return structured issues (see `gridbot-preview` /
//! `gridbot-risk`). Everything that crosses an I/O boundary is normalised
//! into one of these variants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level control-plane error, mirroring the `ClientError`/`ApiError`
/// split in `barter-execution/src/error.rs`: boundary errors wrap an
/// [`ExchangeError`], everything else is a control-plane concern.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum GridbotError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("exchange: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("internal: {0}")]
    Internal(String),
}

impl GridbotError {
    pub fn http_status(&self) -> u16 {
        match self {
            GridbotError::Validation(_) => 422,
            GridbotError::NotFound(_) => 404,
            GridbotError::StateConflict(_) => 409,
            GridbotError::Exchange(e) => e.http_status(),
            GridbotError::Internal(_) => 500,
        }
    }
}

/// Normalised exchange adapter error taxonomy (spec.md §4.3, §7). Every
/// variant carries enough to decide retry policy without inspecting
/// exchange-specific strings again downstream.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ExchangeError {
    #[error("rate limited{}", retry_after_ms.map(|ms| format!(" (retry after {ms}ms)")).unwrap_or_default())]
    RateLimit { retry_after_ms: Option<u64> },

    #[error("timeout")]
    Timeout,

    #[error("exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("duplicate order: {0}")]
    DuplicateOrder(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),
}

impl ExchangeError {
    /// Whether the worker may retry the operation that produced this error.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::RateLimit { .. }
                | ExchangeError::Timeout
                | ExchangeError::ExchangeUnavailable(_)
        )
    }

    /// A stable short code used in `lastError` prefixes (e.g.
    /// `ORDER_SUBMIT_FAILED: BAD_REQUEST: ...`).
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::RateLimit { .. } => "RATE_LIMIT",
            ExchangeError::Timeout => "TIMEOUT",
            ExchangeError::ExchangeUnavailable(_) => "EXCHANGE_UNAVAILABLE",
            ExchangeError::Auth(_) => "AUTH",
            ExchangeError::BadRequest(_) => "BAD_REQUEST",
            ExchangeError::DuplicateOrder(_) => "DUPLICATE_ORDER",
            ExchangeError::InsufficientFunds(_) => "INSUFFICIENT_FUNDS",
            ExchangeError::OrderNotFound(_) => "ORDER_NOT_FOUND",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::ExchangeUnavailable(_) | ExchangeError::Timeout => 503,
            ExchangeError::Auth(_) => 401,
            _ => 500,
        }
    }
}
