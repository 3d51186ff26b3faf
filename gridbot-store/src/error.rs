use thiserror::Error;

/// Store-layer errors (spec.md §4.2, §7). `CasFailed` is deliberately not
/// further disambiguated here — the caller must re-read the row to decide
/// between "idempotent success" (someone already applied this exact
/// change) and "concurrent modification" (surface 409).
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("CAS_FAILED: statusVersion mismatch")]
    CasFailed,

    #[error("account has bots referencing it")]
    AccountHasBots,
}
