//! Shared handler state (spec.md §9 "confine ownership [of the provider
//! cache] to the scheduler and expose only get-or-construct" — the API
//! holds the same `AdapterProvider` instance the worker does, never builds
//! its own).

use gridbot_crypto::CredentialCipher;
use gridbot_engine::AdapterProvider;
use gridbot_model::clock::SharedClock;
use gridbot_store::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: SharedClock,
    pub provider: Arc<AdapterProvider>,
    /// `Some` iff `CREDENTIALS_ENCRYPTION_KEY` is configured — gates mainnet
    /// account creation (spec.md §6 `MAINNET_ACCOUNT_FORBIDDEN`).
    pub cipher: Option<Arc<CredentialCipher>>,
}
