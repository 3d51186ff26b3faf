//! Adapter provisioning: turns a stored `ExchangeAccount` into a live
//! `Arc<dyn ExchangeAdapter>`, applying the mainnet/testnet construction
//! guard (spec.md §4.3) and caching the result. Shared identically by the
//! Worker Scheduler's per-tick bot loop and the HTTP API's `risk-check`
//! route (spec.md §9's "unified service layer" resolution, the same
//! reasoning already applied to `gridbot_risk::autoclose::evaluate_and_persist`).

use gridbot_crypto::{CredentialCipher, CryptoError};
use gridbot_exchange::adapter::{AdapterConstructionError, AdapterConstructionGuard, ExchangeAdapter};
use gridbot_exchange::{rest_config_for, RestCredentials, RestExchangeAdapter, SimulatedExchange};
use gridbot_model::entities::ExchangeAccount;
use gridbot_model::ids::ExchangeAccountId;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Plaintext shape stored encrypted in `ExchangeAccount.encrypted_credentials`
/// (spec.md §6.5 only specifies the outer `iv:authTag:ciphertext` wire
/// format, not the plaintext payload it wraps). Public so the HTTP layer's
/// `POST /accounts` route can produce the exact shape this module decrypts.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error(transparent)]
    Construction(#[from] AdapterConstructionError),
    #[error("mainnet account requires CREDENTIALS_ENCRYPTION_KEY to be configured")]
    MissingCipher,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("stored credentials are not valid JSON: {0}")]
    MalformedCredentials(String),
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// `WORKER_USE_REAL_EXCHANGE` / `EXCHANGE_PROVIDER=real`: when false every
    /// account is served by the deterministic simulator regardless of
    /// `is_testnet`.
    pub use_real_exchange: bool,
    /// `ALLOW_MAINNET_TRADING` combined with an account-level opt-in.
    pub allow_mainnet_flag: bool,
    pub env_allows_mainnet: bool,
    /// Bounded-LRU capacity (spec.md §5): eviction is eager on account
    /// deletion via [`AdapterProvider::evict`], capacity eviction is
    /// oldest-used-first.
    pub cache_capacity: usize,
}

/// Bounded-LRU cache of constructed adapters, keyed by `ExchangeAccount.id`.
/// One instance is shared by the worker's tick loop and the API's
/// `risk-check` route so a single construction guard and a single cache
/// governs both call sites.
pub struct AdapterProvider {
    config: ProviderConfig,
    http: reqwest::Client,
    cipher: Option<Arc<CredentialCipher>>,
    cache: Mutex<IndexMap<ExchangeAccountId, Arc<dyn ExchangeAdapter>>>,
}

impl AdapterProvider {
    pub fn new(config: ProviderConfig, http: reqwest::Client, cipher: Option<Arc<CredentialCipher>>) -> Self {
        Self { config, http, cipher, cache: Mutex::new(IndexMap::new()) }
    }

    pub fn get_or_build(&self, account: &ExchangeAccount) -> Result<Arc<dyn ExchangeAdapter>, ProviderError> {
        {
            let mut cache = self.cache.lock();
            if let Some(adapter) = cache.get(&account.id).cloned() {
                cache.shift_remove(&account.id);
                cache.insert(account.id.clone(), adapter.clone());
                return Ok(adapter);
            }
        }

        let adapter = self.build(account)?;

        let mut cache = self.cache.lock();
        if cache.len() >= self.config.cache_capacity && !cache.contains_key(&account.id) {
            if let Some((oldest, _)) = cache.first() {
                let oldest = oldest.clone();
                cache.shift_remove(&oldest);
            }
        }
        cache.insert(account.id.clone(), adapter.clone());
        Ok(adapter)
    }

    /// Eagerly drops a cached adapter — called when an `ExchangeAccount` is
    /// deleted so a stale credential set is never reused (spec.md §5).
    pub fn evict(&self, account_id: &ExchangeAccountId) {
        self.cache.lock().shift_remove(account_id);
    }

    fn build(&self, account: &ExchangeAccount) -> Result<Arc<dyn ExchangeAdapter>, ProviderError> {
        let guard = AdapterConstructionGuard {
            is_testnet: account.is_testnet,
            allow_mainnet_flag: self.config.allow_mainnet_flag,
            env_allows_mainnet: self.config.env_allows_mainnet,
            has_real_market_data: self.config.use_real_exchange,
        };
        guard.validate()?;

        if !self.config.use_real_exchange {
            return Ok(Arc::new(SimulatedExchange::new(account.exchange)));
        }

        let cipher = self.cipher.as_ref().ok_or(ProviderError::MissingCipher)?;
        let plaintext = cipher.decrypt(&account.encrypted_credentials)?;
        let creds: StoredCredentials =
            serde_json::from_str(&plaintext).map_err(|e| ProviderError::MalformedCredentials(e.to_string()))?;
        let rest_config = rest_config_for(account.exchange, account.is_testnet);
        Ok(Arc::new(RestExchangeAdapter::new(
            self.http.clone(),
            rest_config,
            RestCredentials { api_key: creds.api_key, api_secret: creds.api_secret },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_model::entities::Exchange;
    use gridbot_model::ids::UserId;

    fn account(id: &str, is_testnet: bool) -> ExchangeAccount {
        ExchangeAccount {
            id: ExchangeAccountId::new(id),
            user_id: UserId::new("user-1"),
            name: format!("acct-{id}"),
            exchange: Exchange::Binance,
            is_testnet,
            encrypted_credentials: "iv:tag:ct".into(),
        }
    }

    fn provider(capacity: usize) -> AdapterProvider {
        AdapterProvider::new(
            ProviderConfig {
                use_real_exchange: false,
                allow_mainnet_flag: false,
                env_allows_mainnet: false,
                cache_capacity: capacity,
            },
            reqwest::Client::new(),
            None,
        )
    }

    #[test]
    fn simulated_mode_never_requires_a_cipher() {
        let provider = provider(4);
        assert!(provider.get_or_build(&account("a1", true)).is_ok());
    }

    #[test]
    fn mainnet_without_allow_flag_is_refused_even_in_simulated_mode() {
        let provider = provider(4);
        let err = provider.get_or_build(&account("a1", false)).unwrap_err();
        assert!(matches!(err, ProviderError::Construction(AdapterConstructionError::MainnetNotAllowed)));
    }

    #[test]
    fn cache_evicts_oldest_entry_past_capacity() {
        let provider = provider(1);
        provider.get_or_build(&account("a1", true)).unwrap();
        provider.get_or_build(&account("a2", true)).unwrap();
        assert_eq!(provider.cache.lock().len(), 1);
        assert!(!provider.cache.lock().contains_key(&ExchangeAccountId::new("a1")));
        assert!(provider.cache.lock().contains_key(&ExchangeAccountId::new("a2")));
    }

    #[test]
    fn evict_removes_cached_adapter() {
        let provider = provider(4);
        provider.get_or_build(&account("a1", true)).unwrap();
        provider.evict(&ExchangeAccountId::new("a1"));
        assert!(!provider.cache.lock().contains_key(&ExchangeAccountId::new("a1")));
    }
}
