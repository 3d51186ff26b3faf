//! Env-driven `WorkerConfig` (spec.md §6 environment variable table).

use gridbot_engine::{ProviderConfig, RetryPolicy};
use std::env;
use std::time::Duration;

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_enabled: bool,
    pub enable_trading: bool,
    pub enable_stopping: bool,
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub order_retry_policy: RetryPolicy,
    pub stop_retry_policy: RetryPolicy,
    pub provider_config: ProviderConfig,
}

impl WorkerConfig {
    /// `WORKER_ENABLED`, `WORKER_ENABLE_TRADING`, `WORKER_ENABLE_STOPPING`,
    /// `WORKER_USE_REAL_EXCHANGE`/`EXCHANGE_PROVIDER`, `ALLOW_MAINNET_TRADING`,
    /// `WORKER_ORDER_MAX_RETRIES`/`_BACKOFF_BASE_MS`/`_BACKOFF_MAX_MS`,
    /// `WORKER_STOP_MAX_RETRIES`/`_BACKOFF_BASE_MS`/`_BACKOFF_MAX_MS` (spec.md §6).
    pub fn from_env() -> Self {
        let allow_mainnet = env_flag("ALLOW_MAINNET_TRADING", false);
        Self {
            worker_enabled: env_flag("WORKER_ENABLED", true),
            enable_trading: env_flag("WORKER_ENABLE_TRADING", true),
            enable_stopping: env_flag("WORKER_ENABLE_STOPPING", true),
            tick_interval: Duration::from_millis(env_u32("WORKER_TICK_INTERVAL_MS", 1_000) as u64),
            batch_size: env_u32("WORKER_BATCH_SIZE", 100) as usize,
            order_retry_policy: RetryPolicy::new(
                env_u32("WORKER_ORDER_MAX_RETRIES", 5),
                env_i64("WORKER_ORDER_BACKOFF_BASE_MS", 1_000),
                env_i64("WORKER_ORDER_BACKOFF_MAX_MS", 60_000),
            ),
            stop_retry_policy: RetryPolicy::new(
                env_u32("WORKER_STOP_MAX_RETRIES", 5),
                env_i64("WORKER_STOP_BACKOFF_BASE_MS", 1_000),
                env_i64("WORKER_STOP_BACKOFF_MAX_MS", 60_000),
            ),
            provider_config: ProviderConfig {
                use_real_exchange: env_flag("WORKER_USE_REAL_EXCHANGE", false)
                    || env::var("EXCHANGE_PROVIDER").as_deref() == Ok("real"),
                allow_mainnet_flag: allow_mainnet,
                env_allows_mainnet: allow_mainnet,
                cache_capacity: env_u32("WORKER_ADAPTER_CACHE_CAPACITY", 256) as usize,
            },
        }
    }
}
