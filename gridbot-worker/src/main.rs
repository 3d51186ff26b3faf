//! Binary entry point for the Worker Scheduler. Tick loop shape grounded on
//! `examples/hot3246624-pm_as_ofi/src/bin/polymarket_mm.rs`'s
//! `tokio::select! { _ = tick.tick() => ... }` structure, with a Ctrl+C
//! branch added so a tick in flight finishes before the process exits.

use gridbot_crypto::CredentialCipher;
use gridbot_engine::AdapterProvider;
use gridbot_observability::{LoggingAlertSink, PipelineMetrics};
use gridbot_store::InMemoryStore;
use gridbot_worker::{Pipeline, WorkerConfig};
use std::env;
use std::sync::Arc;
use tokio::time::interval;

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

#[tokio::main]
async fn main() {
    if env_flag("LOG_FORMAT_JSON") {
        gridbot_observability::init_json_logging();
    } else {
        gridbot_observability::init_logging();
    }

    let config = WorkerConfig::from_env();
    if !config.worker_enabled {
        tracing::info!("WORKER_ENABLED=false, exiting without starting the tick loop");
        return;
    }

    let cipher = env::var("CREDENTIALS_ENCRYPTION_KEY")
        .ok()
        .map(|key| CredentialCipher::new(&key).expect("CREDENTIALS_ENCRYPTION_KEY must be valid base64 key material"))
        .map(Arc::new);
    let provider = Arc::new(AdapterProvider::new(config.provider_config.clone(), reqwest::Client::new(), cipher));

    let pipeline = Pipeline::new(
        Arc::new(InMemoryStore::new()),
        gridbot_model::clock::system_clock(),
        provider,
        Arc::new(LoggingAlertSink),
        Arc::new(PipelineMetrics::default()),
        config.clone(),
    );

    tracing::info!(interval_ms = config.tick_interval.as_millis() as u64, "gridbot-worker starting tick loop");
    let mut tick = interval(config.tick_interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                pipeline.tick().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, exiting after current tick");
                break;
            }
        }
    }
}
