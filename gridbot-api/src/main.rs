//! Binary entry point for the HTTP command layer (spec.md §6). Env-driven
//! wiring mirrors the worker's — both binaries share one `AdapterProvider`
//! construction recipe, even though only the worker's tick loop touches the
//! cache under contention.

use gridbot_api::AppState;
use gridbot_crypto::CredentialCipher;
use gridbot_engine::{AdapterProvider, ProviderConfig};
use gridbot_store::InMemoryStore;
use std::env;
use std::sync::Arc;

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

    let cipher = env::var("CREDENTIALS_ENCRYPTION_KEY")
        .ok()
        .map(|key| CredentialCipher::new(&key).expect("CREDENTIALS_ENCRYPTION_KEY must be valid base64 key material"))
        .map(Arc::new);

    let provider_config = ProviderConfig {
        use_real_exchange: env_flag("WORKER_USE_REAL_EXCHANGE") || env::var("EXCHANGE_PROVIDER").as_deref() == Ok("real"),
        allow_mainnet_flag: env_flag("ALLOW_MAINNET_TRADING"),
        env_allows_mainnet: env_flag("ALLOW_MAINNET_TRADING"),
        cache_capacity: 256,
    };
    let provider = Arc::new(AdapterProvider::new(provider_config, reqwest::Client::new(), cipher.clone()));

    let state = AppState {
        store: Arc::new(InMemoryStore::new()),
        clock: gridbot_model::clock::system_clock(),
        provider,
        cipher,
    };

    let app = gridbot_api::build_router(state);

    let addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = tokio::net::TcpListener::bind(&addr).await.expect("failed to bind listener");
    tracing::info!(%addr, "gridbot-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
