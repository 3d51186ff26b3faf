//! Process-wide `tracing` init, shared by the `gridbot-api` and
//! `gridbot-worker` binaries. Grounded on `barter`'s own
//! `registry().with(EnvFilter).with(fmt::layer()).init()` skeleton; this
//! system has no audit-replica span to filter out, so there is no
//! counterpart to `barter`'s `AuditSpanFilter` layer.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> tracing_subscriber::filter::EnvFilter {
    tracing_subscriber::filter::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Human-readable logging, the default outside of production containers.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init()
}

/// Structured JSON logging for log-aggregated deployments.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init()
}
