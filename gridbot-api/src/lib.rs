//! The thin HTTP command layer over the bot store (spec.md §1: "out of
//! scope... a thin CRUD + command layer"; §6 names its exact contract).
//! Every handler delegates to `gridbot-risk`/`gridbot-preview`/
//! `gridbot-engine` — this crate owns routing and status-code mapping only.

pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{delete, post};
use axum::Router;
pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/bots/:id/start", post(routes::bots::start))
        .route("/bots/:id/pause", post(routes::bots::pause))
        .route("/bots/:id/resume", post(routes::bots::resume))
        .route("/bots/:id/stop", post(routes::bots::stop))
        .route("/bots/:id", delete(routes::bots::delete))
        .route("/bots/:id/risk-check", post(routes::bots::risk_check))
        .route("/accounts", post(routes::accounts::create))
        .route("/accounts/:id", delete(routes::accounts::delete))
        .with_state(state)
}
