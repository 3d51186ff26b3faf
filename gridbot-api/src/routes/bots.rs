//! Bot command routes (spec.md §6 HTTP API table). Every handler is a thin
//! translation from a path/body into the already-built domain calls — no
//! business logic lives here that `gridbot-risk`/`gridbot-preview`/
//! `gridbot-engine` doesn't already own.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use gridbot_decimal::Exact;
use gridbot_engine::balance_view_from;
use gridbot_model::config::RawBotConfig;
use gridbot_model::entities::{Bot, BotStatus};
use gridbot_model::ids::{BotId, RunId};
use gridbot_preview::{calculate_preview, MarketInfo, Ticker};
use gridbot_risk::autoclose::{self, AutoCloseConfig};
use serde::{Deserialize, Serialize};

async fn load_bot(state: &AppState, id: &str) -> Result<Bot, ApiError> {
    state
        .store
        .get_bot(&BotId::new(id))
        .await
        .map_err(ApiError::from)
}

fn require_status(bot: &Bot, expected: &[BotStatus], code: &'static str) -> Result<(), ApiError> {
    if expected.contains(&bot.status) {
        Ok(())
    } else {
        Err(ApiError::StateConflict {
            code,
            message: format!("bot {} is {:?}, expected one of {expected:?}", bot.id, bot.status),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartBotRequest {
    /// Exchange lot-size floor for the bot's symbol. No adapter exposes
    /// exchange-info filters (spec.md §4.3 lists no such method; a real
    /// exchange-info feed is the exchange-client collaborator per spec.md
    /// §1) — the caller supplies it, defaulting to "no floor" when absent.
    pub min_amount: Option<Exact>,
    pub min_notional: Option<Exact>,
}

pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<StartBotRequest>,
) -> Result<Json<Bot>, ApiError> {
    let bot = load_bot(&state, &id).await?;
    require_status(&bot, &[BotStatus::Draft], "INVALID_STATE_FOR_START")?;

    let config = RawBotConfig::parse(&bot.config_json)?;
    config.validate_at_start()?;

    let account = state.store.get_exchange_account(&bot.exchange_account_id).await?;
    let adapter = state.provider.get_or_build(&account)?;
    let last_price = adapter.fetch_last_price(&bot.symbol).await?;

    let reference_price = autoclose::resolve_reference_price(
        config.trigger.base_price_type,
        config.trigger.base_price,
        last_price,
    );
    let frozen_at = autoclose::freeze_moment(&state.clock);

    let market = MarketInfo {
        min_amount: body.min_amount.unwrap_or(Exact::ZERO),
        min_notional: body.min_notional.unwrap_or(Exact::ZERO),
    };
    let ticker = Ticker { last: last_price };
    let balances = adapter.fetch_balance().await?;
    let balance = balance_view_from(&balances, &bot.symbol);
    let preview = calculate_preview(&config, &market, &ticker, &balance);
    if !preview.issues.is_empty() {
        return Err(ApiError::Validation(format!(
            "preview rejected start: {:?}",
            preview.issues
        )));
    }

    let expected_version = bot.status_version;
    let run_id = RunId::fresh();
    let updated = state
        .store
        .cas_update_bot(
            &bot.id,
            expected_version,
            Box::new(move |b: &mut Bot| {
                b.status = BotStatus::WaitingTrigger;
                b.auto_close_reference_price = reference_price;
                b.auto_close_reference_frozen_at = Some(frozen_at);
                b.run_id = Some(run_id);
            }),
        )
        .await?;
    Ok(Json(updated))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Bot>, ApiError> {
    let bot = load_bot(&state, &id).await?;
    require_status(&bot, &[BotStatus::Running, BotStatus::WaitingTrigger], "INVALID_STATE_FOR_PAUSE")?;
    let updated = state
        .store
        .cas_update_bot(&bot.id, bot.status_version, Box::new(|b: &mut Bot| b.status = BotStatus::Paused))
        .await?;
    Ok(Json(updated))
}

pub async fn resume(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Bot>, ApiError> {
    let bot = load_bot(&state, &id).await?;
    require_status(&bot, &[BotStatus::Paused], "INVALID_STATE_FOR_RESUME")?;
    let updated = state
        .store
        .cas_update_bot(&bot.id, bot.status_version, Box::new(|b: &mut Bot| b.status = BotStatus::Running))
        .await?;
    Ok(Json(updated))
}

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Bot>, ApiError> {
    let bot = load_bot(&state, &id).await?;
    require_status(
        &bot,
        &[BotStatus::WaitingTrigger, BotStatus::Running, BotStatus::Paused],
        "INVALID_STATE_FOR_STOP",
    )?;
    let updated = state
        .store
        .cas_update_bot(
            &bot.id,
            bot.status_version,
            Box::new(|b: &mut Bot| {
                b.status = BotStatus::Stopping;
                b.last_error = Some("USER_STOP".into());
            }),
        )
        .await?;
    Ok(Json(updated))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Result<(), ApiError> {
    let bot = load_bot(&state, &id).await?;
    require_status(&bot, &[BotStatus::Draft, BotStatus::Stopped, BotStatus::Error], "INVALID_STATE_FOR_DELETE")?;
    state.store.delete_bot(&bot.id).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskCheckResponse {
    pub triggered: bool,
    pub previously_triggered: bool,
    pub new_status: BotStatus,
    pub drawdown_percent: Option<Exact>,
}

pub async fn risk_check(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RiskCheckResponse>, ApiError> {
    let bot = load_bot(&state, &id).await?;
    let config = RawBotConfig::parse(&bot.config_json)?;
    let account = state.store.get_exchange_account(&bot.exchange_account_id).await?;
    let adapter = state.provider.get_or_build(&account)?;
    let last_price = adapter.fetch_last_price(&bot.symbol).await?;

    let auto_close_config = AutoCloseConfig {
        enable_auto_close: config.risk.enable_auto_close,
        auto_close_drawdown_percent: config.risk.auto_close_drawdown_percent,
    };
    let (outcome, decision) =
        autoclose::evaluate_and_persist(&*state.store, &state.clock, &bot.id, &auto_close_config, last_price).await?;

    let new_status = match outcome {
        autoclose::AutoCloseOutcome::Triggered | autoclose::AutoCloseOutcome::PreviouslyTriggered => {
            BotStatus::Stopping
        }
        _ => bot.status,
    };
    Ok(Json(RiskCheckResponse {
        triggered: matches!(outcome, autoclose::AutoCloseOutcome::Triggered),
        previously_triggered: matches!(outcome, autoclose::AutoCloseOutcome::PreviouslyTriggered),
        new_status,
        drawdown_percent: Some(decision.drawdown_percent),
    }))
}
