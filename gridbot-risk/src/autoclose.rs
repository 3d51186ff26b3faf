//! AutoClose drawdown evaluation (spec.md §4.5). A pure decision function
//! plus a persistence wrapper, the same split as
//! `GlobalRiskManager::on_trade_closed` in the pack's risk-manager example:
//! compute first, mutate store state second, never interleave the two.

use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use gridbot_model::clock::Clock;
use gridbot_model::entities::{Bot, BotStatus};
use gridbot_model::ids::BotId;
use gridbot_store::{Store, StoreError};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCloseConfig {
    pub enable_auto_close: bool,
    pub auto_close_drawdown_percent: Option<Exact>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCloseInputs {
    pub reference_price: Exact,
    pub last_price: Exact,
    pub already_triggered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCloseDecision {
    pub should_trigger: bool,
    pub drawdown_percent: Exact,
}

/// Pure drawdown check (spec.md §4.5): never mutates anything, never fails —
/// an unparseable last price is a caller-level `EXCHANGE_UNAVAILABLE`, not a
/// decision this function is asked to make.
pub fn evaluate(config: &AutoCloseConfig, inputs: &AutoCloseInputs) -> AutoCloseDecision {
    let drawdown_percent = inputs.reference_price.drawdown_percent_from(inputs.last_price);

    let Some(drawdown_threshold) = config.auto_close_drawdown_percent else {
        return AutoCloseDecision { should_trigger: false, drawdown_percent };
    };
    if !config.enable_auto_close || inputs.already_triggered {
        return AutoCloseDecision { should_trigger: false, drawdown_percent };
    }

    let threshold_price = inputs.reference_price.apply_drawdown_percent(drawdown_threshold);
    let should_trigger = inputs.last_price <= threshold_price;
    AutoCloseDecision { should_trigger, drawdown_percent }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoCloseOutcome {
    NotTriggered,
    Triggered,
    /// CAS missed but `autoCloseTriggeredAt` is already set — someone else
    /// (a racing tick, or a retried request) already applied this exact
    /// transition (spec.md §4.5).
    PreviouslyTriggered,
    ConcurrentModification,
}

#[derive(Debug, thiserror::Error)]
pub enum AutoCloseError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persistence wrapper (spec.md §4.5): decides via [`evaluate`], then on
/// `shouldTrigger` CASes the bot to STOPPING conditional on
/// `autoCloseTriggeredAt IS NULL`. Called identically from the worker tick
/// and the thin HTTP `risk-check` route (spec.md §9's "unified service
/// layer" resolution).
pub async fn evaluate_and_persist(
    store: &dyn Store,
    clock: &Arc<dyn Clock>,
    bot_id: &BotId,
    config: &AutoCloseConfig,
    last_price: Exact,
) -> Result<(AutoCloseOutcome, AutoCloseDecision), AutoCloseError> {
    let bot = store.get_bot(bot_id).await?;
    let Some(reference_price) = bot.auto_close_reference_price else {
        return Ok((
            AutoCloseOutcome::NotTriggered,
            AutoCloseDecision { should_trigger: false, drawdown_percent: Exact::ZERO },
        ));
    };

    let inputs = AutoCloseInputs {
        reference_price,
        last_price,
        already_triggered: bot.auto_close_triggered_at.is_some(),
    };
    let decision = evaluate(config, &inputs);
    if !decision.should_trigger {
        return Ok((AutoCloseOutcome::NotTriggered, decision));
    }

    let now = clock.now();
    let reason = format!("AUTO_CLOSE triggered: drawdown {}%", decision.drawdown_percent);
    let expected_version = bot.status_version;
    match store
        .cas_update_bot(
            bot_id,
            expected_version,
            Box::new(move |b: &mut Bot| {
                b.status = BotStatus::Stopping;
                b.auto_close_triggered_at = Some(now);
                b.auto_close_reason = Some("AUTO_CLOSE".into());
                b.last_error = Some(reason);
            }),
        )
        .await
    {
        Ok(_) => Ok((AutoCloseOutcome::Triggered, decision)),
        Err(StoreError::CasFailed) => {
            let reread = store.get_bot(bot_id).await?;
            if reread.auto_close_triggered_at.is_some() {
                Ok((AutoCloseOutcome::PreviouslyTriggered, decision))
            } else {
                Ok((AutoCloseOutcome::ConcurrentModification, decision))
            }
        }
        Err(other) => Err(other.into()),
    }
}

/// `basePriceType` resolution at start time (spec.md §4.5): `current` pins
/// to the live ticker, `manual` to the configured price. Called once, when
/// a bot leaves DRAFT, to freeze `autoCloseReferencePrice` for the run.
pub fn resolve_reference_price(
    base_price_type: gridbot_model::config::BasePriceType,
    configured_base_price: Option<Exact>,
    current_ticker_last: Exact,
) -> Option<Exact> {
    use gridbot_model::config::BasePriceType;
    match base_price_type {
        BasePriceType::Current => Some(current_ticker_last),
        BasePriceType::Manual => configured_base_price,
        BasePriceType::Cost | BasePriceType::Avg24h => None,
    }
}

/// Marker for the moment in time the reference price was frozen, kept
/// separate from [`resolve_reference_price`] so callers can audit when a
/// run began (spec.md §3 `autoCloseReferencePrice` freeze rule).
pub fn freeze_moment(clock: &Arc<dyn Clock>) -> DateTime<Utc> {
    clock.now()
}
