//! The Trigger/Order Engine (spec.md §4.6): seven ordered steps run once
//! per bot per tick, stopping at the first that applies. Grounded on
//! `barter-execution`'s outbox-before-submit discipline generalised to a
//! full per-tick pipeline, with `gridbot-preview` supplying trigger-price
//! and sizing math rather than re-deriving it here.

use crate::retry::{default_jitter, is_due, next_retry_state, retries_remaining, RetryPolicy, RetryState};
use gridbot_decimal::Exact;
use gridbot_exchange::adapter::ExchangeAdapter;
use gridbot_exchange::types::CreateOrderRequest;
use gridbot_model::clock::SharedClock;
use gridbot_model::config::{ConfigError, RawBotConfig};
use gridbot_model::entities::{
    build_client_order_id, Bot, BotStatus, Order, OrderStatus, OrderType, Side,
};
use gridbot_model::error::ExchangeError;
use gridbot_model::ids::OrderId;
use gridbot_preview::{calculate_preview, BalanceView, MarketInfo, PreviewIssue, Ticker};
use gridbot_risk::gates::bounds_gate;
use gridbot_store::{Store, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Nothing to do this tick; the tag names which step decided so.
    NoOp(&'static str),
    Submitted { client_order_id: String },
    Retrying { client_order_id: String, attempts: u32 },
    /// The bot was CASed to ERROR; `code` is the `lastError` prefix.
    ErroredOut { code: &'static str },
}

pub struct TriggerTickInputs<'a> {
    pub market: &'a MarketInfo,
    pub ticker: &'a Ticker,
    pub balance: &'a BalanceView,
}

/// Per-order submission retry state is process-local (spec.md §5): it is
/// simply rebuilt after a restart, correctness rests on the outbox + CAS
/// discipline in the store, not on these counters.
pub struct TriggerOrderEngine {
    store: Arc<dyn Store>,
    clock: SharedClock,
    retry_policy: RetryPolicy,
    submit_retry_state: Mutex<HashMap<OrderId, RetryState>>,
    jitter_fn: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl TriggerOrderEngine {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock, retry_policy: RetryPolicy) -> Self {
        Self::with_jitter(store, clock, retry_policy, default_jitter)
    }

    /// Test/deterministic construction: inject a fixed jitter source
    /// instead of `rand`.
    pub fn with_jitter(
        store: Arc<dyn Store>,
        clock: SharedClock,
        retry_policy: RetryPolicy,
        jitter_fn: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock,
            retry_policy,
            submit_retry_state: Mutex::new(HashMap::new()),
            jitter_fn: Box::new(jitter_fn),
        }
    }

    pub async fn tick(
        &self,
        adapter: &dyn ExchangeAdapter,
        bot: &Bot,
        inputs: &TriggerTickInputs<'_>,
    ) -> Result<TriggerOutcome, EngineError> {
        // Step 1: outbox drain.
        if let Some(order) = self.store.latest_outbox_order_for_bot(&bot.id).await? {
            return self.submit_with_retry(adapter, bot, order).await;
        }

        // Step 2: open-order guard.
        if !self.store.list_open_orders_for_bot(&bot.id).await?.is_empty() {
            return Ok(TriggerOutcome::NoOp("open_order_guard"));
        }

        // Step 3: config normalisation + re-pin.
        let config = match RawBotConfig::parse(&bot.config_json) {
            Ok(c) => c,
            Err(e) => return self.error_out(bot, config_error_code(&e), &e.to_string()).await,
        };
        let config = match config.repin_to_frozen_reference(bot.auto_close_reference_price) {
            Ok(c) => c,
            Err(e) => return self.error_out(bot, config_error_code(&e), &e.to_string()).await,
        };

        // Step 4: bounds gate.
        if let Err(rejection) = bounds_gate(config.trigger.price_min, config.trigger.price_max, inputs.ticker.last) {
            tracing::debug!(bot_id = %bot.id, code = rejection.code(), "trigger: bounds gate blocked tick");
            return Ok(TriggerOutcome::NoOp("bounds_gate"));
        }

        // Step 5: post-fill follow-up.
        if let Some(last_filled) = self.store.latest_filled_order_for_bot(&bot.id).await? {
            return self.submit_next_leg(adapter, bot, &config, &last_filled, inputs).await;
        }

        // Step 6: first trigger.
        if bot.status != BotStatus::WaitingTrigger {
            return Ok(TriggerOutcome::NoOp("not_waiting_trigger"));
        }
        let preview = calculate_preview(&config, inputs.market, inputs.ticker, inputs.balance);
        let (side, price, preview_order) = if inputs.ticker.last <= preview.buy_trigger_price {
            (Side::Buy, preview.buy_trigger_price, preview.buy_order)
        } else if inputs.ticker.last >= preview.sell_trigger_price {
            (Side::Sell, preview.sell_trigger_price, preview.sell_order)
        } else {
            return Ok(TriggerOutcome::NoOp("waiting_for_trigger_price"));
        };

        if let Some(issue) = preview.issues.iter().find(|i| blocks_side(i, side)) {
            return self.error_out(bot, issue.code(), &format!("{issue:?}")).await;
        }
        let Some(preview_order) = preview_order else {
            return self
                .error_out(bot, "MISSING_SIZING_QUANTITY", &format!("no sizing configured for {side:?}"))
                .await;
        };

        // Step 7: atomic intent + bump, then submit.
        if !self.store.list_orders_for_bot(&bot.id).await?.is_empty() {
            // Raced with another tick's step 5/7; let the open-order guard
            // or outbox drain handle it next time.
            return Ok(TriggerOutcome::NoOp("order_already_exists"));
        }
        let order = self
            .persist_new_intent(bot, adapter.exchange(), side, price, preview_order.amount, OrderType::Limit)
            .await?;

        let expected_version = bot.status_version;
        if let Err(e) = self
            .store
            .cas_update_bot(&bot.id, expected_version, Box::new(|b| b.status = BotStatus::Running))
            .await
        {
            if e != StoreError::CasFailed {
                return Err(e.into());
            }
            tracing::warn!(bot_id = %bot.id, "trigger: CAS to RUNNING missed after intent persisted; order stands, next tick will reconcile status");
        }

        self.submit_with_retry(adapter, bot, order).await
    }

    async fn submit_next_leg(
        &self,
        adapter: &dyn ExchangeAdapter,
        bot: &Bot,
        config: &RawBotConfig,
        last_filled: &Order,
        inputs: &TriggerTickInputs<'_>,
    ) -> Result<TriggerOutcome, EngineError> {
        let base_price = last_filled.avg_fill_price.or(last_filled.price).unwrap_or(inputs.ticker.last);
        let mut leg_config = config.clone();
        leg_config.trigger.base_price_type = gridbot_model::config::BasePriceType::Manual;
        leg_config.trigger.base_price = Some(base_price);

        let preview = calculate_preview(&leg_config, inputs.market, inputs.ticker, inputs.balance);
        let next_side = last_filled.side.opposite();
        let (price, next_order) = match next_side {
            Side::Buy => (preview.buy_trigger_price, preview.buy_order),
            Side::Sell => (preview.sell_trigger_price, preview.sell_order),
        };
        let Some(next_order) = next_order else {
            return self
                .error_out(bot, "MISSING_SIZING_QUANTITY", &format!("no sizing configured for {next_side:?}"))
                .await;
        };

        if !self.store.list_orders_for_bot(&bot.id).await?.iter().any(|o| o.is_outbox() || o.is_open()) {
            let order = self
                .persist_new_intent(bot, adapter.exchange(), next_side, price, next_order.amount, OrderType::Limit)
                .await?;
            self.submit_with_retry(adapter, bot, order).await
        } else {
            Ok(TriggerOutcome::NoOp("next_leg_already_in_flight"))
        }
    }

    async fn persist_new_intent(
        &self,
        bot: &Bot,
        exchange: gridbot_model::entities::Exchange,
        side: Side,
        price: Exact,
        amount: Exact,
        kind: OrderType,
    ) -> Result<Order, EngineError> {
        let seq = self.store.next_intent_seq(&bot.id).await?;
        let client_order_id = build_client_order_id(&bot.id, seq, false);
        let order = Order {
            id: OrderId::random(),
            bot_id: bot.id.clone(),
            exchange,
            symbol: bot.symbol.clone(),
            client_order_id,
            exchange_order_id: None,
            intent_seq: seq,
            side,
            kind,
            status: OrderStatus::New,
            price: Some(price),
            amount,
            filled_amount: Exact::ZERO,
            avg_fill_price: None,
            submitted_at: None,
            created_at: self.clock.now(),
        };
        Ok(self.store.upsert_order(order).await?)
    }

    /// §4.6.1 bounded-retry submission, shared by the outbox-drain path and
    /// every path that freshly persists an intent this tick.
    async fn submit_with_retry(
        &self,
        adapter: &dyn ExchangeAdapter,
        bot: &Bot,
        order: Order,
    ) -> Result<TriggerOutcome, EngineError> {
        if matches!(
            bot.status,
            BotStatus::Stopping | BotStatus::Paused | BotStatus::Stopped | BotStatus::Error
        ) {
            return Ok(TriggerOutcome::NoOp("bot_not_submittable"));
        }
        if order.submitted_at.is_some() || order.exchange_order_id.is_some() {
            self.submit_retry_state.lock().remove(&order.id);
            return Ok(TriggerOutcome::NoOp("already_submitted"));
        }

        let now = self.clock.now();
        let attempts_so_far = {
            let states = self.submit_retry_state.lock();
            match states.get(&order.id) {
                Some(state) if !is_due(now, Some(state)) => {
                    return Ok(TriggerOutcome::Retrying {
                        client_order_id: order.client_order_id.clone(),
                        attempts: state.attempts,
                    });
                }
                Some(state) => state.attempts,
                None => 0,
            }
        };

        let request = CreateOrderRequest {
            symbol: order.symbol.clone(),
            side: order.side,
            kind: order.kind,
            price: order.price,
            amount: order.amount,
            client_order_id: order.client_order_id.clone(),
        };

        match adapter.create_order(request).await {
            Ok(result) => {
                self.submit_retry_state.lock().remove(&order.id);
                let mut updated = order.clone();
                updated.exchange_order_id = Some(result.exchange_order_id);
                updated.status = updated.status.merge(result.status);
                updated.submitted_at = Some(now);
                self.store.upsert_order(updated).await?;
                Ok(TriggerOutcome::Submitted { client_order_id: order.client_order_id })
            }
            Err(err) => {
                if err.retryable() && retries_remaining(&self.retry_policy, attempts_so_far) {
                    let retry_after_ms = match &err {
                        ExchangeError::RateLimit { retry_after_ms } => *retry_after_ms,
                        _ => None,
                    };
                    let jitter = (self.jitter_fn)();
                    let state = next_retry_state(now, &self.retry_policy, attempts_so_far, retry_after_ms, jitter);
                    let attempts = state.attempts;
                    self.submit_retry_state.lock().insert(order.id.clone(), state);
                    Ok(TriggerOutcome::Retrying { client_order_id: order.client_order_id, attempts })
                } else {
                    self.submit_retry_state.lock().remove(&order.id);
                    let code = err.code();
                    self.error_out(bot, "ORDER_SUBMIT_FAILED", &format!("{code}: {err}")).await
                }
            }
        }
    }

    async fn error_out(&self, bot: &Bot, code: &'static str, msg: &str) -> Result<TriggerOutcome, EngineError> {
        let last_error = format!("{code}: {msg}");
        let expected_version = bot.status_version;
        match self
            .store
            .cas_update_bot(
                &bot.id,
                expected_version,
                Box::new({
                    let last_error = last_error.clone();
                    move |b| {
                        b.status = BotStatus::Error;
                        b.last_error = Some(last_error);
                    }
                }),
            )
            .await
        {
            Ok(_) | Err(StoreError::CasFailed) => Ok(TriggerOutcome::ErroredOut { code }),
            Err(e) => Err(e.into()),
        }
    }
}

fn config_error_code(e: &ConfigError) -> &'static str {
    match e {
        ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        ConfigError::UnsupportedBasePriceType(_) => "UNSUPPORTED_BASE_PRICE_TYPE",
        ConfigError::MissingManualBasePrice => "MISSING_MANUAL_BASE_PRICE",
        ConfigError::MissingFrozenReferencePrice => "MISSING_FROZEN_REFERENCE_PRICE",
    }
}

fn blocks_side(issue: &PreviewIssue, side: Side) -> bool {
    matches!(
        issue,
        PreviewIssue::BelowMinAmount { side: s, .. } | PreviewIssue::BelowMinNotional { side: s, .. } if *s == side
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use gridbot_exchange::types::{
        Balances, CreateOrderResult, ExchangeOrderFull, ExchangeTrade,
    };
    use gridbot_model::clock::FixedClock;
    use gridbot_model::entities::Exchange;
    use gridbot_model::ids::{BotId, ExchangeAccountId, UserId};
    use gridbot_store::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedAdapter {
        exchange: Exchange,
        calls: AtomicUsize,
        script: Mutex<Vec<Result<CreateOrderResult, ExchangeError>>>,
    }

    #[async_trait]
    impl ExchangeAdapter for ScriptedAdapter {
        fn exchange(&self) -> Exchange {
            self.exchange
        }
        async fn fetch_open_orders_full(&self, _symbol: &str) -> Result<Vec<ExchangeOrderFull>, ExchangeError> {
            Ok(vec![])
        }
        async fn fetch_my_trades(&self, _symbol: &str, _since: Option<chrono::DateTime<Utc>>) -> Result<Vec<ExchangeTrade>, ExchangeError> {
            Ok(vec![])
        }
        async fn try_create_order(&self, _request: CreateOrderRequest) -> Result<CreateOrderResult, ExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().remove(0)
        }
        async fn cancel_order(&self, _exchange_order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
            Ok(())
        }
        async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
            Ok(Balances::new())
        }
        async fn fetch_last_price(&self, _symbol: &str) -> Result<Exact, ExchangeError> {
            Ok(Exact::ZERO)
        }
    }

    fn config_json() -> &'static str {
        r#"{
            "trigger": {"gridType":"percent","basePriceType":"manual","basePrice":"600","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"amount","gridSymmetric":true,"symmetric":{"orderQuantity":"120"}},
            "risk": {}
        }"#
    }

    fn waiting_bot() -> Bot {
        let mut bot = Bot::new(
            BotId::new("bot-1"),
            UserId::new("user-1"),
            ExchangeAccountId::new("acct-1"),
            "BNB/USDT".into(),
            config_json().into(),
            Utc::now(),
        );
        bot.status = BotStatus::WaitingTrigger;
        bot
    }

    fn market() -> MarketInfo {
        MarketInfo { min_amount: Exact::from_decimal(dec!(0.001)), min_notional: Exact::from_decimal(dec!(10)) }
    }

    fn balance() -> BalanceView {
        BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) }
    }

    #[tokio::test]
    async fn first_trigger_submits_and_bumps_bot_to_running() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(waiting_bot()).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let engine = TriggerOrderEngine::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter {
            exchange: Exchange::Binance,
            calls: AtomicUsize::new(0),
            script: Mutex::new(vec![Ok(CreateOrderResult { exchange_order_id: "e1".into(), client_order_id: "gb1-bot1-1".into(), status: OrderStatus::New })]),
        };
        let ticker = Ticker { last: Exact::from_decimal(dec!(580)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let outcome = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::Submitted { .. }));

        let reloaded = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Running);
        let orders = store.list_orders_for_bot(&bot.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].submitted_at.is_some());
    }

    #[tokio::test]
    async fn outside_trigger_band_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(waiting_bot()).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let engine = TriggerOrderEngine::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter { exchange: Exchange::Binance, calls: AtomicUsize::new(0), script: Mutex::new(vec![]) };
        let ticker = Ticker { last: Exact::from_decimal(dec!(600)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let outcome = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::NoOp("waiting_for_trigger_price"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_order_blocks_new_submission() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(waiting_bot()).await.unwrap();
        store
            .upsert_order(Order {
                id: OrderId::new("o1"),
                bot_id: bot.id.clone(),
                exchange: Exchange::Binance,
                symbol: "BNB/USDT".into(),
                client_order_id: "gb1-bot1-1".into(),
                exchange_order_id: Some("e1".into()),
                intent_seq: 1,
                side: Side::Buy,
                kind: OrderType::Limit,
                status: OrderStatus::New,
                price: Some(Exact::from_decimal(dec!(588))),
                amount: Exact::from_decimal(dec!(1)),
                filled_amount: Exact::ZERO,
                avg_fill_price: None,
                submitted_at: Some(Utc::now()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let engine = TriggerOrderEngine::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter { exchange: Exchange::Binance, calls: AtomicUsize::new(0), script: Mutex::new(vec![]) };
        let ticker = Ticker { last: Exact::from_decimal(dec!(580)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let outcome = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::NoOp("open_order_guard"));
    }

    #[tokio::test]
    async fn retryable_failure_schedules_backoff_then_errors_after_exhaustion() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(waiting_bot()).await.unwrap();
        let clock = FixedClock::new(Utc::now());
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let engine = TriggerOrderEngine::with_jitter(store.clone(), shared_clock, RetryPolicy::new(2, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter {
            exchange: Exchange::Binance,
            calls: AtomicUsize::new(0),
            script: Mutex::new(vec![
                Err(ExchangeError::Timeout),
                Err(ExchangeError::Timeout),
            ]),
        };
        let ticker = Ticker { last: Exact::from_decimal(dec!(580)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let first = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert!(matches!(first, TriggerOutcome::Retrying { attempts: 1, .. }));

        clock.advance(chrono::Duration::milliseconds(500));
        let reloaded = store.get_bot(&bot.id).await.unwrap();
        let second = engine.tick(&adapter, &reloaded, &inputs).await.unwrap();
        assert!(matches!(second, TriggerOutcome::ErroredOut { code: "ORDER_SUBMIT_FAILED" }));

        let final_bot = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(final_bot.status, BotStatus::Error);
        assert!(final_bot.last_error.unwrap().starts_with("ORDER_SUBMIT_FAILED:"));
    }

    #[tokio::test]
    async fn below_min_notional_hard_errors_instead_of_submitting() {
        let config = r#"{
            "trigger": {"gridType":"percent","basePriceType":"manual","basePrice":"600","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"amount","gridSymmetric":true,"symmetric":{"orderQuantity":"1"}},
            "risk": {}
        }"#;
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut bot = waiting_bot();
        bot.config_json = config.into();
        let bot = store.create_bot(bot).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let engine = TriggerOrderEngine::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter { exchange: Exchange::Binance, calls: AtomicUsize::new(0), script: Mutex::new(vec![]) };
        let ticker = Ticker { last: Exact::from_decimal(dec!(580)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let outcome = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::ErroredOut { code: "BELOW_MIN_NOTIONAL" });
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
        let reloaded = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Error);
    }

    #[tokio::test]
    async fn current_base_price_without_frozen_reference_errors_rather_than_drifts() {
        let config = r#"{
            "trigger": {"gridType":"percent","basePriceType":"current","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"amount","gridSymmetric":true,"symmetric":{"orderQuantity":"120"}},
            "risk": {}
        }"#;
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut bot = waiting_bot();
        bot.config_json = config.into();
        bot.auto_close_reference_price = None;
        let bot = store.create_bot(bot).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let engine = TriggerOrderEngine::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), || 0.0);
        let adapter = ScriptedAdapter { exchange: Exchange::Binance, calls: AtomicUsize::new(0), script: Mutex::new(vec![]) };
        let ticker = Ticker { last: Exact::from_decimal(dec!(580)) };
        let inputs = TriggerTickInputs { market: &market(), ticker: &ticker, balance: &balance() };

        let outcome = engine.tick(&adapter, &bot, &inputs).await.unwrap();
        assert_eq!(outcome, TriggerOutcome::ErroredOut { code: "MISSING_FROZEN_REFERENCE_PRICE" });
    }
}
