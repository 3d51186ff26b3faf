//! The Stopping Executor (spec.md §4.7): cancels open orders, optionally
//! force-closes the residual base balance when the stop reason was a
//! STOP_LOSS/TAKE_PROFIT AutoClose trigger, then CASes the bot to STOPPED.
//! Retry/escalation shape mirrors [`crate::trigger`]'s §4.6.1 exactly
//! (spec.md §4.7.1).

use crate::retry::{default_jitter, is_due, next_retry_state, retries_remaining, RetryPolicy, RetryState};
use gridbot_decimal::Exact;
use gridbot_exchange::adapter::ExchangeAdapter;
use gridbot_exchange::types::CreateOrderRequest;
use gridbot_model::clock::SharedClock;
use gridbot_model::entities::{
    build_client_order_id, is_close_client_order_id, Bot, BotStatus, Order, OrderStatus,
    OrderType, Side, CLOSE_ORDER_ID_PREFIX,
};
use gridbot_model::error::ExchangeError;
use gridbot_model::ids::BotId;
use gridbot_observability::{stopping_failed_alert, AlertSink};
use gridbot_store::{Store, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::trigger::EngineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoppingOutcome {
    NotApplicable,
    Retrying { attempts: u32 },
    WaitingForCloseOrder,
    Stopped,
    Escalated { code: &'static str },
}

pub struct StoppingExecutor {
    store: Arc<dyn Store>,
    clock: SharedClock,
    retry_policy: RetryPolicy,
    stop_retry_state: Mutex<HashMap<BotId, RetryState>>,
    alert_sink: Arc<dyn AlertSink>,
    jitter_fn: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl StoppingExecutor {
    pub fn new(store: Arc<dyn Store>, clock: SharedClock, retry_policy: RetryPolicy, alert_sink: Arc<dyn AlertSink>) -> Self {
        Self::with_jitter(store, clock, retry_policy, alert_sink, default_jitter)
    }

    pub fn with_jitter(
        store: Arc<dyn Store>,
        clock: SharedClock,
        retry_policy: RetryPolicy,
        alert_sink: Arc<dyn AlertSink>,
        jitter_fn: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            clock,
            retry_policy,
            stop_retry_state: Mutex::new(HashMap::new()),
            alert_sink,
            jitter_fn: Box::new(jitter_fn),
        }
    }

    pub async fn tick(
        &self,
        adapter: &dyn ExchangeAdapter,
        bot: &Bot,
        free_base_balance: Exact,
    ) -> Result<StoppingOutcome, EngineError> {
        if bot.status != BotStatus::Stopping {
            return Ok(StoppingOutcome::NotApplicable);
        }

        let now = self.clock.now();
        {
            let states = self.stop_retry_state.lock();
            if let Some(state) = states.get(&bot.id) {
                if !is_due(now, Some(state)) {
                    return Ok(StoppingOutcome::Retrying { attempts: state.attempts });
                }
            }
        }

        let open = match adapter.fetch_open_orders(&bot.symbol).await {
            Ok(o) => o,
            Err(e) => return self.handle_failure(bot, e).await,
        };

        let forced_close = is_forced_close(bot);
        for order_ref in &open {
            if forced_close && is_close_client_order_id(&order_ref.client_order_id) {
                continue;
            }
            if let Err(e) = adapter.cancel_order(&order_ref.exchange_order_id, &bot.symbol).await {
                return self.handle_failure(bot, e).await;
            }
        }

        if forced_close {
            match self.force_close(adapter, bot, free_base_balance).await? {
                ForceCloseProgress::ReadyToStop => {}
                ForceCloseProgress::Wait(outcome) => return Ok(outcome),
                ForceCloseProgress::Failed(e) => return self.handle_failure(bot, e).await,
                ForceCloseProgress::Invalid(code, msg) => return self.escalate_immediately(bot, code, &msg).await,
            }
        }

        self.stop_retry_state.lock().remove(&bot.id);
        let expected_version = bot.status_version;
        match self
            .store
            .cas_update_bot(
                &bot.id,
                expected_version,
                Box::new(|b| {
                    b.status = BotStatus::Stopped;
                    b.run_id = None;
                }),
            )
            .await
        {
            Ok(_) | Err(StoreError::CasFailed) => Ok(StoppingOutcome::Stopped),
            Err(e) => Err(e.into()),
        }
    }

    async fn force_close(
        &self,
        adapter: &dyn ExchangeAdapter,
        bot: &Bot,
        free_base_balance: Exact,
    ) -> Result<ForceCloseProgress, EngineError> {
        if bot.symbol.split_once('/').is_none() {
            return Ok(ForceCloseProgress::Invalid("INVALID_SYMBOL", format!("cannot parse symbol {}", bot.symbol)));
        }

        if let Some(existing) = self.store.latest_order_with_prefix(&bot.id, CLOSE_ORDER_ID_PREFIX).await? {
            if existing.status == OrderStatus::Filled {
                return Ok(ForceCloseProgress::ReadyToStop);
            }
            if existing.is_outbox() {
                return self.submit_close_order(adapter, existing).await;
            }
            return Ok(ForceCloseProgress::Wait(StoppingOutcome::WaitingForCloseOrder));
        }

        if free_base_balance.is_zero() {
            return Ok(ForceCloseProgress::ReadyToStop);
        }

        let (base, _quote) = bot.symbol.split_once('/').expect("checked above");
        let seq = self.store.next_intent_seq(&bot.id).await?;
        let order = Order {
            id: gridbot_model::ids::OrderId::random(),
            bot_id: bot.id.clone(),
            exchange: adapter.exchange(),
            symbol: bot.symbol.clone(),
            client_order_id: build_client_order_id(&bot.id, seq, true),
            exchange_order_id: None,
            intent_seq: seq,
            side: Side::Sell,
            kind: OrderType::Market,
            status: OrderStatus::New,
            price: None,
            amount: free_base_balance,
            filled_amount: Exact::ZERO,
            avg_fill_price: None,
            submitted_at: None,
            created_at: self.clock.now(),
        };
        tracing::info!(bot_id = %bot.id, base, amount = %free_base_balance, "stopping: force-closing residual base balance");
        let order = self.store.upsert_order(order).await?;
        self.submit_close_order(adapter, order).await
    }

    async fn submit_close_order(&self, adapter: &dyn ExchangeAdapter, order: Order) -> Result<ForceCloseProgress, EngineError> {
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
                let mut updated = order.clone();
                updated.exchange_order_id = Some(result.exchange_order_id);
                updated.status = updated.status.merge(result.status);
                updated.submitted_at = Some(self.clock.now());
                let final_status = updated.status;
                self.store.upsert_order(updated).await?;
                if final_status == OrderStatus::Filled {
                    Ok(ForceCloseProgress::ReadyToStop)
                } else {
                    Ok(ForceCloseProgress::Wait(StoppingOutcome::WaitingForCloseOrder))
                }
            }
            Err(e) => Ok(ForceCloseProgress::Failed(e)),
        }
    }

    async fn handle_failure(&self, bot: &Bot, err: ExchangeError) -> Result<StoppingOutcome, EngineError> {
        let now = self.clock.now();
        let attempts_so_far = self.stop_retry_state.lock().get(&bot.id).map(|s| s.attempts).unwrap_or(0);

        if err.retryable() && retries_remaining(&self.retry_policy, attempts_so_far) {
            let retry_after_ms = match &err {
                ExchangeError::RateLimit { retry_after_ms } => *retry_after_ms,
                _ => None,
            };
            let jitter = (self.jitter_fn)();
            let state = next_retry_state(now, &self.retry_policy, attempts_so_far, retry_after_ms, jitter);
            let attempts = state.attempts;
            self.stop_retry_state.lock().insert(bot.id.clone(), state);
            Ok(StoppingOutcome::Retrying { attempts })
        } else {
            self.escalate_immediately(bot, "STOPPING_FAILED", &format!("{}: {err}", err.code())).await
        }
    }

    async fn escalate_immediately(&self, bot: &Bot, code: &'static str, msg: &str) -> Result<StoppingOutcome, EngineError> {
        self.stop_retry_state.lock().remove(&bot.id);
        let last_error = format!("STOPPING_FAILED: {msg}");
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
            Ok(_) | Err(StoreError::CasFailed) => {
                self.alert_sink.send(
                    stopping_failed_alert(bot.id.as_str(), code, msg),
                    self.clock.now(),
                );
                Ok(StoppingOutcome::Escalated { code: "STOPPING_FAILED" })
            }
            Err(e) => Err(e.into()),
        }
    }
}

enum ForceCloseProgress {
    ReadyToStop,
    Wait(StoppingOutcome),
    Failed(ExchangeError),
    Invalid(&'static str, String),
}

/// A STOPPING run is a forced close iff the AutoClose-assigned `lastError`
/// begins with `STOP_LOSS` or `TAKE_PROFIT` (spec.md §4.7).
fn is_forced_close(bot: &Bot) -> bool {
    bot.last_error
        .as_deref()
        .map(|e| e.starts_with("STOP_LOSS") || e.starts_with("TAKE_PROFIT"))
        .unwrap_or(false)
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
    use gridbot_observability::LoggingAlertSink;
    use gridbot_store::InMemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedAdapter {
        exchange: Exchange,
        open_orders: Mutex<Vec<ExchangeOrderFull>>,
        open_calls: AtomicUsize,
        open_should_fail: bool,
        create_script: Mutex<Vec<Result<CreateOrderResult, ExchangeError>>>,
        canceled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExchangeAdapter for ScriptedAdapter {
        fn exchange(&self) -> Exchange {
            self.exchange
        }
        async fn fetch_open_orders_full(&self, _symbol: &str) -> Result<Vec<ExchangeOrderFull>, ExchangeError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if self.open_should_fail {
                return Err(ExchangeError::ExchangeUnavailable("down".into()));
            }
            Ok(self.open_orders.lock().clone())
        }
        async fn fetch_my_trades(&self, _symbol: &str, _since: Option<chrono::DateTime<Utc>>) -> Result<Vec<ExchangeTrade>, ExchangeError> {
            Ok(vec![])
        }
        async fn try_create_order(&self, _request: CreateOrderRequest) -> Result<CreateOrderResult, ExchangeError> {
            self.create_script.lock().remove(0)
        }
        async fn cancel_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
            self.canceled.lock().push(exchange_order_id.to_string());
            Ok(())
        }
        async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
            Ok(Balances::new())
        }
        async fn fetch_last_price(&self, _symbol: &str) -> Result<Exact, ExchangeError> {
            Ok(Exact::ZERO)
        }
    }

    fn stopping_bot(last_error: Option<&str>) -> Bot {
        let mut bot = Bot::new(
            BotId::new("bot-1"),
            UserId::new("user-1"),
            ExchangeAccountId::new("acct-1"),
            "BNB/USDT".into(),
            "{}".into(),
            Utc::now(),
        );
        bot.status = BotStatus::Stopping;
        bot.last_error = last_error.map(String::from);
        bot
    }

    fn adapter(open: Vec<ExchangeOrderFull>, create: Vec<Result<CreateOrderResult, ExchangeError>>) -> ScriptedAdapter {
        ScriptedAdapter {
            exchange: Exchange::Binance,
            open_orders: Mutex::new(open),
            open_calls: AtomicUsize::new(0),
            open_should_fail: false,
            create_script: Mutex::new(create),
            canceled: Mutex::new(vec![]),
        }
    }

    #[tokio::test]
    async fn not_stopping_bot_is_a_no_op() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let mut bot = stopping_bot(None);
        bot.status = BotStatus::Running;
        let bot = store.create_bot(bot).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store, clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let a = adapter(vec![], vec![]);
        assert_eq!(executor.tick(&a, &bot, Exact::ZERO).await.unwrap(), StoppingOutcome::NotApplicable);
    }

    #[tokio::test]
    async fn zero_open_orders_no_force_close_stops_immediately() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(stopping_bot(Some("USER_STOP"))).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let a = adapter(vec![], vec![]);
        let outcome = executor.tick(&a, &bot, Exact::ZERO).await.unwrap();
        assert_eq!(outcome, StoppingOutcome::Stopped);
        let reloaded = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Stopped);
        assert!(reloaded.run_id.is_none());
    }

    #[tokio::test]
    async fn cancels_open_orders_before_stopping() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(stopping_bot(Some("USER_STOP"))).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let open_order = ExchangeOrderFull {
            client_order_id: "gb1-bot1-1".into(),
            exchange_order_id: "e1".into(),
            symbol: "BNB/USDT".into(),
            side: Side::Buy,
            kind: OrderType::Limit,
            status: OrderStatus::New,
            price: Some(Exact::from_decimal(dec!(500))),
            amount: Exact::from_decimal(dec!(1)),
            filled_amount: Exact::ZERO,
            avg_fill_price: None,
            time_exchange: Utc::now(),
        };
        let a = adapter(vec![open_order], vec![]);
        let outcome = executor.tick(&a, &bot, Exact::ZERO).await.unwrap();
        assert_eq!(outcome, StoppingOutcome::Stopped);
        assert_eq!(a.canceled.lock().as_slice(), &["e1".to_string()]);
    }

    #[tokio::test]
    async fn force_close_sells_residual_base_then_stops_once_filled() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store
            .create_bot(stopping_bot(Some("STOP_LOSS: last=500 < floorPrice=550")))
            .await
            .unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let a = adapter(
            vec![],
            vec![Ok(CreateOrderResult {
                exchange_order_id: "close-1".into(),
                client_order_id: "gb1c-bot1-1".into(),
                status: OrderStatus::Filled,
            })],
        );
        let outcome = executor.tick(&a, &bot, Exact::from_decimal(dec!(1))).await.unwrap();
        assert_eq!(outcome, StoppingOutcome::Stopped);

        let orders = store.list_orders_for_bot(&bot.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].client_order_id.starts_with("gb1c-"));
        assert_eq!(orders[0].status, OrderStatus::Filled);
        assert_eq!(orders[0].side, Side::Sell);

        let reloaded = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Stopped);
    }

    #[tokio::test]
    async fn force_close_not_yet_filled_waits_for_next_tick() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store
            .create_bot(stopping_bot(Some("TAKE_PROFIT: last=900 >= target=850")))
            .await
            .unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let a = adapter(
            vec![],
            vec![Ok(CreateOrderResult {
                exchange_order_id: "close-1".into(),
                client_order_id: "gb1c-bot1-1".into(),
                status: OrderStatus::New,
            })],
        );
        let outcome = executor.tick(&a, &bot, Exact::from_decimal(dec!(1))).await.unwrap();
        assert_eq!(outcome, StoppingOutcome::WaitingForCloseOrder);
        let reloaded = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Stopping);
    }

    #[tokio::test]
    async fn zero_free_base_skips_force_close_and_stops() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store
            .create_bot(stopping_bot(Some("STOP_LOSS: last=500 < floorPrice=550")))
            .await
            .unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let executor = StoppingExecutor::with_jitter(store.clone(), clock, RetryPolicy::new(5, 100, 1_000), Arc::new(LoggingAlertSink), || 0.0);
        let a = adapter(vec![], vec![]);
        let outcome = executor.tick(&a, &bot, Exact::ZERO).await.unwrap();
        assert_eq!(outcome, StoppingOutcome::Stopped);
        assert!(store.list_orders_for_bot(&bot.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_escalate_to_error_with_critical_alert() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let bot = store.create_bot(stopping_bot(Some("USER_STOP"))).await.unwrap();
        let clock = FixedClock::new(Utc::now());
        let shared_clock: SharedClock = Arc::new(clock.clone());
        let executor = StoppingExecutor::with_jitter(
            store.clone(),
            shared_clock,
            RetryPolicy::new(2, 100, 1_000),
            Arc::new(LoggingAlertSink),
            || 0.0,
        );
        let a = ScriptedAdapter {
            exchange: Exchange::Binance,
            open_orders: Mutex::new(vec![]),
            open_calls: AtomicUsize::new(0),
            open_should_fail: true,
            create_script: Mutex::new(vec![]),
            canceled: Mutex::new(vec![]),
        };

        let first = executor.tick(&a, &bot, Exact::ZERO).await.unwrap();
        assert_eq!(first, StoppingOutcome::Retrying { attempts: 1 });

        clock.advance(chrono::Duration::milliseconds(500));
        let reloaded = store.get_bot(&bot.id).await.unwrap();
        let second = executor.tick(&a, &reloaded, Exact::ZERO).await.unwrap();
        assert_eq!(second, StoppingOutcome::Escalated { code: "STOPPING_FAILED" });

        let final_bot = store.get_bot(&bot.id).await.unwrap();
        assert_eq!(final_bot.status, BotStatus::Error);
        assert!(final_bot.last_error.unwrap().starts_with("STOPPING_FAILED:"));
    }
}
