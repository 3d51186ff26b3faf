//! One tick of the Worker Scheduler (spec.md §4.1, §2): for every bot in an
//! active status, run Reconcile → Risk Evaluator → Trigger/Order in that
//! fixed order, then independently run the Stopping Executor over every
//! STOPPING bot. Mirrors the `tokio::select!`-driven loop body in
//! `examples/hot3246624-pm_as_ofi/src/bin/polymarket_mm.rs`, generalised
//! from one always-on market-making loop to one pass per bot per tick.

use crate::config::WorkerConfig;
use gridbot_decimal::Exact;
use gridbot_engine::{balance_view_from, free_base_balance, AdapterProvider, StoppingExecutor, TriggerOrderEngine, TriggerTickInputs};
use gridbot_model::config::RawBotConfig;
use gridbot_model::entities::{Bot, BotStatus};
use gridbot_observability::{AlertSink, PipelineMetrics};
use gridbot_preview::{MarketInfo, Ticker};
use gridbot_risk::autoclose::{self, AutoCloseConfig};
use gridbot_store::Store;
use std::sync::Arc;

pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub clock: gridbot_model::clock::SharedClock,
    pub provider: Arc<AdapterProvider>,
    pub trigger_engine: TriggerOrderEngine,
    pub stopping_executor: StoppingExecutor,
    pub metrics: Arc<PipelineMetrics>,
    pub config: WorkerConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        clock: gridbot_model::clock::SharedClock,
        provider: Arc<AdapterProvider>,
        alert_sink: Arc<dyn AlertSink>,
        metrics: Arc<PipelineMetrics>,
        config: WorkerConfig,
    ) -> Self {
        let trigger_engine =
            TriggerOrderEngine::new(store.clone(), clock.clone(), config.order_retry_policy);
        let stopping_executor =
            StoppingExecutor::new(store.clone(), clock.clone(), config.stop_retry_policy, alert_sink);
        Self { store, clock, provider, trigger_engine, stopping_executor, metrics, config }
    }

    pub async fn tick(&self) {
        let started_at = std::time::Instant::now();
        let active = match self
            .store
            .list_bots_by_status(&[BotStatus::Running, BotStatus::WaitingTrigger], self.config.batch_size)
            .await
        {
            Ok(bots) => bots,
            Err(e) => {
                tracing::warn!(error = %e, "worker: failed to list active bots this tick");
                Vec::new()
            }
        };
        for bot in active {
            self.run_active_bot(&bot).await;
        }

        let stopping = match self
            .store
            .list_bots_by_status(&[BotStatus::Stopping], self.config.batch_size)
            .await
        {
            Ok(bots) => bots,
            Err(e) => {
                tracing::warn!(error = %e, "worker: failed to list stopping bots this tick");
                Vec::new()
            }
        };
        for bot in stopping {
            self.run_stopping_bot(&bot).await;
        }

        self.metrics.tick_latency_ms.observe(started_at.elapsed().as_secs_f64() * 1_000.0);
    }

    async fn run_active_bot(&self, bot: &Bot) {
        let account = match self.store.get_exchange_account(&bot.exchange_account_id).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: missing exchange account, skipping tick");
                return;
            }
        };
        let adapter = match self.provider.get_or_build(&account) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: adapter construction failed, skipping tick");
                return;
            }
        };

        self.metrics.reconcile_ticks.incr();
        match gridbot_reconcile::reconcile(&*self.store, &*adapter, bot).await {
            Ok(gridbot_reconcile::ReconcileOutcome::ExchangeUnavailable(_)) => {
                self.metrics.reconcile_failures.incr();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.metrics.reconcile_failures.incr();
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: reconcile failed, skipping tick");
                return;
            }
        }

        let bot = match self.store.get_bot(&bot.id).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: bot vanished after reconcile");
                return;
            }
        };

        match gridbot_risk::enforce_kill_switch_for_bot(&*self.store, &bot).await {
            Ok(true) => {
                self.metrics.kill_switch_sweeps.incr();
                return;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: kill-switch check failed");
                return;
            }
        }

        let config = match RawBotConfig::parse(&bot.config_json) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: unparseable configJson, skipping tick");
                return;
            }
        };

        let last_price = match adapter.fetch_last_price(&bot.symbol).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: fetchLastPrice failed, skipping tick");
                return;
            }
        };

        let auto_close_config = AutoCloseConfig {
            enable_auto_close: config.risk.enable_auto_close,
            auto_close_drawdown_percent: config.risk.auto_close_drawdown_percent,
        };
        match autoclose::evaluate_and_persist(&*self.store, &self.clock, &bot.id, &auto_close_config, last_price).await {
            Ok((autoclose::AutoCloseOutcome::Triggered, _)) => {
                self.metrics.autoclose_triggers.incr();
                return;
            }
            Ok((autoclose::AutoCloseOutcome::PreviouslyTriggered, _)) => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: autoclose evaluation failed");
                return;
            }
        }

        if !self.config.enable_trading {
            return;
        }

        let balances = match adapter.fetch_balance().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: fetchBalance failed, skipping tick");
                return;
            }
        };
        let balance = balance_view_from(&balances, &bot.symbol);
        let ticker = Ticker { last: last_price };
        // No exchange-info feed is wired (spec.md §1 scopes it out as an
        // external collaborator); the tick loop has no per-request body to
        // carry lot-size floors in, unlike the HTTP `/start` route, so it
        // runs with no floor rather than inventing a static per-symbol table.
        let market = MarketInfo { min_amount: Exact::ZERO, min_notional: Exact::ZERO };
        let inputs = TriggerTickInputs { market: &market, ticker: &ticker, balance: &balance };

        match self.trigger_engine.tick(&*adapter, &bot, &inputs).await {
            Ok(gridbot_engine::TriggerOutcome::Submitted { .. }) => self.metrics.orders_submitted.incr(),
            Ok(gridbot_engine::TriggerOutcome::Retrying { .. }) => self.metrics.orders_retried.incr(),
            Ok(gridbot_engine::TriggerOutcome::ErroredOut { .. }) => self.metrics.bots_errored.incr(),
            Ok(gridbot_engine::TriggerOutcome::NoOp(_)) => {}
            Err(e) => tracing::warn!(bot_id = %bot.id, error = %e, "worker: trigger/order tick failed"),
        }
    }

    async fn run_stopping_bot(&self, bot: &Bot) {
        if !self.config.enable_stopping {
            return;
        }
        let account = match self.store.get_exchange_account(&bot.exchange_account_id).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: missing exchange account, skipping stop tick");
                return;
            }
        };
        let adapter = match self.provider.get_or_build(&account) {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: adapter construction failed, skipping stop tick");
                return;
            }
        };
        let balances = match adapter.fetch_balance().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(bot_id = %bot.id, error = %e, "worker: fetchBalance failed, skipping stop tick");
                return;
            }
        };
        let free_base = free_base_balance(&balances, &bot.symbol);

        match self.stopping_executor.tick(&*adapter, bot, free_base).await {
            Ok(gridbot_engine::StoppingOutcome::Stopped) => self.metrics.stopping_completed.incr(),
            Ok(gridbot_engine::StoppingOutcome::Escalated { .. }) => self.metrics.stopping_escalated.incr(),
            Ok(_) => {}
            Err(e) => tracing::warn!(bot_id = %bot.id, error = %e, "worker: stopping tick failed"),
        }
    }
}
