//! Reconciles local order/trade state with exchange truth (spec.md §4.4).
//! One pipeline step per bot per tick, grounded on the monotonic
//! state-machine discipline in `barter-execution/src/order/state.rs`: the
//! Reconciler only ever merges exchange truth forward, never regresses a
//! terminal status, and leaves a bot untouched on any I/O failure.

mod state_hash;

use chrono::Utc;
use gridbot_decimal::{weighted_average_price, Exact};
use gridbot_exchange::adapter::ExchangeAdapter;
use gridbot_exchange::types::{ExchangeOrderFull, ExchangeTrade};
use gridbot_model::entities::{
    is_owned_client_order_id, Bot, BotSnapshot, Exchange, Order, OrderStatus, Trade,
};
use gridbot_model::ids::{BotId, OrderId, RunId, TradeId};
use gridbot_store::{Store, StoreError};
use std::collections::{HashMap, HashSet};

pub use state_hash::compute_state_hash;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A bot in a reconcilable status with no `runId` is a structural bug
    /// upstream (spec.md §3: `runId` is minted leaving DRAFT) — surfaced
    /// distinctly rather than silently fabricating one.
    #[error("bot {0} is reconcilable but has no runId")]
    MissingRunId(BotId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orders_upserted: usize,
    pub trades_recorded: usize,
    pub snapshot_written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NotApplicable,
    ExchangeUnavailable(String),
    Reconciled(ReconcileReport),
}

/// Runs the full step 1–7 algorithm for one bot. Only acts when
/// `bot.status.reconcilable()` (spec.md §4.4) — PAUSED and DRAFT bots are
/// left untouched.
pub async fn reconcile(
    store: &dyn Store,
    adapter: &dyn ExchangeAdapter,
    bot: &Bot,
) -> Result<ReconcileOutcome, ReconcileError> {
    if !bot.status.reconcilable() {
        return Ok(ReconcileOutcome::NotApplicable);
    }
    let run_id = bot
        .run_id
        .clone()
        .ok_or_else(|| ReconcileError::MissingRunId(bot.id.clone()))?;

    // Steps 1-2: fetch exchange truth. Either failing means no writes at all.
    let open = match adapter.fetch_open_orders_full(&bot.symbol).await {
        Ok(open) => open,
        Err(e) => {
            tracing::warn!(bot_id = %bot.id, error = %e, "reconcile: fetchOpenOrdersFull failed, skipping tick");
            return Ok(ReconcileOutcome::ExchangeUnavailable(e.to_string()));
        }
    };
    let trades = match adapter.fetch_my_trades(&bot.symbol, None).await {
        Ok(trades) => trades,
        Err(e) => {
            tracing::warn!(bot_id = %bot.id, error = %e, "reconcile: fetchMyTrades failed, skipping tick");
            return Ok(ReconcileOutcome::ExchangeUnavailable(e.to_string()));
        }
    };

    let exchange = adapter.exchange();
    let owned_open: Vec<&ExchangeOrderFull> = open
        .iter()
        .filter(|o| is_owned_client_order_id(&o.client_order_id))
        .collect();

    // Step 3: upsert owned open orders, monotonic status.
    let mut orders_upserted = 0usize;
    for o in &owned_open {
        store.upsert_order(build_order_from_exchange(bot, exchange, o)).await?;
        orders_upserted += 1;
    }

    // Step 4: owner-map exchangeOrderId -> clientOrderId, from what is
    // *locally persisted* for this bot (not from `open`, which may include
    // orders the exchange considers open but we haven't upserted above —
    // those were filtered out in step 3 as unowned and must not attribute
    // trades either).
    let local_orders = store.list_orders_for_bot(&bot.id).await?;
    let owner_map: HashMap<&str, &str> = local_orders
        .iter()
        .filter_map(|o| {
            o.exchange_order_id
                .as_deref()
                .map(|eid| (eid, o.client_order_id.as_str()))
        })
        .collect();

    // Step 4/5: attribute and idempotently insert trades.
    let mut trades_recorded = 0usize;
    for t in &trades {
        let Some(attributed) = attribute_trade(t, &owner_map) else {
            continue;
        };
        let trade = build_trade(bot, exchange, t, &attributed);
        if store.insert_trade(trade).await? {
            trades_recorded += 1;
        }
    }

    // Step 6: recompute filledAmount/avgFillPrice per (clientOrderId,
    // trade-group), honouring the "must drop out of open first" tie-break.
    // Every order with any recorded trade is reconsidered, not just ones
    // touched this tick: an order can drop out of `open` on a tick where no
    // new trade arrives, and its status must still catch up.
    let open_owned_ids: HashSet<&str> = owned_open.iter().map(|o| o.client_order_id.as_str()).collect();
    let all_local_trades = store.list_trades_for_bot(&bot.id).await?;
    let groups: HashSet<String> = all_local_trades
        .iter()
        .filter_map(|t| t.client_order_id.clone())
        .collect();
    for client_order_id in &groups {
        let Some(order) = store
            .get_order_by_client_order_id(exchange, client_order_id)
            .await?
        else {
            continue;
        };
        let fills: Vec<(Exact, Exact)> = all_local_trades
            .iter()
            .filter(|t| t.client_order_id.as_deref() == Some(client_order_id.as_str()))
            .map(|t| (t.amount, t.price))
            .collect();
        if fills.is_empty() {
            continue;
        }
        let filled_amount: Exact = fills.iter().map(|(amount, _)| *amount).sum();
        let avg_fill_price = weighted_average_price(&fills).ok();

        let still_open = open_owned_ids.contains(client_order_id.as_str());
        let next_status = if !still_open && filled_amount >= order.amount {
            OrderStatus::Filled
        } else if order.status == OrderStatus::New && filled_amount.is_sign_positive() {
            OrderStatus::PartiallyFilled
        } else {
            order.status
        };

        let mut updated = order.clone();
        updated.status = next_status;
        updated.filled_amount = filled_amount;
        updated.avg_fill_price = avg_fill_price;
        store.upsert_order(updated).await?;
    }

    // Step 7: stateHash over sorted open-order-ids + sorted trade-ids,
    // skipping snapshot insertion when stable.
    let trade_ids: Vec<String> = all_local_trades.iter().map(|t| t.trade_id.clone()).collect();
    let open_ids: Vec<String> = open_owned_ids.iter().map(|s| s.to_string()).collect();
    let state_hash = compute_state_hash(
        open_ids.iter().map(String::as_str),
        trade_ids.iter().map(String::as_str),
    );

    let previous = store.get_latest_snapshot(&bot.id).await?;
    let snapshot_written = previous.as_ref().map(|s| &s.state_hash) != Some(&state_hash);
    if snapshot_written {
        let state_json = serde_json::json!({
            "openOrderIds": open_ids,
            "tradeIds": trade_ids,
        })
        .to_string();
        store
            .insert_snapshot(BotSnapshot {
                bot_id: bot.id.clone(),
                run_id,
                reconciled_at: Utc::now(),
                state_json,
                state_hash,
            })
            .await?;
    }

    tracing::debug!(
        bot_id = %bot.id,
        orders_upserted,
        trades_recorded,
        snapshot_written,
        "reconcile: tick complete",
    );
    Ok(ReconcileOutcome::Reconciled(ReconcileReport {
        orders_upserted,
        trades_recorded,
        snapshot_written,
    }))
}

/// Ownership attribution (spec.md §4.4 step 4): an owner-map hit is
/// authoritative; otherwise fall back to the trade's own `clientOrderId`
/// if it is itself `"gb1"`-prefixed; otherwise the trade is unattributable.
fn attribute_trade(t: &ExchangeTrade, owner_map: &HashMap<&str, &str>) -> Option<String> {
    if let Some(eid) = t.exchange_order_id.as_deref() {
        if let Some(cid) = owner_map.get(eid) {
            return Some(cid.to_string());
        }
    }
    t.client_order_id
        .as_deref()
        .filter(|cid| is_owned_client_order_id(cid))
        .map(str::to_string)
}

/// `exchangeOrderId`/`clientOrderId`-keyed orders are upserted against
/// whatever local record already exists for this `(exchange,
/// clientOrderId)` — [`gridbot_store::InMemoryStore::upsert_order`]
/// preserves the existing `intentSeq`/`id`/`createdAt` and only lets
/// status/fill fields move forward, so the placeholders here are only
/// ever observed the first time an owned order is discovered.
fn build_order_from_exchange(bot: &Bot, exchange: Exchange, o: &ExchangeOrderFull) -> Order {
    Order {
        id: OrderId::random(),
        bot_id: bot.id.clone(),
        exchange,
        symbol: o.symbol.clone(),
        client_order_id: o.client_order_id.clone(),
        exchange_order_id: Some(o.exchange_order_id.clone()),
        intent_seq: 0,
        side: o.side,
        kind: o.kind,
        status: o.status,
        price: o.price,
        amount: o.amount,
        filled_amount: o.filled_amount,
        avg_fill_price: o.avg_fill_price,
        submitted_at: Some(o.time_exchange),
        created_at: o.time_exchange,
    }
}

fn build_trade(bot: &Bot, exchange: Exchange, t: &ExchangeTrade, attributed_client_order_id: &str) -> Trade {
    Trade {
        id: TradeId::random(),
        bot_id: bot.id.clone(),
        trade_id: t.trade_id.clone(),
        client_order_id: Some(attributed_client_order_id.to_string()),
        exchange,
        symbol: t.symbol.clone(),
        side: t.side,
        price: t.price,
        amount: t.amount,
        fee: t.fee,
        fee_currency: t.fee_currency.clone(),
        timestamp: t.timestamp,
    }
}
