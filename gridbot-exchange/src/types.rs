//! Wire-ish types returned by the [`crate::adapter::ExchangeAdapter`]
//! (spec.md §4.3). These are intentionally distinct from
//! `gridbot_model::entities::Order`/`Trade`: the Reconciler is the only
//! place that translates exchange truth into stored entities.

use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use gridbot_model::entities::{OrderStatus, OrderType, Side};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A minimal open-order reference, as returned by `fetchOpenOrders`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOrderRef {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub status: OrderStatus,
}

/// The full view of an open order, as returned by `fetchOpenOrdersFull`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOrderFull {
    pub client_order_id: String,
    pub exchange_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderType,
    pub status: OrderStatus,
    pub price: Option<Exact>,
    pub amount: Exact,
    pub filled_amount: Exact,
    pub avg_fill_price: Option<Exact>,
    pub time_exchange: DateTime<Utc>,
}

/// A trade/fill row from `fetchMyTrades`. `client_order_id` may be absent
/// (spec.md §4.3: "some exchanges omit clientOrderId on trade rows"), in
/// which case ownership is attributed via `exchange_order_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeTrade {
    pub trade_id: String,
    pub client_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub price: Exact,
    pub amount: Exact,
    pub fee: Exact,
    pub fee_currency: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderType,
    /// Required for `Limit`, must be `None` for `Market` (spec.md §4.3).
    pub price: Option<Exact>,
    pub amount: Exact,
    pub client_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResult {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub free: Exact,
    pub locked: Exact,
    pub total: Exact,
}

pub type Balances = HashMap<String, BalanceEntry>;
