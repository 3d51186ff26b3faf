//! A deterministic in-memory exchange, standing in for a real venue in
//! tests and as the reference binary's default provider. Grounded in
//! `barter-execution/src/exchange/mock/account.rs`'s mock-account shape:
//! an in-memory order/trade/balance ledger guarded by a single lock.

use crate::adapter::ExchangeAdapter;
use crate::types::{Balances, CreateOrderRequest, CreateOrderResult, ExchangeOrderFull, ExchangeTrade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use gridbot_model::entities::{Exchange, OrderStatus, OrderType, Side};
use gridbot_model::error::ExchangeError;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct SimOrder {
    client_order_id: String,
    exchange_order_id: String,
    symbol: String,
    side: Side,
    kind: OrderType,
    price: Option<Exact>,
    amount: Exact,
    filled_amount: Exact,
    avg_fill_price: Option<Exact>,
    status: OrderStatus,
    time_exchange: DateTime<Utc>,
}

#[derive(Default)]
struct SimState {
    orders: HashMap<String, SimOrder>,
    trades: Vec<ExchangeTrade>,
    balances: HashMap<String, Exact>,
    last_price: HashMap<String, Exact>,
    next_exchange_order_id: u64,
    next_trade_id: u64,
}

pub struct SimulatedExchange {
    exchange: Exchange,
    state: Mutex<SimState>,
}

impl SimulatedExchange {
    pub fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn set_last_price(&self, symbol: &str, price: Exact) {
        self.state.lock().last_price.insert(symbol.to_string(), price);
    }

    pub fn set_balance(&self, asset: &str, free: Exact) {
        self.state.lock().balances.insert(asset.to_string(), free);
    }

    pub fn balance_of(&self, asset: &str) -> Exact {
        self.state
            .lock()
            .balances
            .get(asset)
            .copied()
            .unwrap_or(Exact::ZERO)
    }

    fn split_symbol(symbol: &str) -> Option<(String, String)> {
        let mut parts = symbol.split('/');
        let base = parts.next()?.to_string();
        let quote = parts.next()?.to_string();
        Some((base, quote))
    }

    /// Whether a limit order at `order_price` would cross `last_price`
    /// and fill immediately. Market orders always cross.
    fn crosses(side: Side, order_price: Option<Exact>, last_price: Exact) -> bool {
        match order_price {
            None => true,
            Some(price) => match side {
                Side::Buy => price.inner() >= last_price.inner(),
                Side::Sell => price.inner() <= last_price.inner(),
            },
        }
    }
}

#[async_trait]
impl ExchangeAdapter for SimulatedExchange {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn fetch_open_orders_full(
        &self,
        symbol: &str,
    ) -> Result<Vec<ExchangeOrderFull>, ExchangeError> {
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .map(|o| ExchangeOrderFull {
                client_order_id: o.client_order_id.clone(),
                exchange_order_id: o.exchange_order_id.clone(),
                symbol: o.symbol.clone(),
                side: o.side,
                kind: o.kind,
                status: o.status,
                price: o.price,
                amount: o.amount,
                filled_amount: o.filled_amount,
                avg_fill_price: o.avg_fill_price,
                time_exchange: o.time_exchange,
            })
            .collect())
    }

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeTrade>, ExchangeError> {
        let state = self.state.lock();
        Ok(state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol)
            .filter(|t| since.map(|s| t.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn try_create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResult, ExchangeError> {
        if request.kind == OrderType::Limit && request.price.is_none() {
            return Err(ExchangeError::BadRequest("limit order requires price".into()));
        }
        if request.kind == OrderType::Market && request.price.is_some() {
            return Err(ExchangeError::BadRequest("market order must not supply price".into()));
        }

        let mut state = self.state.lock();
        if state.orders.contains_key(&request.client_order_id) {
            return Err(ExchangeError::DuplicateOrder(format!(
                "clientOrderId {} already exists",
                request.client_order_id
            )));
        }

        state.next_exchange_order_id += 1;
        let exchange_order_id = format!("sim-{}", state.next_exchange_order_id);
        let last_price = state
            .last_price
            .get(&request.symbol)
            .copied()
            .unwrap_or(request.price.unwrap_or(Exact::ZERO));

        let fills = if Self::crosses(request.side, request.price, last_price) {
            request.amount
        } else {
            Exact::ZERO
        };
        let fill_price = request.price.unwrap_or(last_price);
        let status = if fills >= request.amount && !request.amount.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::New
        };

        let order = SimOrder {
            client_order_id: request.client_order_id.clone(),
            exchange_order_id: exchange_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            price: request.price,
            amount: request.amount,
            filled_amount: fills,
            avg_fill_price: if fills.is_zero() { None } else { Some(fill_price) },
            status,
            time_exchange: Utc::now(),
        };

        if fills.is_sign_positive() {
            state.next_trade_id += 1;
            let trade_id = format!("sim-trade-{}", state.next_trade_id);
            if let Some((base, quote)) = Self::split_symbol(&request.symbol) {
                let (base_delta, quote_delta) = match request.side {
                    Side::Buy => (fills, Exact::ZERO - fill_price * fills),
                    Side::Sell => (Exact::ZERO - fills, fill_price * fills),
                };
                let base_balance = state.balances.entry(base).or_insert(Exact::ZERO);
                *base_balance = *base_balance + base_delta;
                let quote_balance = state.balances.entry(quote).or_insert(Exact::ZERO);
                *quote_balance = *quote_balance + quote_delta;
            }
            state.trades.push(ExchangeTrade {
                trade_id,
                client_order_id: Some(request.client_order_id.clone()),
                exchange_order_id: Some(exchange_order_id.clone()),
                symbol: request.symbol.clone(),
                side: request.side,
                price: fill_price,
                amount: fills,
                fee: Exact::ZERO,
                fee_currency: Self::split_symbol(&request.symbol)
                    .map(|(_, quote)| quote)
                    .unwrap_or_default(),
                timestamp: Utc::now(),
            });
        }

        let result = CreateOrderResult {
            exchange_order_id,
            client_order_id: order.client_order_id.clone(),
            status: order.status,
        };
        state.orders.insert(request.client_order_id, order);
        Ok(result)
    }

    async fn cancel_order(&self, exchange_order_id: &str, _symbol: &str) -> Result<(), ExchangeError> {
        let mut state = self.state.lock();
        if let Some(order) = state
            .orders
            .values_mut()
            .find(|o| o.exchange_order_id == exchange_order_id)
        {
            order.status = OrderStatus::Canceled;
        }
        // Not found / already closed is idempotent success (spec.md §4.3).
        Ok(())
    }

    async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let state = self.state.lock();
        Ok(state
            .balances
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(asset, free)| {
                (
                    asset.clone(),
                    crate::types::BalanceEntry {
                        free: *free,
                        locked: Exact::ZERO,
                        total: *free,
                    },
                )
            })
            .collect())
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<Exact, ExchangeError> {
        self.state
            .lock()
            .last_price
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::BadRequest(format!("no last price set for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn exact(v: rust_decimal::Decimal) -> Exact {
        Exact::from_decimal(v)
    }

    #[tokio::test]
    async fn duplicate_client_order_id_recovers_via_default_create_order() {
        let exch = SimulatedExchange::new(Exchange::Binance);
        exch.set_last_price("BNB/USDT", exact(dec!(600)));

        let request = CreateOrderRequest {
            symbol: "BNB/USDT".into(),
            side: Side::Sell,
            kind: OrderType::Limit,
            price: Some(exact(dec!(700))),
            amount: exact(dec!(1)),
            client_order_id: "gb1-test-1".into(),
        };

        let first = exch.create_order(request.clone()).await.unwrap();
        let second = exch.create_order(request).await.unwrap();
        assert_eq!(first.exchange_order_id, second.exchange_order_id);
    }

    #[tokio::test]
    async fn limit_order_crossing_last_price_fills_immediately() {
        let exch = SimulatedExchange::new(Exchange::Binance);
        exch.set_last_price("BNB/USDT", exact(dec!(600)));
        let result = exch
            .create_order(CreateOrderRequest {
                symbol: "BNB/USDT".into(),
                side: Side::Buy,
                kind: OrderType::Limit,
                price: Some(exact(dec!(650))),
                amount: exact(dec!(1)),
                client_order_id: "gb1-test-2".into(),
            })
            .await
            .unwrap();
        assert_eq!(result.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_idempotent_success() {
        let exch = SimulatedExchange::new(Exchange::Binance);
        assert!(exch.cancel_order("does-not-exist", "BNB/USDT").await.is_ok());
    }

    #[tokio::test]
    async fn fetch_balance_omits_zero_entries() {
        let exch = SimulatedExchange::new(Exchange::Binance);
        exch.set_balance("BNB", Exact::ZERO);
        exch.set_balance("USDT", exact(dec!(100)));
        let balances = exch.fetch_balance().await.unwrap();
        assert!(!balances.contains_key("BNB"));
        assert_eq!(balances["USDT"].free, exact(dec!(100)));
    }
}
