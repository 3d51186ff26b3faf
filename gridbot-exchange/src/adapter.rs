//! The uniform `ExchangeAdapter` facade (spec.md §4.3). One capability set,
//! dispatched by [`Exchange`] tag at construction time — "no inheritance
//! required" (spec.md §9).

use crate::types::{Balances, CreateOrderRequest, CreateOrderResult, ExchangeOrderFull, ExchangeOrderRef, ExchangeTrade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use gridbot_model::entities::{is_owned_client_order_id, Exchange};
use gridbot_model::error::ExchangeError;

#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    async fn fetch_open_orders_full(
        &self,
        symbol: &str,
    ) -> Result<Vec<ExchangeOrderFull>, ExchangeError>;

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeTrade>, ExchangeError>;

    /// Raw submission attempt. On a duplicate-client-order-id condition,
    /// implementations should return `Err(ExchangeError::DuplicateOrder(..))`
    /// so [`Self::create_order`]'s default recovery path can take over —
    /// do not attempt recovery here.
    async fn try_create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResult, ExchangeError>;

    /// Idempotent: "order not found / already closed" is success.
    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<(), ExchangeError>;

    /// Omits zero-balance assets (spec.md §4.3).
    async fn fetch_balance(&self) -> Result<Balances, ExchangeError>;

    /// Last traded price for `symbol` — the market-data input the Trigger/
    /// Order Engine and the Risk Evaluator both treat as an opaque tick
    /// (spec.md §4.6, §4.5). A real market-data feed is an external
    /// collaborator (spec.md §1); this is the single point an adapter
    /// speaks to it.
    async fn fetch_last_price(&self, symbol: &str) -> Result<Exact, ExchangeError>;

    /// `fetchOpenOrders` (spec.md §4.3): the minimal projection of
    /// `fetchOpenOrdersFull`, filtered to orders owned by this system.
    /// Foreign orders (no `"gb1"` prefix) are never returned upward
    /// (spec.md §3 I5).
    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<ExchangeOrderRef>, ExchangeError> {
        Ok(self
            .fetch_open_orders_full(symbol)
            .await?
            .into_iter()
            .filter(|o| is_owned_client_order_id(&o.client_order_id))
            .map(|o| ExchangeOrderRef {
                client_order_id: o.client_order_id,
                exchange_order_id: o.exchange_order_id,
                status: o.status,
            })
            .collect())
    }

    /// Submits an order, recovering from `DUPLICATE_CLIENT_ORDER_ID`
    /// (spec.md §4.3): look the order up by `clientOrderId` among open
    /// orders and return that instead of erroring. If lookup fails,
    /// surface a distinct `DuplicateOrder` so the caller treats submission
    /// as pending-reconcile rather than retrying blindly.
    async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResult, ExchangeError> {
        match self.try_create_order(request.clone()).await {
            Ok(result) => Ok(result),
            Err(ExchangeError::DuplicateOrder(_)) => {
                let open = self.fetch_open_orders_full(&request.symbol).await?;
                match open.into_iter().find(|o| o.client_order_id == request.client_order_id) {
                    Some(existing) => Ok(CreateOrderResult {
                        exchange_order_id: existing.exchange_order_id,
                        client_order_id: existing.client_order_id,
                        status: existing.status,
                    }),
                    None => Err(ExchangeError::DuplicateOrder(format!(
                        "clientOrderId {} reported duplicate but not found in open orders",
                        request.client_order_id
                    ))),
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Testnet discipline (spec.md §4.3): mainnet usage requires an explicit
/// `allow_mainnet` flag *and* the environment must opt in; attempting to
/// enable real trading without a real market-data source is refused here,
/// at construction, rather than later mid-trade.
#[derive(Debug, Clone)]
pub struct AdapterConstructionGuard {
    pub is_testnet: bool,
    pub allow_mainnet_flag: bool,
    pub env_allows_mainnet: bool,
    pub has_real_market_data: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AdapterConstructionError {
    #[error("mainnet trading requires ALLOW_MAINNET_TRADING and allowMainnet=true")]
    MainnetNotAllowed,
    #[error("real trading requires a real market-data source")]
    NoRealMarketData,
}

impl AdapterConstructionGuard {
    pub fn validate(&self) -> Result<(), AdapterConstructionError> {
        if !self.is_testnet {
            if !(self.allow_mainnet_flag && self.env_allows_mainnet) {
                return Err(AdapterConstructionError::MainnetNotAllowed);
            }
            if !self.has_real_market_data {
                return Err(AdapterConstructionError::NoRealMarketData);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_requires_both_flag_and_env() {
        let guard = AdapterConstructionGuard {
            is_testnet: false,
            allow_mainnet_flag: true,
            env_allows_mainnet: false,
            has_real_market_data: true,
        };
        assert_eq!(guard.validate(), Err(AdapterConstructionError::MainnetNotAllowed));
    }

    #[test]
    fn mainnet_without_real_market_data_refused() {
        let guard = AdapterConstructionGuard {
            is_testnet: false,
            allow_mainnet_flag: true,
            env_allows_mainnet: true,
            has_real_market_data: false,
        };
        assert_eq!(guard.validate(), Err(AdapterConstructionError::NoRealMarketData));
    }

    #[test]
    fn testnet_never_gated() {
        let guard = AdapterConstructionGuard {
            is_testnet: true,
            allow_mainnet_flag: false,
            env_allows_mainnet: false,
            has_real_market_data: false,
        };
        assert!(guard.validate().is_ok());
    }
}
