//! A generic signed-REST adapter. Real per-exchange field mapping
//! (`origClientOrderId` vs `clOrdId`, Kraken's `userref`, ...) is
//! deliberately thin here — the exchange client library itself is an
//! external collaborator (spec.md §1); this crate owns the uniform
//! contract, not seven bespoke wire formats.

use crate::adapter::ExchangeAdapter;
use crate::signer::sign_hex;
use crate::types::{Balances, CreateOrderRequest, CreateOrderResult, ExchangeOrderFull, ExchangeTrade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use gridbot_model::entities::{Exchange, OrderStatus};
use gridbot_model::error::ExchangeError;
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shape of the public ticker endpoint shared across the seven venues —
/// unsigned, unlike every other call this adapter makes.
#[derive(Debug, Deserialize)]
struct TickerPriceResponse {
    price: Exact,
}

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub exchange: Exchange,
    pub base_url: String,
    pub is_testnet: bool,
}

#[derive(Clone)]
pub struct RestCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// A signed-REST adapter shared across the seven venues. `config` picks
/// the host, `credentials` the per-account keys decrypted by
/// `gridbot-crypto` — dispatch between exchanges happens purely by
/// tagging requests with `config.exchange`, never by trait specialisation.
pub struct RestExchangeAdapter {
    http: reqwest::Client,
    config: RestConfig,
    credentials: RestCredentials,
}

impl RestExchangeAdapter {
    pub fn new(http: reqwest::Client, config: RestConfig, credentials: RestCredentials) -> Self {
        Self { http, config, credentials }
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }

    /// Builds the canonical `key1=val1&key2=val2` query string and signs it,
    /// mirroring `ProfessorChill-crypto-com-api`'s
    /// `with_digital_signature`/`params_to_str` pairing.
    fn signed_query(&self, mut params: Vec<(&str, String)>) -> Result<String, ExchangeError> {
        params.push(("timestamp", Self::timestamp_ms().to_string()));
        params.sort_by(|a, b| a.0.cmp(b.0));
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = sign_hex(&self.credentials.api_secret, &query)
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;
        Ok(format!("{query}&signature={signature}"))
    }

    fn map_transport_error(err: reqwest::Error) -> ExchangeError {
        if err.is_timeout() {
            ExchangeError::Timeout
        } else if err.is_connect() {
            ExchangeError::ExchangeUnavailable(err.to_string())
        } else {
            ExchangeError::ExchangeUnavailable(err.to_string())
        }
    }

    fn map_status_error(status: reqwest::StatusCode, body: String) -> ExchangeError {
        match status.as_u16() {
            401 | 403 => ExchangeError::Auth(body),
            409 => ExchangeError::DuplicateOrder(body),
            429 => ExchangeError::RateLimit { retry_after_ms: None },
            400 | 404 => ExchangeError::BadRequest(body),
            s if s >= 500 => ExchangeError::ExchangeUnavailable(body),
            _ => ExchangeError::BadRequest(body),
        }
    }
}

#[async_trait]
impl ExchangeAdapter for RestExchangeAdapter {
    fn exchange(&self) -> Exchange {
        self.config.exchange
    }

    async fn fetch_open_orders_full(
        &self,
        symbol: &str,
    ) -> Result<Vec<ExchangeOrderFull>, ExchangeError> {
        let query = self.signed_query(vec![("symbol", symbol.to_string())])?;
        let url = format!("{}/openOrders?{query}", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, body));
        }
        response
            .json::<Vec<ExchangeOrderFull>>()
            .await
            .map_err(|e| ExchangeError::ExchangeUnavailable(e.to_string()))
    }

    async fn fetch_my_trades(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ExchangeTrade>, ExchangeError> {
        let mut params = vec![("symbol", symbol.to_string())];
        if let Some(since) = since {
            params.push(("startTime", since.timestamp_millis().to_string()));
        }
        let query = self.signed_query(params)?;
        let url = format!("{}/myTrades?{query}", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, body));
        }
        response
            .json::<Vec<ExchangeTrade>>()
            .await
            .map_err(|e| ExchangeError::ExchangeUnavailable(e.to_string()))
    }

    async fn try_create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResult, ExchangeError> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", format!("{:?}", request.side).to_uppercase()),
            ("type", format!("{:?}", request.kind).to_uppercase()),
            ("quantity", request.amount.to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
        }
        let query = self.signed_query(params)?;
        let url = format!("{}/order?{query}", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("X-API-KEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, body));
        }
        response
            .json::<CreateOrderResult>()
            .await
            .map_err(|e| ExchangeError::ExchangeUnavailable(e.to_string()))
    }

    async fn cancel_order(&self, exchange_order_id: &str, symbol: &str) -> Result<(), ExchangeError> {
        let query = self.signed_query(vec![
            ("symbol", symbol.to_string()),
            ("orderId", exchange_order_id.to_string()),
        ])?;
        let url = format!("{}/order?{query}", self.config.base_url);
        let response = self
            .http
            .delete(&url)
            .header("X-API-KEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        match response.status().as_u16() {
            200..=299 | 404 => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Self::map_status_error(
                    reqwest::StatusCode::from_u16(status).unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
                    body,
                ))
            }
        }
    }

    async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let query = self.signed_query(vec![])?;
        let url = format!("{}/account?{query}", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("X-API-KEY", &self.credentials.api_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, body));
        }
        response
            .json::<Balances>()
            .await
            .map_err(|e| ExchangeError::ExchangeUnavailable(e.to_string()))
    }

    async fn fetch_last_price(&self, symbol: &str) -> Result<Exact, ExchangeError> {
        let url = format!("{}/ticker/price?symbol={symbol}", self.config.base_url);
        let response = self.http.get(&url).send().await.map_err(Self::map_transport_error)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status_error(status, body));
        }
        response
            .json::<TickerPriceResponse>()
            .await
            .map(|r| r.price)
            .map_err(|e| ExchangeError::ExchangeUnavailable(e.to_string()))
    }
}

/// Normalises an exchange-native status string into [`OrderStatus`].
/// Real per-exchange vocabularies are wider than this; production client
/// code extends this match per venue as it's onboarded.
pub fn normalise_status(raw: &str) -> OrderStatus {
    match raw.to_uppercase().as_str() {
        "NEW" | "OPEN" => OrderStatus::New,
        "PARTIALLY_FILLED" | "PARTIAL" => OrderStatus::PartiallyFilled,
        "FILLED" | "CLOSED" => OrderStatus::Filled,
        "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
        "EXPIRED" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_status_covers_common_vocabularies() {
        assert_eq!(normalise_status("open"), OrderStatus::New);
        assert_eq!(normalise_status("PARTIALLY_FILLED"), OrderStatus::PartiallyFilled);
        assert_eq!(normalise_status("closed"), OrderStatus::Filled);
        assert_eq!(normalise_status("cancelled"), OrderStatus::Canceled);
    }
}
