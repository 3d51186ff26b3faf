//! Per-exchange REST dispatch. spec.md §9 "Polymorphism across exchanges":
//! a single enum match at construction time, not per-exchange trait impls —
//! the seven venues differ only in base URL, auth header shape and a
//! handful of field names, not in the shape of the adapter contract.

mod rest;

pub use rest::{RestConfig, RestCredentials, RestExchangeAdapter};

use gridbot_model::entities::Exchange;

/// Per-exchange endpoint/auth profile. Real field-name differences (e.g.
/// Binance's `origClientOrderId` vs OKX's `clOrdId`) live in `rest.rs`'s
/// request/response (de)serialisation, keyed off this tag — the profile
/// itself only carries what varies structurally (host, recv-window).
pub fn rest_config_for(exchange: Exchange, is_testnet: bool) -> RestConfig {
    let (mainnet_host, testnet_host) = match exchange {
        Exchange::Binance => ("https://api.binance.com", "https://testnet.binance.vision"),
        Exchange::Okx => ("https://www.okx.com", "https://www.okx.com"),
        Exchange::Huobi => ("https://api.huobi.pro", "https://api.huobi.pro"),
        Exchange::Htx => ("https://api.htx.com", "https://api.htx.com"),
        Exchange::Bybit => ("https://api.bybit.com", "https://api-testnet.bybit.com"),
        Exchange::Coinbase => ("https://api.exchange.coinbase.com", "https://api-public.sandbox.exchange.coinbase.com"),
        Exchange::Kraken => ("https://api.kraken.com", "https://api.kraken.com"),
    };
    RestConfig {
        exchange,
        base_url: if is_testnet { testnet_host } else { mainnet_host }.to_string(),
        is_testnet,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_named_exchange_has_a_rest_profile() {
        for exchange in [
            Exchange::Binance,
            Exchange::Okx,
            Exchange::Huobi,
            Exchange::Htx,
            Exchange::Bybit,
            Exchange::Coinbase,
            Exchange::Kraken,
        ] {
            let config = rest_config_for(exchange, true);
            assert!(!config.base_url.is_empty());
        }
    }
}
