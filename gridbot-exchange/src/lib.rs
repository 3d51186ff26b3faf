pub mod adapter;
pub mod exchanges;
pub mod signer;
pub mod simulated;
pub mod types;

pub use adapter::{AdapterConstructionError, AdapterConstructionGuard, ExchangeAdapter};
pub use exchanges::{rest_config_for, RestCredentials, RestExchangeAdapter};
pub use simulated::SimulatedExchange;
pub use types::{
    Balances, BalanceEntry, CreateOrderRequest, CreateOrderResult, ExchangeOrderFull, ExchangeOrderRef,
    ExchangeTrade,
};
