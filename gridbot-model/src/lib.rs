//! Core domain types for the grid trading control plane: entities,
//! configuration parsing, identifiers, the injectable clock, and the
//! error taxonomy shared by every other `gridbot-*` crate.

pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod ids;

pub use entities::*;
pub use error::{ExchangeError, GridbotError};
pub use ids::{BotId, ExchangeAccountId, OrderId, RunId, TradeId, UserId};
