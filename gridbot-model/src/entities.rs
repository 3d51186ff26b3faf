//! Entities and invariants of spec.md §3.

use crate::ids::{BotId, ExchangeAccountId, OrderId, RunId, TradeId, UserId};
use chrono::{DateTime, Utc};
use gridbot_decimal::Exact;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub kill_switch_enabled: bool,
    pub kill_switch_enabled_at: Option<DateTime<Utc>>,
    pub kill_switch_reason: Option<String>,
}

impl User {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            kill_switch_enabled: false,
            kill_switch_enabled_at: None,
            kill_switch_reason: None,
        }
    }

    /// Enables the kill-switch. Idempotent: the second `enable` does not
    /// overwrite `enabledAt` (spec.md §3: "monotonic with respect to a
    /// single enable transition").
    pub fn enable_kill_switch(&mut self, reason: String, now: DateTime<Utc>) {
        if !self.kill_switch_enabled {
            self.kill_switch_enabled = true;
            self.kill_switch_enabled_at = Some(now);
        }
        self.kill_switch_reason = Some(reason);
    }

    /// Disabling does NOT clear the audit fields (spec.md §4.5).
    pub fn disable_kill_switch(&mut self) {
        self.kill_switch_enabled = false;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Binance,
    Okx,
    Huobi,
    Htx,
    Bybit,
    Coinbase,
    Kraken,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "binance",
            Exchange::Okx => "okx",
            Exchange::Huobi => "huobi",
            Exchange::Htx => "htx",
            Exchange::Bybit => "bybit",
            Exchange::Coinbase => "coinbase",
            Exchange::Kraken => "kraken",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeAccount {
    pub id: ExchangeAccountId,
    pub user_id: UserId,
    /// Unique per `(userId, name)` (spec.md §6 persisted-state layout).
    pub name: String,
    pub exchange: Exchange,
    pub is_testnet: bool,
    pub encrypted_credentials: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Draft,
    WaitingTrigger,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl BotStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BotStatus::WaitingTrigger | BotStatus::Running | BotStatus::Paused
        )
    }

    /// Statuses the Reconciler runs against (spec.md §4.4: "PAUSED bots are
    /// deliberately frozen").
    pub fn reconcilable(&self) -> bool {
        matches!(
            self,
            BotStatus::Running | BotStatus::WaitingTrigger | BotStatus::Stopping
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub user_id: UserId,
    pub exchange_account_id: ExchangeAccountId,
    pub symbol: String,
    pub config_json: String,
    pub status: BotStatus,
    pub status_version: u64,
    pub run_id: Option<RunId>,
    pub auto_close_reference_price: Option<Exact>,
    /// When `auto_close_reference_price` was frozen for this run (spec.md
    /// §4.5's `basePriceType` resolution happens once, leaving DRAFT).
    pub auto_close_reference_frozen_at: Option<DateTime<Utc>>,
    pub auto_close_triggered_at: Option<DateTime<Utc>>,
    pub auto_close_reason: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bot {
    pub fn new(
        id: BotId,
        user_id: UserId,
        exchange_account_id: ExchangeAccountId,
        symbol: String,
        config_json: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            exchange_account_id,
            symbol,
            config_json,
            status: BotStatus::Draft,
            status_version: 0,
            run_id: None,
            auto_close_reference_price: None,
            auto_close_reference_frozen_at: None,
            auto_close_triggered_at: None,
            auto_close_reason: None,
            last_error: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// spec.md §3 I1: once FILLED/CANCELED/EXPIRED/REJECTED, a status must
    /// never regress. `New -> PartiallyFilled -> {Filled, Canceled,
    /// Expired, Rejected}` is the only legal direction of travel.
    fn rank(self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::PartiallyFilled => 1,
            OrderStatus::Filled
            | OrderStatus::Canceled
            | OrderStatus::Expired
            | OrderStatus::Rejected => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Merge an incoming status with the currently-stored one, never
    /// regressing (spec.md §3, §4.2).
    pub fn merge(self, incoming: OrderStatus) -> OrderStatus {
        if incoming.rank() >= self.rank() {
            incoming
        } else {
            self
        }
    }
}

/// Ownership prefix marking an order as belonging to this system
/// (spec.md §3, §6.2). Any exchange order lacking it must never be
/// reconciled.
pub const CLIENT_ORDER_ID_PREFIX: &str = "gb1";
/// Prefix reserved for STOPPING force-close orders.
pub const CLOSE_ORDER_ID_PREFIX: &str = "gb1c";

pub fn is_owned_client_order_id(cid: &str) -> bool {
    cid.starts_with(CLIENT_ORDER_ID_PREFIX)
}

pub fn is_close_client_order_id(cid: &str) -> bool {
    cid.starts_with(CLOSE_ORDER_ID_PREFIX)
}

/// Builds a `"gb1-<8 chars of botId>-<intentSeq>"` (or `gb1c-...` for
/// force-close orders) client order id (spec.md §3, §6.2).
pub fn build_client_order_id(bot_id: &BotId, intent_seq: u64, close: bool) -> String {
    let prefix = if close {
        CLOSE_ORDER_ID_PREFIX
    } else {
        CLIENT_ORDER_ID_PREFIX
    };
    let short_bot_id: String = bot_id.as_str().chars().take(8).collect();
    format!("{prefix}-{short_bot_id}-{intent_seq}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub bot_id: BotId,
    pub exchange: Exchange,
    pub symbol: String,
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub intent_seq: u64,
    pub side: Side,
    pub kind: OrderType,
    pub status: OrderStatus,
    pub price: Option<Exact>,
    pub amount: Exact,
    pub filled_amount: Exact,
    pub avg_fill_price: Option<Exact>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// An Order is in "outbox" state iff both `submittedAt` and
    /// `exchangeOrderId` are NULL (spec.md §3).
    pub fn is_outbox(&self) -> bool {
        self.submitted_at.is_none() && self.exchange_order_id.is_none()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::New | OrderStatus::PartiallyFilled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub bot_id: BotId,
    pub trade_id: String,
    pub client_order_id: Option<String>,
    pub exchange: Exchange,
    pub symbol: String,
    pub side: Side,
    pub price: Exact,
    pub amount: Exact,
    pub fee: Exact,
    pub fee_currency: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub bot_id: BotId,
    pub run_id: RunId,
    pub reconciled_at: DateTime<Utc>,
    pub state_json: String,
    pub state_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_order_id_format_matches_spec() {
        let id = build_client_order_id(&BotId::new("abcdefgh12345"), 3, false);
        assert_eq!(id, "gb1-abcdefgh-3");
        assert!(is_owned_client_order_id(&id));

        let close_id = build_client_order_id(&BotId::new("abcdefgh12345"), 1, true);
        assert_eq!(close_id, "gb1c-abcdefgh-1");
        assert!(is_close_client_order_id(&close_id));
        assert!(is_owned_client_order_id(&close_id));
    }

    #[test]
    fn foreign_order_without_prefix_is_rejected() {
        assert!(!is_owned_client_order_id("other-system-1"));
    }

    #[test]
    fn order_status_never_regresses() {
        let filled = OrderStatus::Filled;
        assert_eq!(filled.merge(OrderStatus::New), OrderStatus::Filled);
        assert_eq!(filled.merge(OrderStatus::PartiallyFilled), OrderStatus::Filled);

        let new = OrderStatus::New;
        assert_eq!(new.merge(OrderStatus::PartiallyFilled), OrderStatus::PartiallyFilled);
    }

    #[test]
    fn kill_switch_enable_is_idempotent_on_enabled_at() {
        let mut user = User::new(UserId::new("u1"));
        let t0 = Utc::now();
        user.enable_kill_switch("first".into(), t0);
        let t1 = t0 + chrono::Duration::seconds(5);
        user.enable_kill_switch("second".into(), t1);
        assert_eq!(user.kill_switch_enabled_at, Some(t0));
        assert_eq!(user.kill_switch_reason.as_deref(), Some("second"));
    }
}
