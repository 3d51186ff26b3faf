use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_model::{
    entities::{Bot, BotSnapshot, BotStatus, ExchangeAccount, Order, Trade, User},
    ids::{BotId, ExchangeAccountId, UserId},
};

/// Transactional KV over the entities of spec.md §3. Implementations must
/// honour: CAS on `Bot.statusVersion` (spec.md §4.2), monotonic `Order`
/// upserts, idempotent `Trade` inserts, and must never hold a transaction
/// across a network I/O call (spec.md §4.2, last bullet) — a constraint on
/// *callers* of this trait, since the trait itself only ever does local
/// store work per call.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, user: User) -> Result<User, StoreError>;
    async fn get_user(&self, id: &UserId) -> Result<User, StoreError>;
    /// Applies `mutate` to the stored user under a single lock and persists
    /// the result. Used for kill-switch enable/disable, whose idempotence
    /// is enforced by the mutator itself (`User::enable_kill_switch`).
    async fn update_user(
        &self,
        id: &UserId,
        mutate: Box<dyn FnOnce(&mut User) + Send>,
    ) -> Result<User, StoreError>;
    async fn list_bots_for_user_with_status(
        &self,
        user_id: &UserId,
        statuses: &[BotStatus],
    ) -> Result<Vec<Bot>, StoreError>;

    /// Fails with [`StoreError::AlreadyExists`] if `(userId, name)` is
    /// already taken (spec.md §6 persisted-state layout).
    async fn create_exchange_account(
        &self,
        account: ExchangeAccount,
    ) -> Result<ExchangeAccount, StoreError>;
    async fn get_exchange_account(
        &self,
        id: &ExchangeAccountId,
    ) -> Result<ExchangeAccount, StoreError>;
    async fn list_exchange_accounts_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ExchangeAccount>, StoreError>;
    /// Forbidden while any Bot references the account (spec.md §3, §6).
    async fn delete_exchange_account(&self, id: &ExchangeAccountId) -> Result<(), StoreError>;

    async fn create_bot(&self, bot: Bot) -> Result<Bot, StoreError>;
    async fn get_bot(&self, id: &BotId) -> Result<Bot, StoreError>;
    async fn delete_bot(&self, id: &BotId) -> Result<(), StoreError>;

    /// Bots with any of `statuses`, ordered oldest-processed-first
    /// (spec.md §4.1 step 1), capped at `limit`.
    async fn list_bots_by_status(
        &self,
        statuses: &[BotStatus],
        limit: usize,
    ) -> Result<Vec<Bot>, StoreError>;

    /// Records that the scheduler just processed this bot, for the
    /// oldest-processed-first ordering of future ticks.
    async fn mark_bot_processed(&self, id: &BotId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// `WHERE id=? AND statusVersion=?`, applying `mutate` then bumping
    /// `statusVersion` by exactly 1 (spec.md §4.2, §3 I7). Returns
    /// [`StoreError::CasFailed`] if the current stored version doesn't
    /// match `expected_version` — the caller must re-read to tell
    /// idempotent-success from concurrent-modify apart (spec.md §4.5, §7).
    async fn cas_update_bot(
        &self,
        id: &BotId,
        expected_version: u64,
        mutate: Box<dyn FnOnce(&mut Bot) + Send>,
    ) -> Result<Bot, StoreError>;

    /// Allocates the next strictly-increasing `intentSeq` for a bot
    /// (spec.md §3).
    async fn next_intent_seq(&self, bot_id: &BotId) -> Result<u64, StoreError>;

    /// Creates if absent, else merges per spec.md §4.2: never regresses
    /// `status`, and `filledAmount = max(old, new)` when both present.
    /// Keyed on `(exchange, clientOrderId)`.
    async fn upsert_order(&self, order: Order) -> Result<Order, StoreError>;
    async fn get_order_by_client_order_id(
        &self,
        exchange: gridbot_model::entities::Exchange,
        client_order_id: &str,
    ) -> Result<Option<Order>, StoreError>;
    async fn list_orders_for_bot(&self, bot_id: &BotId) -> Result<Vec<Order>, StoreError>;
    async fn list_open_orders_for_bot(&self, bot_id: &BotId) -> Result<Vec<Order>, StoreError>;
    /// Most recent (by `intentSeq`) order still in outbox state
    /// (`submittedAt IS NULL AND exchangeOrderId IS NULL`).
    async fn latest_outbox_order_for_bot(&self, bot_id: &BotId)
        -> Result<Option<Order>, StoreError>;
    /// Most recent (by `intentSeq`) order whose status is FILLED.
    async fn latest_filled_order_for_bot(&self, bot_id: &BotId)
        -> Result<Option<Order>, StoreError>;
    /// Most recent order for this bot whose `clientOrderId` starts with
    /// `prefix` (used to find a prior force-close order, spec.md §4.7).
    async fn latest_order_with_prefix(
        &self,
        bot_id: &BotId,
        prefix: &str,
    ) -> Result<Option<Order>, StoreError>;

    /// Idempotent on `(exchange, tradeId)`: a duplicate insert is a no-op.
    /// Returns `true` if this call actually inserted a new row.
    async fn insert_trade(&self, trade: Trade) -> Result<bool, StoreError>;
    async fn list_trades_for_bot(&self, bot_id: &BotId) -> Result<Vec<Trade>, StoreError>;

    async fn get_latest_snapshot(&self, bot_id: &BotId) -> Result<Option<BotSnapshot>, StoreError>;
    async fn insert_snapshot(&self, snapshot: BotSnapshot) -> Result<(), StoreError>;
}
