//! In-memory [`Store`] implementation. Suitable for tests and the
//! reference binary; a production deployment implements the same trait
//! against Postgres/Redis instead (spec.md §4.2, §6.6), the way the
//! teacher workspace separates `PortfolioRepository` from its
//! `in_memory.rs`/`redis.rs` bodies. **No durability guarantees.**

use crate::{error::StoreError, traits::Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gridbot_model::entities::{Bot, BotSnapshot, BotStatus, Exchange, ExchangeAccount, Order, Trade, User};
use gridbot_model::ids::{BotId, ExchangeAccountId, UserId};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    accounts: HashMap<ExchangeAccountId, ExchangeAccount>,
    bots: HashMap<BotId, Bot>,
    bot_last_processed: HashMap<BotId, DateTime<Utc>>,
    intent_seqs: HashMap<BotId, u64>,
    /// Keyed by `(exchange, clientOrderId)` per spec.md §3 uniqueness rule.
    orders: HashMap<(Exchange, String), Order>,
    /// Keyed by `(exchange, tradeId)` per spec.md §3 uniqueness rule.
    trades: HashMap<(Exchange, String), Trade>,
    snapshots: HashMap<BotId, Vec<BotSnapshot>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn exchange_key(exchange: Exchange, client_order_id: &str) -> (Exchange, String) {
    (exchange, client_order_id.to_string())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_user(&self, user: User) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::AlreadyExists(format!("user {}", user.id)));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &UserId) -> Result<User, StoreError> {
        self.inner
            .read()
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
    }

    async fn update_user(
        &self,
        id: &UserId,
        mutate: Box<dyn FnOnce(&mut User) + Send>,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        let user = inner
            .users
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        mutate(user);
        Ok(user.clone())
    }

    async fn list_bots_for_user_with_status(
        &self,
        user_id: &UserId,
        statuses: &[BotStatus],
    ) -> Result<Vec<Bot>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .bots
            .values()
            .filter(|b| &b.user_id == user_id && statuses.contains(&b.status))
            .cloned()
            .collect())
    }

    async fn create_exchange_account(
        &self,
        account: ExchangeAccount,
    ) -> Result<ExchangeAccount, StoreError> {
        let mut inner = self.inner.write();
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::AlreadyExists(format!("account {}", account.id)));
        }
        if inner
            .accounts
            .values()
            .any(|a| a.user_id == account.user_id && a.name == account.name)
        {
            return Err(StoreError::AlreadyExists(format!(
                "account name {} for user {}",
                account.name, account.user_id
            )));
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn get_exchange_account(
        &self,
        id: &ExchangeAccountId,
    ) -> Result<ExchangeAccount, StoreError> {
        self.inner
            .read()
            .accounts
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn list_exchange_accounts_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ExchangeAccount>, StoreError> {
        Ok(self
            .inner
            .read()
            .accounts
            .values()
            .filter(|a| &a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_exchange_account(&self, id: &ExchangeAccountId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.bots.values().any(|b| &b.exchange_account_id == id) {
            return Err(StoreError::AccountHasBots);
        }
        inner
            .accounts
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    async fn create_bot(&self, bot: Bot) -> Result<Bot, StoreError> {
        let mut inner = self.inner.write();
        if inner.bots.contains_key(&bot.id) {
            return Err(StoreError::AlreadyExists(format!("bot {}", bot.id)));
        }
        inner.bots.insert(bot.id.clone(), bot.clone());
        Ok(bot)
    }

    async fn get_bot(&self, id: &BotId) -> Result<Bot, StoreError> {
        self.inner
            .read()
            .bots
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bot {id}")))
    }

    async fn delete_bot(&self, id: &BotId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner
            .bots
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("bot {id}")))
    }

    async fn list_bots_by_status(
        &self,
        statuses: &[BotStatus],
        limit: usize,
    ) -> Result<Vec<Bot>, StoreError> {
        let inner = self.inner.read();
        let mut matches: Vec<Bot> = inner
            .bots
            .values()
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect();
        matches.sort_by_key(|b| {
            inner
                .bot_last_processed
                .get(&b.id)
                .copied()
                .unwrap_or(b.created_at)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn mark_bot_processed(&self, id: &BotId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.write().bot_last_processed.insert(id.clone(), at);
        Ok(())
    }

    async fn cas_update_bot(
        &self,
        id: &BotId,
        expected_version: u64,
        mutate: Box<dyn FnOnce(&mut Bot) + Send>,
    ) -> Result<Bot, StoreError> {
        let mut inner = self.inner.write();
        let bot = inner
            .bots
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("bot {id}")))?;
        if bot.status_version != expected_version {
            return Err(StoreError::CasFailed);
        }
        mutate(bot);
        bot.status_version += 1;
        Ok(bot.clone())
    }

    async fn next_intent_seq(&self, bot_id: &BotId) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let counter = inner.intent_seqs.entry(bot_id.clone()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn upsert_order(&self, order: Order) -> Result<Order, StoreError> {
        let mut inner = self.inner.write();
        let key = exchange_key(order.exchange, &order.client_order_id);
        let merged = match inner.orders.get(&key) {
            None => order,
            Some(existing) => {
                let mut merged = existing.clone();
                merged.status = existing.status.merge(order.status);
                merged.filled_amount = existing.filled_amount.max(order.filled_amount);
                merged.avg_fill_price = order.avg_fill_price.or(existing.avg_fill_price);
                merged.exchange_order_id =
                    existing.exchange_order_id.clone().or(order.exchange_order_id);
                merged.submitted_at = existing.submitted_at.or(order.submitted_at);
                merged.price = existing.price.or(order.price);
                merged
            }
        };
        inner.orders.insert(key, merged.clone());
        Ok(merged)
    }

    async fn get_order_by_client_order_id(
        &self,
        exchange: Exchange,
        client_order_id: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .inner
            .read()
            .orders
            .get(&exchange_key(exchange, client_order_id))
            .cloned())
    }

    async fn list_orders_for_bot(&self, bot_id: &BotId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .inner
            .read()
            .orders
            .values()
            .filter(|o| &o.bot_id == bot_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.intent_seq);
        Ok(orders)
    }

    async fn list_open_orders_for_bot(&self, bot_id: &BotId) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .list_orders_for_bot(bot_id)
            .await?
            .into_iter()
            .filter(|o| o.is_open())
            .collect())
    }

    async fn latest_outbox_order_for_bot(
        &self,
        bot_id: &BotId,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .list_orders_for_bot(bot_id)
            .await?
            .into_iter()
            .filter(|o| o.is_outbox())
            .max_by_key(|o| o.intent_seq))
    }

    async fn latest_filled_order_for_bot(
        &self,
        bot_id: &BotId,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .list_orders_for_bot(bot_id)
            .await?
            .into_iter()
            .filter(|o| o.status == gridbot_model::entities::OrderStatus::Filled)
            .max_by_key(|o| o.intent_seq))
    }

    async fn latest_order_with_prefix(
        &self,
        bot_id: &BotId,
        prefix: &str,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .list_orders_for_bot(bot_id)
            .await?
            .into_iter()
            .filter(|o| o.client_order_id.starts_with(prefix))
            .max_by_key(|o| o.intent_seq))
    }

    async fn insert_trade(&self, trade: Trade) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let key = exchange_key(trade.exchange, &trade.trade_id);
        if inner.trades.contains_key(&key) {
            return Ok(false);
        }
        inner.trades.insert(key, trade);
        Ok(true)
    }

    async fn list_trades_for_bot(&self, bot_id: &BotId) -> Result<Vec<Trade>, StoreError> {
        Ok(self
            .inner
            .read()
            .trades
            .values()
            .filter(|t| &t.bot_id == bot_id)
            .cloned()
            .collect())
    }

    async fn get_latest_snapshot(&self, bot_id: &BotId) -> Result<Option<BotSnapshot>, StoreError> {
        Ok(self
            .inner
            .read()
            .snapshots
            .get(bot_id)
            .and_then(|snaps| snaps.last().cloned()))
    }

    async fn insert_snapshot(&self, snapshot: BotSnapshot) -> Result<(), StoreError> {
        self.inner
            .write()
            .snapshots
            .entry(snapshot.bot_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }
}
