//! Kill-Switch (spec.md §4.5): a per-user flag that sweeps every active bot
//! into STOPPING. Individual CAS misses while sweeping are swallowed as
//! idempotent — the sweep's job is "make sure", not "be the one who did it".

use gridbot_model::entities::{Bot, BotStatus, User};
use gridbot_model::ids::UserId;
use gridbot_store::{Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchSweepResult {
    pub bots_stopped: Vec<gridbot_model::ids::BotId>,
}

/// Enables the kill-switch for `user_id`: CAS-sets the flag (idempotent on
/// `enabledAt` via [`User::enable_kill_switch`]), then sweeps every bot in
/// `{RUNNING, WAITING_TRIGGER}` to STOPPING.
pub async fn enable(
    store: &dyn Store,
    user_id: &UserId,
    reason: String,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<KillSwitchSweepResult, KillSwitchError> {
    store
        .update_user(
            user_id,
            Box::new({
                let reason = reason.clone();
                move |u: &mut User| u.enable_kill_switch(reason, now)
            }),
        )
        .await?;

    let bots = store
        .list_bots_for_user_with_status(
            user_id,
            &[BotStatus::Running, BotStatus::WaitingTrigger],
        )
        .await?;

    let mut bots_stopped = Vec::new();
    for bot in bots {
        let last_error = format!("KILL_SWITCH: {reason}");
        match store
            .cas_update_bot(
                &bot.id,
                bot.status_version,
                Box::new(move |b: &mut Bot| {
                    b.status = BotStatus::Stopping;
                    b.last_error = Some(last_error);
                }),
            )
            .await
        {
            Ok(updated) => bots_stopped.push(updated.id),
            // A raced concurrent state change for this one bot does not
            // abort the sweep for the rest (spec.md §4.5).
            Err(StoreError::CasFailed) => continue,
            Err(other) => return Err(other.into()),
        }
    }

    Ok(KillSwitchSweepResult { bots_stopped })
}

/// Per-bot catch-up check (spec.md §4.1 step 4): the worker's Risk
/// Evaluator runs this ahead of AutoClose on every active bot each tick, so
/// a bot that started *after* a user's [`enable`] sweep already ran still
/// gets stopped within one tick interval. Same CAS-and-swallow-miss shape
/// as the sweep's loop body, at the single-bot scale.
pub async fn enforce_for_bot(store: &dyn Store, bot: &Bot) -> Result<bool, KillSwitchError> {
    if !matches!(bot.status, BotStatus::Running | BotStatus::WaitingTrigger) {
        return Ok(false);
    }
    let user = store.get_user(&bot.user_id).await?;
    if !user.kill_switch_enabled {
        return Ok(false);
    }
    let reason = user.kill_switch_reason.clone().unwrap_or_default();
    let last_error = format!("KILL_SWITCH: {reason}");
    match store
        .cas_update_bot(
            &bot.id,
            bot.status_version,
            Box::new(move |b: &mut Bot| {
                b.status = BotStatus::Stopping;
                b.last_error = Some(last_error);
            }),
        )
        .await
    {
        Ok(_) => Ok(true),
        Err(StoreError::CasFailed) => Ok(false),
        Err(other) => Err(other.into()),
    }
}

/// Disabling does NOT clear `killSwitchEnabledAt`/`killSwitchReason`
/// (spec.md §4.5) — those remain as an audit trail of the last trigger.
pub async fn disable(store: &dyn Store, user_id: &UserId) -> Result<User, KillSwitchError> {
    Ok(store
        .update_user(user_id, Box::new(|u: &mut User| u.disable_kill_switch()))
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gridbot_model::ids::{BotId, ExchangeAccountId};
    use gridbot_store::InMemoryStore;

    async fn seed_user_with_bot(store: &InMemoryStore, status: BotStatus) -> (UserId, BotId) {
        let user_id = UserId::new("user-1");
        store.create_user(User::new(user_id.clone())).await.unwrap();
        let mut bot = Bot::new(
            BotId::new("bot-1"),
            user_id.clone(),
            ExchangeAccountId::new("acct-1"),
            "BNB/USDT".into(),
            "{}".into(),
            Utc::now(),
        );
        bot.status = status;
        let bot = store.create_bot(bot).await.unwrap();
        (user_id, bot.id)
    }

    #[tokio::test]
    async fn enabling_sweeps_active_bots_to_stopping() {
        let store = InMemoryStore::new();
        let (user_id, bot_id) = seed_user_with_bot(&store, BotStatus::Running).await;

        let result = enable(&store, &user_id, "user requested".into(), Utc::now())
            .await
            .unwrap();
        assert_eq!(result.bots_stopped, vec![bot_id.clone()]);

        let bot = store.get_bot(&bot_id).await.unwrap();
        assert_eq!(bot.status, BotStatus::Stopping);
        assert_eq!(bot.last_error.as_deref(), Some("KILL_SWITCH: user requested"));
    }

    #[tokio::test]
    async fn paused_bots_are_not_swept() {
        let store = InMemoryStore::new();
        let (user_id, bot_id) = seed_user_with_bot(&store, BotStatus::Paused).await;

        let result = enable(&store, &user_id, "r".into(), Utc::now()).await.unwrap();
        assert!(result.bots_stopped.is_empty());
        assert_eq!(store.get_bot(&bot_id).await.unwrap().status, BotStatus::Paused);
    }

    #[tokio::test]
    async fn enforce_for_bot_stops_an_active_bot_once_flag_is_set() {
        let store = InMemoryStore::new();
        let (user_id, bot_id) = seed_user_with_bot(&store, BotStatus::WaitingTrigger).await;
        store
            .update_user(&user_id, Box::new(|u: &mut User| u.enable_kill_switch("late start".into(), Utc::now())))
            .await
            .unwrap();

        let bot = store.get_bot(&bot_id).await.unwrap();
        let stopped = enforce_for_bot(&store, &bot).await.unwrap();
        assert!(stopped);
        let reloaded = store.get_bot(&bot_id).await.unwrap();
        assert_eq!(reloaded.status, BotStatus::Stopping);
        assert_eq!(reloaded.last_error.as_deref(), Some("KILL_SWITCH: late start"));
    }

    #[tokio::test]
    async fn enforce_for_bot_is_a_no_op_without_the_flag() {
        let store = InMemoryStore::new();
        let (_, bot_id) = seed_user_with_bot(&store, BotStatus::Running).await;
        let bot = store.get_bot(&bot_id).await.unwrap();
        assert!(!enforce_for_bot(&store, &bot).await.unwrap());
        assert_eq!(store.get_bot(&bot_id).await.unwrap().status, BotStatus::Running);
    }

    #[tokio::test]
    async fn disable_preserves_audit_fields() {
        let store = InMemoryStore::new();
        let (user_id, _) = seed_user_with_bot(&store, BotStatus::Running).await;
        enable(&store, &user_id, "r".into(), Utc::now()).await.unwrap();

        let disabled = disable(&store, &user_id).await.unwrap();
        assert!(!disabled.kill_switch_enabled);
        assert!(disabled.kill_switch_enabled_at.is_some());
        assert_eq!(disabled.kill_switch_reason.as_deref(), Some("r"));
    }
}
