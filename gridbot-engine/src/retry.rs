//! Bounded-retry backoff, shared in shape by the Trigger/Order Engine
//! (spec.md §4.6.1) and the Stopping Executor (spec.md §4.7.1): same
//! `clamp(baseMs·2^attempts, baseMs, maxMs)`, same `retryAfterMs` floor,
//! same ±20% jitter, same `maxRetries` bound.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_ms: i64,
    pub max_ms: i64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_ms: i64, max_ms: i64) -> Self {
        Self { max_retries, base_ms, max_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

/// `clamp(baseMs·2^attempts, baseMs, maxMs)`, raised to `retryAfterMs` when
/// that is larger, then jittered by `jitter_fraction` (callers pass a value
/// in `[-0.2, 0.2]`; tests pass `0.0` for determinism).
pub fn compute_backoff_ms(
    policy: &RetryPolicy,
    attempts: u32,
    retry_after_ms: Option<u64>,
    jitter_fraction: f64,
) -> i64 {
    let exp = policy.base_ms.saturating_mul(1i64 << attempts.min(32));
    let mut backoff = exp.clamp(policy.base_ms, policy.max_ms);
    if let Some(floor) = retry_after_ms {
        backoff = backoff.max(floor as i64);
    }
    (backoff as f64 * (1.0 + jitter_fraction)).round() as i64
}

/// Whether another attempt is still within `maxRetries` (spec.md §8 I8:
/// "at most `WORKER_ORDER_MAX_RETRIES` `createOrder` invocations per intent").
pub fn retries_remaining(policy: &RetryPolicy, attempts_so_far: u32) -> bool {
    attempts_so_far + 1 < policy.max_retries
}

pub fn next_retry_state(
    now: DateTime<Utc>,
    policy: &RetryPolicy,
    attempts_so_far: u32,
    retry_after_ms: Option<u64>,
    jitter_fraction: f64,
) -> RetryState {
    let backoff_ms = compute_backoff_ms(policy, attempts_so_far, retry_after_ms, jitter_fraction);
    RetryState {
        attempts: attempts_so_far + 1,
        next_attempt_at: now + ChronoDuration::milliseconds(backoff_ms),
    }
}

pub fn is_due(now: DateTime<Utc>, state: Option<&RetryState>) -> bool {
    match state {
        None => true,
        Some(s) => now >= s.next_attempt_at,
    }
}

/// Real jitter source shared by both engine stages' default constructors;
/// tests inject a fixed closure instead via `with_jitter`.
pub(crate) fn default_jitter() -> f64 {
    use rand::Rng;
    rand::rng().random_range(-0.2..=0.2)
}
