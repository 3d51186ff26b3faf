//! `stateHash` (spec.md §4.4 step 7): a stability fingerprint over the set
//! of open-order-ids and attributed-trade-ids for a bot, so a tick that
//! observes no change skips writing a new snapshot.

use sha2::{Digest, Sha256};

/// First 16 hex characters of SHA-256 over the sorted ids, `\n`-joined in
/// two blocks (orders, then trades) so `{["a"],["b"]}` and `{["a","b"],[]}`
/// never collide.
pub fn compute_state_hash<'a>(
    open_order_ids: impl Iterator<Item = &'a str>,
    trade_ids: impl Iterator<Item = &'a str>,
) -> String {
    let mut orders: Vec<&str> = open_order_ids.collect();
    orders.sort_unstable();
    let mut trades: Vec<&str> = trade_ids.collect();
    trades.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(orders.join("\n"));
    hasher.update([0u8]);
    hasher.update(trades.join("\n"));
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_stable_under_reordering() {
        let a = compute_state_hash(["o2", "o1"].into_iter(), ["t1"].into_iter());
        let b = compute_state_hash(["o1", "o2"].into_iter(), ["t1"].into_iter());
        assert_eq!(a, b);
    }

    #[test]
    fn differs_when_membership_changes() {
        let a = compute_state_hash(["o1"].into_iter(), [].into_iter());
        let b = compute_state_hash(["o1", "o2"].into_iter(), [].into_iter());
        assert_ne!(a, b);
    }

    #[test]
    fn is_sixteen_hex_characters() {
        let h = compute_state_hash([].into_iter(), [].into_iter());
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
