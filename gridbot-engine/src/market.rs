//! `bot.symbol` ("BASE/QUOTE") to [`BalanceView`] projection, shared by the
//! Worker Scheduler's per-tick pipeline and the HTTP API's `/start` and
//! `risk-check` routes. Mirrors the `split_once('/')` convention
//! `StoppingExecutor::force_close` already uses for the base asset alone.

use gridbot_decimal::Exact;
use gridbot_exchange::types::Balances;
use gridbot_preview::BalanceView;

/// Projects the free balances relevant to `symbol` out of a full
/// [`Balances`] map. A symbol with no `/` (malformed) yields all zeros
/// rather than panicking — the caller's existing issue-reporting path
/// (e.g. Preview's `ZeroPriceDivision`/gate checks) surfaces the
/// consequence, not this lookup.
pub fn balance_view_from(balances: &Balances, symbol: &str) -> BalanceView {
    let Some((base, quote)) = symbol.split_once('/') else {
        return BalanceView { free_base: Exact::ZERO, free_quote: Exact::ZERO };
    };
    BalanceView {
        free_base: balances.get(base).map(|e| e.free).unwrap_or(Exact::ZERO),
        free_quote: balances.get(quote).map(|e| e.free).unwrap_or(Exact::ZERO),
    }
}

/// The free base-asset balance alone, for [`crate::stopping::StoppingExecutor::tick`]'s
/// `free_base_balance` input.
pub fn free_base_balance(balances: &Balances, symbol: &str) -> Exact {
    symbol
        .split_once('/')
        .and_then(|(base, _)| balances.get(base))
        .map(|e| e.free)
        .unwrap_or(Exact::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_exchange::types::BalanceEntry;
    use rust_decimal_macros::dec;

    fn balances() -> Balances {
        let mut m = Balances::new();
        m.insert(
            "BNB".into(),
            BalanceEntry { free: Exact::from_decimal(dec!(2)), locked: Exact::ZERO, total: Exact::from_decimal(dec!(2)) },
        );
        m.insert(
            "USDT".into(),
            BalanceEntry { free: Exact::from_decimal(dec!(1000)), locked: Exact::ZERO, total: Exact::from_decimal(dec!(1000)) },
        );
        m
    }

    #[test]
    fn projects_base_and_quote_from_symbol() {
        let view = balance_view_from(&balances(), "BNB/USDT");
        assert_eq!(view.free_base, Exact::from_decimal(dec!(2)));
        assert_eq!(view.free_quote, Exact::from_decimal(dec!(1000)));
    }

    #[test]
    fn missing_asset_in_balances_is_zero_not_an_error() {
        let view = balance_view_from(&Balances::new(), "BNB/USDT");
        assert_eq!(view.free_base, Exact::ZERO);
        assert_eq!(view.free_quote, Exact::ZERO);
    }

    #[test]
    fn malformed_symbol_yields_zeros() {
        let view = balance_view_from(&balances(), "BNBUSDT");
        assert_eq!(view.free_base, Exact::ZERO);
        assert_eq!(view.free_quote, Exact::ZERO);
    }

    #[test]
    fn free_base_balance_matches_the_base_leg() {
        assert_eq!(free_base_balance(&balances(), "BNB/USDT"), Exact::from_decimal(dec!(2)));
    }
}
