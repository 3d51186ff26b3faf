//! The Preview Engine: a pure function `(config, market, ticker, balance)
//! -> {basePrice, buy/sell trigger, orders, issues}` (spec.md §2, §4.6).
//! Grounded in `jackbot-risk/src/drawdown.rs`'s shape — a pure decision
//! function plus a typed result, no I/O, called identically from both the
//! Trigger/Order Engine and the thin HTTP `risk-check`-adjacent routes.

use gridbot_decimal::{DecimalError, Exact};
use gridbot_model::config::{AmountMode, BasePriceType, GridType, RawBotConfig};
use gridbot_model::entities::Side;
use serde::{Deserialize, Serialize};

/// Exchange market filters for the bot's symbol (lot size / notional
/// floor), independent of the bot's own config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketInfo {
    pub min_amount: Exact,
    pub min_notional: Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    pub last: Exact,
}

/// Free balances relevant to sizing: quote funds a buy, base funds a sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceView {
    pub free_base: Exact,
    pub free_quote: Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewOrder {
    pub side: Side,
    pub price: Exact,
    pub amount: Exact,
}

/// A structured, machine-readable issue — the Preview Engine never throws
/// for expected conditions (spec.md §7); callers decide what to do with
/// these (hard error at first-trigger, advisory at validation time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreviewIssue {
    /// `BELOW_MIN_AMOUNT`
    BelowMinAmount { side: Side, amount: Exact, min_amount: Exact },
    /// `BELOW_MIN_NOTIONAL`
    BelowMinNotional { side: Side, notional: Exact, min_notional: Exact },
    UnsupportedBasePriceType,
    MissingManualBasePrice,
    MissingSizingQuantity { side: Side },
    ZeroPriceDivision { side: Side },
}

impl PreviewIssue {
    /// The stable machine-readable prefix used in `lastError` (spec.md §7).
    pub fn code(&self) -> &'static str {
        match self {
            PreviewIssue::BelowMinAmount { .. } => "BELOW_MIN_AMOUNT",
            PreviewIssue::BelowMinNotional { .. } => "BELOW_MIN_NOTIONAL",
            PreviewIssue::UnsupportedBasePriceType => "UNSUPPORTED_BASE_PRICE_TYPE",
            PreviewIssue::MissingManualBasePrice => "MISSING_MANUAL_BASE_PRICE",
            PreviewIssue::MissingSizingQuantity { .. } => "MISSING_SIZING_QUANTITY",
            PreviewIssue::ZeroPriceDivision { .. } => "ZERO_PRICE_DIVISION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub base_price: Exact,
    pub buy_trigger_price: Exact,
    pub sell_trigger_price: Exact,
    pub buy_order: Option<PreviewOrder>,
    pub sell_order: Option<PreviewOrder>,
    pub issues: Vec<PreviewIssue>,
}

/// Resolves `basePrice` per `trigger.basePriceType` (spec.md §4.5): `manual`
/// uses the configured value, `current` uses the live ticker. `cost` and
/// `avg_24h` are unsupported — Preview still returns a best-effort
/// `basePrice` (the ticker) so callers get a displayable result, but records
/// the issue rather than silently treating it as supported.
fn resolve_base_price(config: &RawBotConfig, ticker: &Ticker, issues: &mut Vec<PreviewIssue>) -> Exact {
    match config.trigger.base_price_type {
        BasePriceType::Manual => match config.trigger.base_price {
            Some(price) => price,
            None => {
                issues.push(PreviewIssue::MissingManualBasePrice);
                ticker.last
            }
        },
        BasePriceType::Current => ticker.last,
        BasePriceType::Cost | BasePriceType::Avg24h => {
            issues.push(PreviewIssue::UnsupportedBasePriceType);
            ticker.last
        }
    }
}

fn trigger_prices(config: &RawBotConfig, base_price: Exact) -> (Exact, Exact) {
    match config.trigger.grid_type {
        GridType::Percent => {
            let rise_sell = config.normalize_percent(config.trigger.rise_sell);
            let fall_buy = config.normalize_percent(config.trigger.fall_buy);
            let sell = base_price.apply_drawdown_percent(Exact::ZERO - rise_sell);
            let buy = base_price.apply_drawdown_percent(fall_buy);
            (buy, sell)
        }
        // Absolute price offsets: schemaVersion's percent/ratio switch
        // (spec.md §6.3) only governs percent fields, not these.
        GridType::Price => (
            base_price - config.trigger.fall_buy,
            base_price + config.trigger.rise_sell,
        ),
    }
}

/// Sizes one side's order: resolves the configured quantity per
/// `sizing.amountMode`, converts to a base-asset amount at `price`, and
/// checks it against `market`'s lot-size/notional floor.
fn size_order(
    config: &RawBotConfig,
    side: Side,
    price: Exact,
    balance: &BalanceView,
    market: &MarketInfo,
    issues: &mut Vec<PreviewIssue>,
) -> Option<PreviewOrder> {
    let Some(quantity_value) = config.sizing.quantity_for(side) else {
        issues.push(PreviewIssue::MissingSizingQuantity { side });
        return None;
    };

    if price.is_zero() {
        issues.push(PreviewIssue::ZeroPriceDivision { side });
        return None;
    }

    let notional = match config.sizing.amount_mode {
        AmountMode::Amount => quantity_value,
        AmountMode::Percent => {
            let fraction = quantity_value.checked_div(Exact::ONE_HUNDRED).unwrap_or(Exact::ZERO);
            balance.free_quote * fraction
        }
    };

    let amount = match notional.checked_div(price) {
        Ok(amount) => amount,
        Err(DecimalError::DivByZero) => {
            issues.push(PreviewIssue::ZeroPriceDivision { side });
            return None;
        }
        Err(_) => return None,
    };

    if amount < market.min_amount {
        issues.push(PreviewIssue::BelowMinAmount {
            side,
            amount,
            min_amount: market.min_amount,
        });
    }
    if notional < market.min_notional {
        issues.push(PreviewIssue::BelowMinNotional {
            side,
            notional,
            min_notional: market.min_notional,
        });
    }

    Some(PreviewOrder { side, price, amount })
}

/// `calculatePreview(c,m,t,b) == calculatePreview(c,m,t,b)` (spec.md §8): a
/// pure function of its four inputs, no clock, no randomness, no I/O.
pub fn calculate_preview(
    config: &RawBotConfig,
    market: &MarketInfo,
    ticker: &Ticker,
    balance: &BalanceView,
) -> PreviewResult {
    let mut issues = Vec::new();
    let base_price = resolve_base_price(config, ticker, &mut issues);
    let (buy_trigger_price, sell_trigger_price) = trigger_prices(config, base_price);

    let buy_order = size_order(config, Side::Buy, buy_trigger_price, balance, market, &mut issues);
    let sell_order = size_order(config, Side::Sell, sell_trigger_price, balance, market, &mut issues);

    PreviewResult {
        base_price,
        buy_trigger_price,
        sell_trigger_price,
        buy_order,
        sell_order,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbot_model::config::RawBotConfig;
    use rust_decimal_macros::dec;

    fn config_json() -> &'static str {
        r#"{
            "trigger": {
                "gridType": "percent",
                "basePriceType": "manual",
                "basePrice": "600",
                "riseSell": "2",
                "fallBuy": "2"
            },
            "order": { "orderType": "limit" },
            "sizing": {
                "amountMode": "amount",
                "gridSymmetric": true,
                "symmetric": { "orderQuantity": "120" }
            },
            "risk": {
                "enableAutoClose": true,
                "autoCloseDrawdownPercent": "5"
            }
        }"#
    }

    fn market() -> MarketInfo {
        MarketInfo {
            min_amount: Exact::from_decimal(dec!(0.001)),
            min_notional: Exact::from_decimal(dec!(10)),
        }
    }

    #[test]
    fn preview_is_pure() {
        let config = RawBotConfig::parse(config_json()).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView {
            free_base: Exact::ZERO,
            free_quote: Exact::from_decimal(dec!(1000)),
        };
        let a = calculate_preview(&config, &market(), &ticker, &balance);
        let b = calculate_preview(&config, &market(), &ticker, &balance);
        assert_eq!(a, b);
    }

    #[test]
    fn percent_grid_computes_triggers_from_base_price() {
        let config = RawBotConfig::parse(config_json()).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) };
        let result = calculate_preview(&config, &market(), &ticker, &balance);
        assert_eq!(result.base_price, Exact::from_decimal(dec!(600)));
        assert_eq!(result.sell_trigger_price.inner(), dec!(612));
        assert_eq!(result.buy_trigger_price.inner(), dec!(588));
    }

    #[test]
    fn quote_notional_amount_mode_converts_to_base_quantity() {
        let config = RawBotConfig::parse(config_json()).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) };
        let result = calculate_preview(&config, &market(), &ticker, &balance);
        let buy = result.buy_order.unwrap();
        assert_eq!(buy.amount, Exact::from_decimal(dec!(120)).checked_div(buy.price).unwrap());
    }

    #[test]
    fn below_min_notional_is_reported_as_an_issue_not_a_panic() {
        let config_json = r#"{
            "trigger": {"gridType":"percent","basePriceType":"manual","basePrice":"600","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"amount","gridSymmetric":true,"symmetric":{"orderQuantity":"1"}},
            "risk": {}
        }"#;
        let config = RawBotConfig::parse(config_json).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) };
        let result = calculate_preview(&config, &market(), &ticker, &balance);
        assert!(result
            .issues
            .iter()
            .any(|i| i.code() == "BELOW_MIN_NOTIONAL"));
    }

    #[test]
    fn unsupported_base_price_type_is_an_issue_and_falls_back_to_ticker() {
        let config_json = r#"{
            "trigger": {"gridType":"percent","basePriceType":"cost","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"amount","gridSymmetric":true,"symmetric":{"orderQuantity":"120"}},
            "risk": {}
        }"#;
        let config = RawBotConfig::parse(config_json).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) };
        let result = calculate_preview(&config, &market(), &ticker, &balance);
        assert_eq!(result.base_price, ticker.last);
        assert!(result.issues.contains(&PreviewIssue::UnsupportedBasePriceType));
    }

    #[test]
    fn percent_amount_mode_sizes_from_free_quote_balance() {
        let config_json = r#"{
            "trigger": {"gridType":"percent","basePriceType":"manual","basePrice":"600","riseSell":"2","fallBuy":"2"},
            "order": {"orderType":"limit"},
            "sizing": {"amountMode":"percent","gridSymmetric":true,"symmetric":{"orderQuantity":"10"}},
            "risk": {}
        }"#;
        let config = RawBotConfig::parse(config_json).unwrap();
        let ticker = Ticker { last: Exact::from_decimal(dec!(590)) };
        let balance = BalanceView { free_base: Exact::ZERO, free_quote: Exact::from_decimal(dec!(1000)) };
        let result = calculate_preview(&config, &market(), &ticker, &balance);
        let buy = result.buy_order.unwrap();
        let expected_notional = Exact::from_decimal(dec!(100));
        assert_eq!(buy.amount, expected_notional.checked_div(buy.price).unwrap());
    }
}
