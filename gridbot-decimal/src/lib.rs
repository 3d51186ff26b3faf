//! Exact-decimal arithmetic for prices, amounts and percentages.
//!
//! The wire format for every quantity in the control plane is a decimal
//! string (`"123.45600000"`), never a float. [`Exact`] wraps
//! [`rust_decimal::Decimal`] (base-10 fixed point, no binary rounding
//! error) and only exposes construction through [`Exact::parse`], so a
//! malformed string can never silently become zero.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DecimalError {
    #[error("invalid decimal string: {0:?}")]
    Invalid(String),
    #[error("division by zero")]
    DivByZero,
}

/// An exact decimal quantity, serialised as a string on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Exact(Decimal);

impl Exact {
    pub const ZERO: Exact = Exact(Decimal::ZERO);
    pub const ONE: Exact = Exact(Decimal::ONE);
    pub const ONE_HUNDRED: Exact = Exact(Decimal::ONE_HUNDRED);

    pub fn parse(raw: &str) -> Result<Self, DecimalError> {
        Decimal::from_str(raw.trim())
            .map(Exact)
            .map_err(|_| DecimalError::Invalid(raw.to_string()))
    }

    pub fn from_decimal(d: Decimal) -> Self {
        Exact(d)
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_sign_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn checked_div(&self, rhs: Exact) -> Result<Exact, DecimalError> {
        if rhs.is_zero() {
            return Err(DecimalError::DivByZero);
        }
        Ok(Exact(self.0 / rhs.0))
    }

    pub fn max(self, other: Exact) -> Exact {
        Exact(self.0.max(other.0))
    }

    pub fn min(self, other: Exact) -> Exact {
        Exact(self.0.min(other.0))
    }

    /// `self * (1 - percent/100)`, used by AutoClose drawdown thresholds.
    pub fn apply_drawdown_percent(&self, percent: Exact) -> Exact {
        let hundred = Decimal::ONE_HUNDRED;
        Exact(self.0 * (hundred - percent.0) / hundred)
    }

    /// Observed drawdown of `last` relative to `self` (the reference), as a
    /// percentage, rounded to 2 decimal places per spec.md §4.5.
    pub fn drawdown_percent_from(&self, last: Exact) -> Exact {
        if self.0.is_zero() {
            return Exact::ZERO;
        }
        let raw = (self.0 - last.0) / self.0 * Decimal::ONE_HUNDRED;
        Exact(raw.round_dp(2))
    }

    pub fn round_dp(&self, dp: u32) -> Exact {
        Exact(self.0.round_dp(dp))
    }
}

impl fmt::Display for Exact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Exact {
    type Err = DecimalError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exact::parse(s)
    }
}

impl TryFrom<String> for Exact {
    type Error = DecimalError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Exact::parse(&value)
    }
}

impl From<Exact> for String {
    fn from(value: Exact) -> Self {
        value.to_string()
    }
}

impl std::ops::Add for Exact {
    type Output = Exact;
    fn add(self, rhs: Exact) -> Exact {
        Exact(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Exact {
    type Output = Exact;
    fn sub(self, rhs: Exact) -> Exact {
        Exact(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Exact {
    type Output = Exact;
    fn mul(self, rhs: Exact) -> Exact {
        Exact(self.0 * rhs.0)
    }
}

impl std::iter::Sum for Exact {
    fn sum<I: Iterator<Item = Exact>>(iter: I) -> Self {
        iter.fold(Exact::ZERO, |acc, x| acc + x)
    }
}

/// Volume-weighted average price over a set of (amount, price) fills,
/// computed as `Σ(amount·price) / Σ amount`. Used by the Reconciler to
/// recompute `avgFillPrice` (spec.md §4.4 step 6).
pub fn weighted_average_price(fills: &[(Exact, Exact)]) -> Result<Exact, DecimalError> {
    let total_amount: Exact = fills.iter().map(|(amount, _)| *amount).sum();
    if total_amount.is_zero() {
        return Err(DecimalError::DivByZero);
    }
    let total_notional: Exact = fills.iter().map(|(amount, price)| *amount * *price).sum();
    total_notional.checked_div(total_amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_and_round_trips_through_string() {
        let e = Exact::parse("123.45600000").unwrap();
        assert_eq!(e.to_string(), "123.45600000");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Exact::parse("not-a-number").is_err());
    }

    #[test]
    fn drawdown_threshold_matches_scenario_1() {
        let reference = Exact::from_decimal(dec!(600));
        let threshold = reference.apply_drawdown_percent(Exact::from_decimal(dec!(5)));
        assert_eq!(threshold.inner(), dec!(570));
        let last = Exact::from_decimal(dec!(500));
        assert!(last.inner() <= threshold.inner());
    }

    #[test]
    fn drawdown_percent_rounds_to_two_places() {
        let reference = Exact::from_decimal(dec!(600));
        let last = Exact::from_decimal(dec!(500));
        let pct = reference.drawdown_percent_from(last);
        assert_eq!(pct.inner(), dec!(16.67));
    }

    #[test]
    fn weighted_average_price_matches_manual_calc() {
        let fills = vec![
            (Exact::from_decimal(dec!(1)), Exact::from_decimal(dec!(100))),
            (Exact::from_decimal(dec!(3)), Exact::from_decimal(dec!(110))),
        ];
        let avg = weighted_average_price(&fills).unwrap();
        assert_eq!(avg.inner(), dec!(107.5));
    }

    #[test]
    fn weighted_average_price_rejects_zero_amount() {
        assert!(weighted_average_price(&[]).is_err());
    }
}
