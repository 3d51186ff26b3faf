//! Floor-Price / Bounds / Enable-Side gates (spec.md §4.5): evaluated
//! *inside* the Trigger/Order Engine, blocking submission rather than
//! transitioning Bot state. Pure, side-effect-free — same texture as
//! [`crate::autoclose::evaluate`].

use gridbot_decimal::Exact;
use gridbot_model::config::RiskConfig;
use gridbot_model::entities::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    /// `enableBuy`/`enableSell` is false for this side.
    SideDisabled { side: Side },
    /// A buy below `floorPrice` (floor never blocks sells).
    BelowFloorPrice { price: Exact, floor_price: Exact },
    /// Current price outside `[priceMin, priceMax]`.
    OutsideBounds { price: Exact, price_min: Option<Exact>, price_max: Option<Exact> },
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::SideDisabled { .. } => "SIDE_DISABLED",
            GateRejection::BelowFloorPrice { .. } => "BELOW_FLOOR_PRICE",
            GateRejection::OutsideBounds { .. } => "OUTSIDE_BOUNDS",
        }
    }
}

/// `risk.enableBuy`/`risk.enableSell` (spec.md §4.5, §6.3).
pub fn enable_side_gate(risk: &RiskConfig, side: Side) -> Result<(), GateRejection> {
    let enabled = match side {
        Side::Buy => risk.enable_buy,
        Side::Sell => risk.enable_sell,
    };
    if enabled {
        Ok(())
    } else {
        Err(GateRejection::SideDisabled { side })
    }
}

/// FloorPrice blocks buys below the floor; sells are never blocked
/// (spec.md §4.5).
pub fn floor_price_gate(risk: &RiskConfig, side: Side, price: Exact) -> Result<(), GateRejection> {
    if side == Side::Sell || !risk.enable_floor_price {
        return Ok(());
    }
    match risk.floor_price {
        Some(floor) if price < floor => Err(GateRejection::BelowFloorPrice { price, floor_price: floor }),
        _ => Ok(()),
    }
}

/// Bounds gate passes when bounds are absent on a side (spec.md §8
/// boundary behaviour).
pub fn bounds_gate(price_min: Option<Exact>, price_max: Option<Exact>, current_price: Exact) -> Result<(), GateRejection> {
    if let Some(min) = price_min {
        if current_price < min {
            return Err(GateRejection::OutsideBounds { price: current_price, price_min: Some(min), price_max });
        }
    }
    if let Some(max) = price_max {
        if current_price > max {
            return Err(GateRejection::OutsideBounds { price: current_price, price_min, price_max: Some(max) });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn exact(v: rust_decimal::Decimal) -> Exact {
        Exact::from_decimal(v)
    }

    fn risk(enable_buy: bool, enable_sell: bool) -> RiskConfig {
        RiskConfig {
            enable_buy,
            enable_sell,
            enable_floor_price: false,
            floor_price: None,
            enable_auto_close: false,
            auto_close_drawdown_percent: None,
        }
    }

    #[test]
    fn disabled_side_is_rejected() {
        let risk = risk(false, true);
        assert!(enable_side_gate(&risk, Side::Buy).is_err());
        assert!(enable_side_gate(&risk, Side::Sell).is_ok());
    }

    #[test]
    fn floor_price_never_blocks_sells() {
        let mut risk = risk(true, true);
        risk.enable_floor_price = true;
        risk.floor_price = Some(exact(dec!(550)));
        assert!(floor_price_gate(&risk, Side::Sell, exact(dec!(1))).is_ok());
        assert!(floor_price_gate(&risk, Side::Buy, exact(dec!(500))).is_err());
        assert!(floor_price_gate(&risk, Side::Buy, exact(dec!(600))).is_ok());
    }

    #[test]
    fn bounds_gate_passes_when_absent() {
        assert!(bounds_gate(None, None, exact(dec!(1000))).is_ok());
        assert!(bounds_gate(Some(exact(dec!(10))), None, exact(dec!(5))).is_err());
        assert!(bounds_gate(None, Some(exact(dec!(10))), exact(dec!(20))).is_err());
    }
}
