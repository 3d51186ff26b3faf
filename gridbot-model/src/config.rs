//! Bot `configJson` parsing and normalisation (spec.md §6.3, §9).

use gridbot_decimal::Exact;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GridType {
    Percent,
    Price,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BasePriceType {
    Current,
    Manual,
    Cost,
    Avg24h,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    pub grid_type: GridType,
    pub base_price_type: BasePriceType,
    pub base_price: Option<Exact>,
    pub rise_sell: Exact,
    pub fall_buy: Exact,
    pub price_min: Option<Exact>,
    pub price_max: Option<Exact>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderTypeConfig {
    Limit,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfig {
    pub order_type: OrderTypeConfig,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountMode {
    Amount,
    Percent,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsymmetricQuantity {
    pub buy_quantity: Option<Exact>,
    pub sell_quantity: Option<Exact>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricQuantity {
    pub order_quantity: Option<Exact>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizingConfig {
    pub amount_mode: AmountMode,
    pub grid_symmetric: bool,
    #[serde(default)]
    pub symmetric: SymmetricQuantity,
    #[serde(default)]
    pub asymmetric: AsymmetricQuantity,
}

impl SizingConfig {
    pub fn quantity_for(&self, side: crate::entities::Side) -> Option<Exact> {
        if self.grid_symmetric {
            self.symmetric.order_quantity
        } else {
            match side {
                crate::entities::Side::Buy => self.asymmetric.buy_quantity,
                crate::entities::Side::Sell => self.asymmetric.sell_quantity,
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskConfig {
    #[serde(default = "default_true")]
    pub enable_buy: bool,
    #[serde(default = "default_true")]
    pub enable_sell: bool,
    #[serde(default)]
    pub enable_floor_price: bool,
    pub floor_price: Option<Exact>,
    #[serde(default)]
    pub enable_auto_close: bool,
    pub auto_close_drawdown_percent: Option<Exact>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBotConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub trigger: TriggerConfig,
    pub order: OrderConfig,
    pub sizing: SizingConfig,
    pub risk: RiskConfig,
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configJson: {0}")]
    Parse(String),
    #[error("unsupported basePriceType: {0:?}")]
    UnsupportedBasePriceType(BasePriceType),
    #[error("basePriceType=manual requires trigger.basePrice")]
    MissingManualBasePrice,
    #[error("basePriceType=current requires a frozen autoCloseReferencePrice on the bot")]
    MissingFrozenReferencePrice,
}

/// A config that has been parsed, schema-normalised (percent points vs
/// ratios, spec.md §6.3) and had `cost`/`avg_24h` base-price types
/// rejected at start time (spec.md §4.5, §4.6 step 3).
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub raw: RawBotConfig,
}

impl RawBotConfig {
    pub fn parse(config_json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(config_json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Percent fields are "percent points" under schemaVersion 1 (2 means
    /// 2%) and ratios under schemaVersion >= 2 (0.02 means 2%). Returns the
    /// value always expressed as percent points, i.e. ratio * 100 when
    /// schemaVersion >= 2.
    pub fn normalize_percent(&self, value: Exact) -> Exact {
        if self.schema_version >= 2 {
            value * Exact::ONE_HUNDRED
        } else {
            value
        }
    }

    /// Validates at bot-start time: `cost`/`avg_24h` base price types are
    /// rejected outright (spec.md §4.5, §6.3).
    pub fn validate_at_start(&self) -> Result<(), ConfigError> {
        match self.trigger.base_price_type {
            BasePriceType::Cost | BasePriceType::Avg24h => {
                Err(ConfigError::UnsupportedBasePriceType(self.trigger.base_price_type))
            }
            BasePriceType::Manual if self.trigger.base_price.is_none() => {
                Err(ConfigError::MissingManualBasePrice)
            }
            _ => Ok(()),
        }
    }

    /// Trigger/Order engine step 3 (spec.md §4.6): re-pin `current` to
    /// `manual` using the frozen `autoCloseReferencePrice` so the rest of
    /// the pipeline only ever sees a pinned price.
    pub fn repin_to_frozen_reference(
        &self,
        frozen_reference_price: Option<Exact>,
    ) -> Result<RawBotConfig, ConfigError> {
        self.validate_at_start()?;

        let mut cfg = self.clone();
        if cfg.trigger.base_price_type == BasePriceType::Current {
            let price = frozen_reference_price.ok_or(ConfigError::MissingFrozenReferencePrice)?;
            cfg.trigger.base_price_type = BasePriceType::Manual;
            cfg.trigger.base_price = Some(price);
        }
        Ok(cfg)
    }
}

/// Recursive, own-keys-only JSON merge used for per-request config overlay
/// (spec.md §9 "Deep-merge with prototype-pollution guard"). In Rust there
/// is no prototype chain to pollute, so `__proto__`/`constructor`/
/// `prototype` rejection is a documented no-op; own-key enumeration via
/// `serde_json::Map` iteration is what actually matters and is preserved.
pub fn deep_merge_overlay(base: &Value, overlay: &Value) -> Value {
    const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if DANGEROUS_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge_overlay(existing, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        (_, overlay_value) => overlay_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
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
                "symmetric": { "orderQuantity": "10" }
            },
            "risk": {
                "enableAutoClose": true,
                "autoCloseDrawdownPercent": "5"
            }
        }"#
    }

    #[test]
    fn parses_camel_case_config_json() {
        let cfg = RawBotConfig::parse(sample_json()).unwrap();
        assert_eq!(cfg.schema_version, 1);
        assert_eq!(cfg.trigger.base_price_type, BasePriceType::Manual);
        assert!(cfg.validate_at_start().is_ok());
    }

    #[test]
    fn rejects_cost_and_avg24h_base_price_types() {
        let mut cfg = RawBotConfig::parse(sample_json()).unwrap();
        cfg.trigger.base_price_type = BasePriceType::Cost;
        assert!(matches!(
            cfg.validate_at_start(),
            Err(ConfigError::UnsupportedBasePriceType(_))
        ));
    }

    #[test]
    fn current_base_price_type_repins_to_frozen_reference() {
        let mut cfg = RawBotConfig::parse(sample_json()).unwrap();
        cfg.trigger.base_price_type = BasePriceType::Current;
        cfg.trigger.base_price = None;

        let err = cfg.repin_to_frozen_reference(None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingFrozenReferencePrice));

        let repinned = cfg
            .repin_to_frozen_reference(Some(Exact::parse("650").unwrap()))
            .unwrap();
        assert_eq!(repinned.trigger.base_price_type, BasePriceType::Manual);
        assert_eq!(repinned.trigger.base_price, Some(Exact::parse("650").unwrap()));
    }

    #[test]
    fn deep_merge_rejects_dangerous_keys_and_merges_own_keys() {
        let base = serde_json::json!({"risk": {"enableBuy": true}, "keep": 1});
        let overlay = serde_json::json!({
            "risk": {"enableSell": false},
            "__proto__": {"polluted": true},
        });
        let merged = deep_merge_overlay(&base, &overlay);
        assert_eq!(merged["risk"]["enableBuy"], serde_json::json!(true));
        assert_eq!(merged["risk"]["enableSell"], serde_json::json!(false));
        assert_eq!(merged["keep"], serde_json::json!(1));
        assert!(merged.get("__proto__").is_none());
    }
}
