//! Capital limits

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// Portfolio-wide capital limits, fixed at startup
#[derive(Debug, Clone, Deserialize)]
pub struct RiskLimits {
    /// Total capital available for lending, in ETH
    #[serde(default = "default_max_capital")]
    pub max_capital_eth: Decimal,
    /// Maximum principal outstanding against one collection
    #[serde(default = "default_max_exposure")]
    pub max_exposure_per_collection: Decimal,
    /// Maximum active loans against one collection
    #[serde(default = "default_max_loans_per_collection")]
    pub max_loans_per_collection: usize,
    /// Share of capital that must stay undeployed
    #[serde(default = "default_min_reserve_ratio")]
    pub min_reserve_ratio: Decimal,
    /// Maximum deployed share of capital
    #[serde(default = "default_max_utilization")]
    pub max_utilization_rate: Decimal,
    /// Maximum active loans overall
    #[serde(default = "default_max_active_loans")]
    pub max_active_loan: usize,
    /// Maximum share of capital in loans with liquidation risk above 0.5
    #[serde(default = "default_liquidation_risk_threshold")]
    pub liquidation_risk_threshold: Decimal,
}

fn default_max_capital() -> Decimal {
    dec!(10)
}
fn default_max_exposure() -> Decimal {
    dec!(3)
}
fn default_max_loans_per_collection() -> usize {
    5
}
fn default_min_reserve_ratio() -> Decimal {
    dec!(0.1)
}
fn default_max_utilization() -> Decimal {
    dec!(0.9)
}
fn default_max_active_loans() -> usize {
    20
}
fn default_liquidation_risk_threshold() -> Decimal {
    dec!(0.3)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_capital_eth: default_max_capital(),
            max_exposure_per_collection: default_max_exposure(),
            max_loans_per_collection: default_max_loans_per_collection(),
            min_reserve_ratio: default_min_reserve_ratio(),
            max_utilization_rate: default_max_utilization(),
            max_active_loan: default_max_active_loans(),
            liquidation_risk_threshold: default_liquidation_risk_threshold(),
        }
    }
}

impl RiskLimits {
    /// Capital that must remain undeployed
    pub fn required_reserve(&self) -> Decimal {
        self.max_capital_eth * self.min_reserve_ratio
    }

    /// Largest tolerated at-risk capital
    pub fn at_risk_limit(&self) -> Decimal {
        self.max_capital_eth * self.liquidation_risk_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let limits = RiskLimits::default();
        assert_eq!(limits.max_capital_eth, dec!(10));
        assert_eq!(limits.required_reserve(), dec!(1));
        assert_eq!(limits.at_risk_limit(), dec!(3));
    }

    #[test]
    fn test_partial_deserialize() {
        let limits: RiskLimits = toml::from_str(
            r#"
            max_capital_eth = "5"
            max_exposure_per_collection = "2"
            "#,
        )
        .unwrap();
        assert_eq!(limits.max_capital_eth, dec!(5));
        assert_eq!(limits.max_exposure_per_collection, dec!(2));
        assert_eq!(limits.max_active_loan, 20);
    }
}
