//! Loan position tracking

use crate::market::{Marketplace, OwnLoan};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a loan position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Active,
    Repaid,
    Liquidated,
    Defaulted,
}

impl LoanStatus {
    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoanStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Repaid => "repaid",
            LoanStatus::Liquidated => "liquidated",
            LoanStatus::Defaulted => "defaulted",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LoanStatus::Active),
            "repaid" => Ok(LoanStatus::Repaid),
            "liquidated" => Ok(LoanStatus::Liquidated),
            "defaulted" => Ok(LoanStatus::Defaulted),
            other => anyhow::bail!("Unknown loan status: {}", other),
        }
    }
}

/// A loan we have made
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanPosition {
    /// Marketplace offer identifier, unique per position
    pub offer_id: String,
    pub marketplace: Marketplace,
    /// Collection slug
    pub collection: String,
    pub collection_address: String,
    pub loan_amount: Decimal,
    pub apr: Decimal,
    /// Term in days; open-ended loans carry the marketplace's pricing duration
    pub duration_days: u32,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Floor price when the loan started
    pub collateral_floor_price: Decimal,
    /// Most recent floor price
    pub current_floor_price: Option<Decimal>,
    pub status: LoanStatus,
    /// Probability-like score in [0, 1]
    pub liquidation_risk: f64,
}

impl LoanPosition {
    /// Build an active position from a loan a marketplace reports as taken
    pub fn from_loan(loan: &OwnLoan, collection: &str, floor_price: Decimal) -> Self {
        let duration_days = loan
            .duration_days
            .unwrap_or_else(|| loan.marketplace.policy().reference_duration_days);

        Self {
            offer_id: loan.offer_id.clone(),
            marketplace: loan.marketplace,
            collection: collection.to_string(),
            collection_address: loan.collection_address.clone(),
            loan_amount: loan.principal,
            apr: loan.apr,
            duration_days,
            start_date: loan.start_time,
            end_date: loan.start_time + Duration::days(duration_days as i64),
            collateral_floor_price: floor_price,
            current_floor_price: Some(floor_price),
            status: LoanStatus::Active,
            liquidation_risk: 0.0,
        }
    }

    /// Whether the position still holds capital
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    /// Interest earned over the full term
    pub fn expected_return(&self) -> Decimal {
        self.loan_amount * self.apr * Decimal::from(self.duration_days) / Decimal::from(365)
    }
}

/// Liquidation risk implied by an effective LTV.
///
/// Zero up to 70% LTV, rising to 0.5 at 90% and reaching 1 at 100%.
pub fn liquidation_risk(ltv: f64) -> f64 {
    let risk = if ltv > 0.9 {
        ((ltv - 0.7) / 0.3).min(1.0)
    } else if ltv > 0.7 {
        (ltv - 0.7) / 0.4
    } else {
        0.0
    };
    risk.clamp(0.0, 1.0)
}

/// Liquidation risk of a loan amount against a reference price
pub fn liquidation_risk_for(loan_amount: Decimal, reference_price: Decimal) -> f64 {
    if reference_price <= Decimal::ZERO {
        return 1.0;
    }
    let ltv = (loan_amount / reference_price).to_f64().unwrap_or(f64::INFINITY);
    liquidation_risk(ltv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::LoanState;
    use rust_decimal_macros::dec;

    fn loan(duration_days: Option<u32>, marketplace: Marketplace) -> OwnLoan {
        OwnLoan {
            offer_id: "offer-1".to_string(),
            marketplace,
            collection_address: "0xabc".to_string(),
            principal: dec!(2),
            remaining_balance: dec!(2),
            apr: dec!(0.365),
            duration_days,
            start_time: Utc::now(),
            state: LoanState::Active,
        }
    }

    #[test]
    fn test_status_terminality() {
        assert!(!LoanStatus::Active.is_terminal());
        assert!(LoanStatus::Repaid.is_terminal());
        assert!(LoanStatus::Liquidated.is_terminal());
        assert!(LoanStatus::Defaulted.is_terminal());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            LoanStatus::Active,
            LoanStatus::Repaid,
            LoanStatus::Liquidated,
            LoanStatus::Defaulted,
        ] {
            assert_eq!(status.as_str().parse::<LoanStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<LoanStatus>().is_err());
    }

    #[test]
    fn test_from_fixed_term_loan() {
        let position =
            LoanPosition::from_loan(&loan(Some(10), Marketplace::Gondi), "azuki", dec!(8));
        assert!(position.is_active());
        assert_eq!(position.duration_days, 10);
        assert_eq!(position.end_date - position.start_date, Duration::days(10));
        // 2 * 0.365 * 10 / 365
        assert_eq!(position.expected_return(), dec!(0.02));
    }

    #[test]
    fn test_from_open_ended_loan_uses_reference_duration() {
        let position = LoanPosition::from_loan(&loan(None, Marketplace::Blend), "azuki", dec!(8));
        assert_eq!(
            position.duration_days,
            Marketplace::Blend.policy().reference_duration_days
        );
    }

    #[test]
    fn test_liquidation_risk_bands() {
        assert_eq!(liquidation_risk(0.5), 0.0);
        assert_eq!(liquidation_risk(0.7), 0.0);
        assert!((liquidation_risk(0.8) - 0.25).abs() < 1e-12);
        assert!((liquidation_risk(0.9) - 0.5).abs() < 1e-12);
        assert!((liquidation_risk(0.95) - 0.25 / 0.3).abs() < 1e-12);
        assert_eq!(liquidation_risk(1.2), 1.0);
    }

    #[test]
    fn test_liquidation_risk_always_bounded() {
        for i in 0..300 {
            let risk = liquidation_risk(i as f64 / 100.0);
            assert!((0.0..=1.0).contains(&risk));
        }
        assert_eq!(liquidation_risk_for(dec!(1), dec!(0)), 1.0);
    }
}
