//! Liquidation checks for outstanding loans

use crate::market::{LoanState, OwnLoan};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// LTV bands for open-ended liens
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LiquidationThresholds {
    #[serde(default = "default_warn_ltv")]
    pub warn_ltv: f64,
    #[serde(default = "default_recall_ltv")]
    pub recall_ltv: f64,
}

fn default_warn_ltv() -> f64 {
    0.80
}
fn default_recall_ltv() -> f64 {
    0.90
}

impl Default for LiquidationThresholds {
    fn default() -> Self {
        Self {
            warn_ltv: default_warn_ltv(),
            recall_ltv: default_recall_ltv(),
        }
    }
}

/// What to do about an outstanding loan
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LiquidationAction {
    Hold,
    /// LTV is high but below the recall band
    Warn { ltv: f64 },
    /// Recall an open-ended lien
    Recall { ltv: f64 },
    /// Fixed-term loan is past due, foreclose
    Liquidate { overdue_hours: i64 },
}

impl LiquidationAction {
    /// Whether the action needs an operator or on-chain step
    pub fn requires_action(&self) -> bool {
        matches!(
            self,
            LiquidationAction::Recall { .. } | LiquidationAction::Liquidate { .. }
        )
    }
}

/// Evaluate one loan against the current floor.
///
/// Open-ended liens are judged on remaining balance over floor. Fixed-term
/// loans only on whether the term has elapsed.
pub fn evaluate_liquidation(
    loan: &OwnLoan,
    current_floor: Decimal,
    now: DateTime<Utc>,
    thresholds: &LiquidationThresholds,
    open_ended: bool,
) -> LiquidationAction {
    if loan.state != LoanState::Active {
        return LiquidationAction::Hold;
    }

    if open_ended {
        let ltv = if current_floor > Decimal::ZERO {
            (loan.remaining_balance / current_floor)
                .to_f64()
                .unwrap_or(f64::INFINITY)
        } else {
            f64::INFINITY
        };

        if ltv >= thresholds.recall_ltv {
            LiquidationAction::Recall { ltv }
        } else if ltv >= thresholds.warn_ltv {
            LiquidationAction::Warn { ltv }
        } else {
            LiquidationAction::Hold
        }
    } else {
        match loan.end_time() {
            Some(end) if now >= end => LiquidationAction::Liquidate {
                overdue_hours: (now - end).num_hours(),
            },
            _ => LiquidationAction::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Marketplace;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn lien(remaining: Decimal) -> OwnLoan {
        OwnLoan {
            offer_id: "lien-1".to_string(),
            marketplace: Marketplace::Blend,
            collection_address: "0xabc".to_string(),
            principal: dec!(8),
            remaining_balance: remaining,
            apr: dec!(0.2),
            duration_days: None,
            start_time: Utc::now() - Duration::days(40),
            state: LoanState::Active,
        }
    }

    fn fixed(start: DateTime<Utc>, days: u32) -> OwnLoan {
        OwnLoan {
            offer_id: "loan-1".to_string(),
            marketplace: Marketplace::Gondi,
            collection_address: "0xabc".to_string(),
            principal: dec!(5),
            remaining_balance: dec!(5),
            apr: dec!(0.2),
            duration_days: Some(days),
            start_time: start,
            state: LoanState::Active,
        }
    }

    #[test]
    fn test_lien_recall_band() {
        let thresholds = LiquidationThresholds::default();
        let action =
            evaluate_liquidation(&lien(dec!(9.1)), dec!(10), Utc::now(), &thresholds, true);
        assert!(matches!(action, LiquidationAction::Recall { ltv } if (ltv - 0.91).abs() < 1e-9));
        assert!(action.requires_action());
    }

    #[test]
    fn test_lien_warn_and_hold_bands() {
        let thresholds = LiquidationThresholds::default();
        let now = Utc::now();
        assert!(matches!(
            evaluate_liquidation(&lien(dec!(8.5)), dec!(10), now, &thresholds, true),
            LiquidationAction::Warn { .. }
        ));
        assert_eq!(
            evaluate_liquidation(&lien(dec!(7)), dec!(10), now, &thresholds, true),
            LiquidationAction::Hold
        );
    }

    #[test]
    fn test_lien_with_zero_floor_is_recalled() {
        let action = evaluate_liquidation(
            &lien(dec!(1)),
            Decimal::ZERO,
            Utc::now(),
            &LiquidationThresholds::default(),
            true,
        );
        assert!(matches!(action, LiquidationAction::Recall { .. }));
    }

    #[test]
    fn test_fixed_term_expiry() {
        let thresholds = LiquidationThresholds::default();
        let start = Utc::now() - Duration::days(10);

        let overdue =
            evaluate_liquidation(&fixed(start, 7), dec!(1), Utc::now(), &thresholds, false);
        assert!(matches!(
            overdue,
            LiquidationAction::Liquidate { overdue_hours } if overdue_hours >= 71
        ));

        // LTV is irrelevant before the term ends
        let running =
            evaluate_liquidation(&fixed(start, 30), dec!(1), Utc::now(), &thresholds, false);
        assert_eq!(running, LiquidationAction::Hold);
    }

    #[test]
    fn test_inactive_loans_hold() {
        let mut loan = lien(dec!(9.5));
        loan.state = LoanState::Repaid;
        let action = evaluate_liquidation(
            &loan,
            dec!(10),
            Utc::now(),
            &LiquidationThresholds::default(),
            true,
        );
        assert_eq!(action, LiquidationAction::Hold);
    }
}
