//! Per-marketplace offer policy
//!
//! Every marketplace-specific rule lives in one record so the strategy loop
//! never branches on a marketplace name.

use super::Marketplace;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

/// Offer rules for one marketplace
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketplacePolicy {
    /// Hard LTV cap imposed by the marketplace
    pub max_ltv: f64,
    /// Publish even when the pricer says the loan is not viable
    pub skip_viability_check: bool,
    /// Principal granularity; amounts are rounded down to a multiple
    pub rounding_step: Decimal,
    /// Smallest principal the marketplace accepts
    pub min_amount: Decimal,
    /// Smallest APR the marketplace accepts
    pub min_apr: Decimal,
    /// Loans have no fixed term and can be recalled by the lender
    pub open_ended: bool,
    /// Duration used to price open-ended loans
    pub reference_duration_days: u32,
}

impl MarketplacePolicy {
    /// Look up the policy for a marketplace
    pub fn for_marketplace(marketplace: Marketplace) -> Self {
        match marketplace {
            Marketplace::Gondi => Self {
                max_ltv: 0.80,
                skip_viability_check: false,
                rounding_step: dec!(0.0001),
                min_amount: dec!(0.01),
                min_apr: dec!(0.01),
                open_ended: false,
                reference_duration_days: 30,
            },
            Marketplace::Blend => Self {
                max_ltv: 0.80,
                skip_viability_check: true,
                rounding_step: dec!(0.1),
                min_amount: dec!(0.1),
                min_apr: dec!(0.0001),
                open_ended: true,
                reference_duration_days: 30,
            },
            Marketplace::Nftfi => Self {
                max_ltv: 0.70,
                skip_viability_check: false,
                rounding_step: dec!(0.001),
                min_amount: dec!(0.05),
                min_apr: dec!(0.02),
                open_ended: false,
                reference_duration_days: 30,
            },
        }
    }

    /// Round a principal down to the marketplace's granularity
    pub fn round_amount(&self, amount: Decimal) -> Decimal {
        if self.rounding_step <= Decimal::ZERO {
            return amount;
        }
        ((amount / self.rounding_step).floor() * self.rounding_step).normalize()
    }
}
