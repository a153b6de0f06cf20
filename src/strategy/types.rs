//! Strategy output types

use crate::market::Marketplace;
use crate::model::PricingError;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Offer archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferType {
    /// Undercut the lowest competing APR at its amount
    BestApr,
    /// Match the largest competing principal
    BestPrincipal,
    /// No competing offer for the duration
    Standalone,
}

impl fmt::Display for OfferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OfferType::BestApr => "best-apr",
            OfferType::BestPrincipal => "best-principal",
            OfferType::Standalone => "standalone",
        };
        f.write_str(name)
    }
}

/// Terms of a candidate offer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferDetails {
    pub offer_type: OfferType,
    /// Principal after marketplace rounding
    pub amount: Decimal,
    pub apr: Decimal,
    pub duration_days: u32,
    pub ltv: f64,
    pub min_apr: f64,
    pub risk_score: u32,
}

/// Market conditions behind a decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketContext {
    pub floor: f64,
    pub bid: f64,
    pub volatility: f64,
    pub best_competing_apr: Option<Decimal>,
    pub best_competing_amount: Option<Decimal>,
}

/// Why a candidate was not sent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SkipReason {
    #[error("insufficient price history ({returns} usable returns)")]
    InsufficientData { returns: usize },
    #[error("amount {amount} below marketplace minimum {min}")]
    BelowMinimumAmount { amount: Decimal, min: Decimal },
    #[error("ltv {:.1}% > max {:.1}%", .ltv * 100.0, .max_ltv * 100.0)]
    LtvTooHigh { ltv: f64, max_ltv: f64 },
    #[error("minApr {:.1}% >= ourApr {:.1}%", .min_apr * 100.0, .our_apr * 100.0)]
    Unprofitable { min_apr: f64, our_apr: f64 },
    #[error("not viable (minApr {:.1}%, ltv {:.1}%)", .min_apr * 100.0, .ltv * 100.0)]
    NotViable { min_apr: f64, ltv: f64 },
    #[error("pricing rejected: {0}")]
    Pricing(#[from] PricingError),
    #[error("cannot compete on any marketplace ({candidates} candidates rejected)")]
    CannotCompete { candidates: usize },
}

/// One decision for a collection on a marketplace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyRecommendation {
    pub collection: String,
    /// `None` for collection-level outcomes
    pub platform: Option<Marketplace>,
    pub should_send: bool,
    pub reason: String,
    pub offer_details: Option<OfferDetails>,
    pub market_context: Option<MarketContext>,
}

impl StrategyRecommendation {
    /// A candidate worth publishing
    pub fn send(
        collection: &str,
        platform: Marketplace,
        details: OfferDetails,
        context: MarketContext,
    ) -> Self {
        let reason = format!(
            "{} {}d: {} ETH at {:.2}% (minApr {:.2}%)",
            details.offer_type,
            details.duration_days,
            details.amount,
            details.apr * Decimal::ONE_HUNDRED,
            details.min_apr * 100.0
        );
        Self {
            collection: collection.to_string(),
            platform: Some(platform),
            should_send: true,
            reason,
            offer_details: Some(details),
            market_context: Some(context),
        }
    }

    /// A rejected candidate or collection-level skip
    pub fn skip(
        collection: &str,
        platform: Option<Marketplace>,
        reason: impl Into<String>,
        details: Option<OfferDetails>,
        context: Option<MarketContext>,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            platform,
            should_send: false,
            reason: reason.into(),
            offer_details: details,
            market_context: context,
        }
    }

    /// Collection skipped for lack of usable price history
    pub fn insufficient_data(collection: &str, returns: usize) -> Self {
        Self::skip(
            collection,
            None,
            SkipReason::InsufficientData { returns }.to_string(),
            None,
            None,
        )
    }
}
