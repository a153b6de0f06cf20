//! Cross-marketplace offer selection
//!
//! For each marketplace listing a collection, walks the duration buckets and
//! builds candidate offers against the visible competition:
//! - best-APR: undercut the lowest rate at its amount
//! - best-principal: match the largest principal at an undercut rate
//! - standalone: a fraction of max LTV where nobody is lending

use super::types::{
    MarketContext, OfferDetails, OfferType, SkipReason, StrategyRecommendation,
};
use crate::market::{
    CollectionConfig, LendingPlatform, MarketOffer, Marketplace, MarketplacePolicy,
};
use crate::model::{calculate_max_ltv, LoanPricer, MarketData};
use futures_util::future::join_all;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Candidates closer than this in both amount and APR are duplicates
const DUPLICATE_TOLERANCE: Decimal = dec!(0.001);

/// Strategy parameters
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Duration buckets evaluated on fixed-term marketplaces
    #[serde(default = "default_durations")]
    pub durations: Vec<u32>,
    /// Global APR ceiling
    #[serde(default = "default_max_apr")]
    pub max_apr: Decimal,
    /// Share of the effective max LTV lent when there is no competition
    #[serde(default = "default_standalone_ltv_fraction")]
    pub standalone_ltv_fraction: f64,
    /// Days of price history fed to the volatility estimator
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn default_durations() -> Vec<u32> {
    vec![7, 14, 30, 60, 90]
}
fn default_max_apr() -> Decimal {
    dec!(0.80)
}
fn default_standalone_ltv_fraction() -> f64 {
    0.6
}
fn default_lookback_days() -> u32 {
    90
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            durations: default_durations(),
            max_apr: default_max_apr(),
            standalone_ltv_fraction: default_standalone_ltv_fraction(),
            lookback_days: default_lookback_days(),
        }
    }
}

/// APR floor for offers without competition, rising with duration
pub fn no_competitor_apr_floor(duration_days: u32) -> f64 {
    0.25 + 0.003 * (duration_days as f64 - 7.0)
}

#[derive(Debug, Clone)]
struct Candidate {
    offer_type: OfferType,
    amount: Decimal,
    apr: Decimal,
    duration_days: u32,
}

impl Candidate {
    fn is_near_duplicate(&self, other: &Candidate) -> bool {
        (self.amount - other.amount).abs() < DUPLICATE_TOLERANCE
            && (self.apr - other.apr).abs() < DUPLICATE_TOLERANCE
    }

    fn label(&self) -> String {
        format!("{} {}d", self.offer_type, self.duration_days)
    }
}

fn market_context<'a>(
    market: &MarketData,
    offers: impl IntoIterator<Item = &'a MarketOffer>,
) -> MarketContext {
    let mut best_apr: Option<Decimal> = None;
    let mut best_amount: Option<Decimal> = None;
    for offer in offers {
        best_apr = Some(best_apr.map_or(offer.best_apr_decimal, |a| a.min(offer.best_apr_decimal)));
        best_amount = Some(
            best_amount.map_or(offer.best_principal_amount, |a| a.max(offer.best_principal_amount)),
        );
    }

    MarketContext {
        floor: market.floor_price,
        bid: market.top_bid,
        volatility: market.volatility,
        best_competing_apr: best_apr,
        best_competing_amount: best_amount,
    }
}

/// Builds offer recommendations for collections
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    pricer: LoanPricer,
    config: StrategyConfig,
}

impl StrategySelector {
    pub fn new(pricer: LoanPricer, config: StrategyConfig) -> Self {
        Self { pricer, config }
    }

    pub fn pricer(&self) -> &LoanPricer {
        &self.pricer
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Tighter of the marketplace cap and the pricer's cap
    pub fn effective_max_ltv(&self, market: &MarketData, policy: &MarketplacePolicy) -> f64 {
        let sigma = self.pricer.adjusted_volatility(market);
        policy.max_ltv.min(calculate_max_ltv(market.spread, sigma))
    }

    /// Evaluate a collection across every platform that lists it.
    ///
    /// Platforms are queried concurrently. A failing platform is logged and
    /// skipped. When nothing is sendable the result collapses to a single
    /// cannot-compete recommendation.
    pub async fn evaluate(
        &self,
        collection: &CollectionConfig,
        market: &MarketData,
        platforms: &[Arc<dyn LendingPlatform>],
    ) -> Vec<StrategyRecommendation> {
        let address = collection.address.as_str();
        let snapshots = join_all(platforms.iter().map(|platform| async move {
            if !platform.supports(address).await {
                return None;
            }
            match platform.market_offers(address).await {
                Ok(offers) => Some((platform.marketplace(), offers)),
                Err(e) => {
                    warn!(
                        collection = %collection.slug,
                        marketplace = %platform.marketplace(),
                        error = %e,
                        "Market offer query failed"
                    );
                    None
                }
            }
        }))
        .await;
        let snapshots: Vec<_> = snapshots.into_iter().flatten().collect();

        let mut recommendations = Vec::new();
        for (marketplace, offers) in &snapshots {
            recommendations.extend(self.evaluate_marketplace(
                &collection.slug,
                market,
                *marketplace,
                offers,
            ));
        }

        if recommendations.iter().any(|r| r.should_send) {
            return recommendations;
        }

        let reason = SkipReason::CannotCompete {
            candidates: recommendations.len(),
        };
        let context = market_context(market, snapshots.iter().flat_map(|(_, offers)| offers));
        debug!(collection = %collection.slug, %reason, "No sendable offer");
        vec![StrategyRecommendation::skip(
            &collection.slug,
            None,
            reason.to_string(),
            None,
            Some(context),
        )]
    }

    /// Evaluate one marketplace's snapshot for a collection
    pub fn evaluate_marketplace(
        &self,
        collection: &str,
        market: &MarketData,
        marketplace: Marketplace,
        offers: &[MarketOffer],
    ) -> Vec<StrategyRecommendation> {
        let policy = marketplace.policy();
        let max_ltv = self.effective_max_ltv(market, &policy);
        let context = market_context(market, offers);
        let undercut = Decimal::from_f64(self.pricer.config().min_spread_below_best)
            .unwrap_or_default();

        let durations = if policy.open_ended {
            vec![policy.reference_duration_days]
        } else {
            self.config.durations.clone()
        };

        let evaluate = |candidate: &Candidate| {
            self.check(collection, marketplace, &policy, market, max_ltv, candidate, &context)
        };

        let mut recommendations = Vec::new();
        for duration in durations {
            let competing = if policy.open_ended {
                offers.iter().min_by_key(|o| o.best_apr_decimal)
            } else {
                offers.iter().find(|o| o.duration_days == duration)
            };

            let Some(offer) = competing else {
                let candidate = self.standalone(market, &policy, max_ltv, duration);
                recommendations.push(evaluate(&candidate));
                continue;
            };

            let best_apr = self.candidate(
                &policy,
                OfferType::BestApr,
                offer.best_apr_amount,
                offer.best_apr_decimal - undercut,
                duration,
            );
            recommendations.push(evaluate(&best_apr));

            if policy.open_ended {
                continue;
            }

            let best_principal = self.candidate(
                &policy,
                OfferType::BestPrincipal,
                offer.best_principal_amount,
                offer.best_principal_apr_decimal - undercut,
                duration,
            );
            if best_principal.is_near_duplicate(&best_apr) {
                debug!(collection, %marketplace, duration, "Best-principal duplicates best-APR");
            } else {
                recommendations.push(evaluate(&best_principal));
            }
        }

        recommendations
    }

    /// Round the amount and clamp the APR to what the marketplace accepts
    fn candidate(
        &self,
        policy: &MarketplacePolicy,
        offer_type: OfferType,
        amount: Decimal,
        apr: Decimal,
        duration_days: u32,
    ) -> Candidate {
        Candidate {
            offer_type,
            amount: policy.round_amount(amount),
            apr: apr
                .round_dp(4)
                .max(policy.min_apr)
                .min(self.config.max_apr),
            duration_days,
        }
    }

    fn standalone(
        &self,
        market: &MarketData,
        policy: &MarketplacePolicy,
        max_ltv: f64,
        duration_days: u32,
    ) -> Candidate {
        let target = market.floor_price * max_ltv * self.config.standalone_ltv_fraction;
        let amount = policy.round_amount(Decimal::from_f64(target).unwrap_or_default());

        // A pricing failure resurfaces in the candidate check
        let recommended = amount
            .to_f64()
            .and_then(|a| self.pricer.price_loan(market, a, duration_days).ok())
            .map(|p| p.recommended_apr)
            .unwrap_or(0.0);
        let ceiling = self.config.max_apr.to_f64().unwrap_or(0.0);
        let apr = recommended
            .min(ceiling)
            .max(no_competitor_apr_floor(duration_days));

        self.candidate(
            policy,
            OfferType::Standalone,
            amount,
            Decimal::from_f64(apr).unwrap_or_default(),
            duration_days,
        )
    }

    /// Apply the amount, LTV, profitability and viability checks in order
    #[allow(clippy::too_many_arguments)]
    fn check(
        &self,
        collection: &str,
        marketplace: Marketplace,
        policy: &MarketplacePolicy,
        market: &MarketData,
        max_ltv: f64,
        candidate: &Candidate,
        context: &MarketContext,
    ) -> StrategyRecommendation {
        let skip = |reason: SkipReason, details: Option<OfferDetails>| {
            StrategyRecommendation::skip(
                collection,
                Some(marketplace),
                format!("{}: {}", candidate.label(), reason),
                details,
                Some(context.clone()),
            )
        };

        if candidate.amount <= Decimal::ZERO || candidate.amount < policy.min_amount {
            return skip(
                SkipReason::BelowMinimumAmount {
                    amount: candidate.amount,
                    min: policy.min_amount,
                },
                None,
            );
        }

        let amount = candidate.amount.to_f64().unwrap_or(0.0);
        let pricing = match self
            .pricer
            .price_loan(market, amount, candidate.duration_days)
        {
            Ok(pricing) => pricing,
            Err(e) => return skip(e.into(), None),
        };

        let details = OfferDetails {
            offer_type: candidate.offer_type,
            amount: candidate.amount,
            apr: candidate.apr,
            duration_days: candidate.duration_days,
            ltv: pricing.details.ltv,
            min_apr: pricing.min_apr,
            risk_score: pricing.risk_score,
        };
        let our_apr = candidate.apr.to_f64().unwrap_or(0.0);

        let rejection = if pricing.details.ltv > max_ltv {
            Some(SkipReason::LtvTooHigh {
                ltv: pricing.details.ltv,
                max_ltv,
            })
        } else if pricing.min_apr >= our_apr {
            Some(SkipReason::Unprofitable {
                min_apr: pricing.min_apr,
                our_apr,
            })
        } else if !pricing.is_viable && !policy.skip_viability_check {
            Some(SkipReason::NotViable {
                min_apr: pricing.min_apr,
                ltv: pricing.details.ltv,
            })
        } else {
            None
        };

        match rejection {
            Some(reason) => {
                debug!(
                    collection,
                    %marketplace,
                    candidate = %candidate.label(),
                    %reason,
                    "Candidate rejected"
                );
                skip(reason, Some(details))
            }
            None => StrategyRecommendation::send(collection, marketplace, details, context.clone()),
        }
    }
}
