//! One evaluation cycle over every configured collection

use crate::config::Config;
use crate::data::{PriceSnapshot, PriceSource};
use crate::market::{
    CollectionConfig, CollectionRegistry, LendingPlatform, LoanState, Marketplace,
    NormalizedOffer, OwnLoan, SubmitResult,
};
use crate::model::{MarketData, VolatilityEstimator};
use crate::risk::{
    LiquidationAction, LiquidationThresholds, LoanPosition, LoanStatus, PendingCommitments,
    PortfolioStats, RiskAlert, RiskManager,
};
use crate::strategy::{OfferDetails, StrategyRecommendation, StrategySelector};
use crate::telemetry::{self, CounterMetric, GaugeMetric};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An offer live on a marketplace
#[derive(Debug, Clone, Serialize)]
pub struct PublishedOffer {
    pub collection: String,
    pub marketplace: Marketplace,
    pub offer_id: String,
    pub offer: NormalizedOffer,
}

/// A sendable recommendation that was not published
#[derive(Debug, Clone, Serialize)]
pub struct OfferDenial {
    pub collection: String,
    pub marketplace: Marketplace,
    pub amount: Decimal,
    pub reason: String,
}

/// Liquidation decision for one of our loans
#[derive(Debug, Clone, Serialize)]
pub struct LiquidationNotice {
    pub offer_id: String,
    pub marketplace: Marketplace,
    pub collection: String,
    pub action: LiquidationAction,
}

/// Everything a cycle decided
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Loans newly registered from marketplace state
    pub registered: usize,
    /// Loans moved to a terminal status
    pub closed: usize,
    pub recommendations: Vec<StrategyRecommendation>,
    pub published: Vec<PublishedOffer>,
    /// Open offers from earlier cycles left live because their terms still hold
    pub retained: usize,
    /// Open offers withdrawn because their terms are no longer recommended
    pub cancelled: Vec<String>,
    /// Vetoed by risk limits or marketplace balance
    pub denials: Vec<OfferDenial>,
    /// Refused by the marketplace
    pub rejections: Vec<OfferDenial>,
    pub liquidations: Vec<LiquidationNotice>,
    pub stats: PortfolioStats,
    pub alerts: Vec<RiskAlert>,
}

/// Our loans and offers as the marketplaces reported them
#[derive(Default)]
struct OwnBook {
    /// Taken loans
    active: Vec<(Arc<dyn LendingPlatform>, OwnLoan)>,
    /// Published offers no borrower has taken yet
    open: Vec<(Arc<dyn LendingPlatform>, OwnLoan)>,
}

/// Whether an open offer carries the terms of a recommendation
fn same_terms(offer: &OwnLoan, details: &OfferDetails) -> bool {
    let wanted = NormalizedOffer::new(
        offer.collection_address.clone(),
        details.amount,
        details.apr,
        details.duration_days,
    );
    offer.principal == wanted.loan_amount
        && offer.apr == wanted.apr()
        && offer
            .duration_days
            .map_or(true, |days| days == wanted.duration_days)
}

/// Terminal ledger status for a marketplace loan state
fn terminal_status(state: LoanState) -> Option<LoanStatus> {
    match state {
        LoanState::Repaid => Some(LoanStatus::Repaid),
        LoanState::Liquidated => Some(LoanStatus::Liquidated),
        LoanState::Defaulted => Some(LoanStatus::Defaulted),
        _ => None,
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Runs reconcile, refresh, liquidation checks, evaluation and publication
pub struct EvaluationCycle {
    selector: StrategySelector,
    estimator: VolatilityEstimator,
    registry: CollectionRegistry,
    thresholds: LiquidationThresholds,
    platforms: Vec<Arc<dyn LendingPlatform>>,
    prices: Arc<dyn PriceSource>,
    risk: Arc<Mutex<RiskManager>>,
}

impl EvaluationCycle {
    pub fn new(
        config: &Config,
        platforms: Vec<Arc<dyn LendingPlatform>>,
        prices: Arc<dyn PriceSource>,
        risk: Arc<Mutex<RiskManager>>,
    ) -> Self {
        Self {
            selector: StrategySelector::new(
                crate::model::LoanPricer::new(config.pricing),
                config.strategy.clone(),
            ),
            estimator: VolatilityEstimator::new(config.volatility.clone()),
            registry: config.registry(),
            thresholds: config.liquidation,
            platforms,
            prices,
            risk,
        }
    }

    /// Shared handle to the ledger
    pub fn risk(&self) -> Arc<Mutex<RiskManager>> {
        Arc::clone(&self.risk)
    }

    /// Initialize platforms and the ledger, and apply per-collection caps.
    ///
    /// A platform that fails to initialize is logged and left to fail its
    /// calls later. A ledger failure is returned.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        for platform in &self.platforms {
            if let Err(e) = platform.initialize().await {
                let marketplace = platform.marketplace();
                warn!(%marketplace, error = %e, "Platform initialization failed");
                telemetry::increment(CounterMetric::CollaboratorErrors, Some(marketplace));
            }
        }

        let mut risk = self.risk.lock().await;
        if !risk.is_initialized() {
            risk.initialize().await?;
        }
        for collection in self.registry.all() {
            if let Some(cap) = collection.max_capital {
                risk.set_collection_limit(collection.slug.clone(), cap);
            }
        }
        Ok(())
    }

    fn platform(&self, marketplace: Marketplace) -> Option<&Arc<dyn LendingPlatform>> {
        self.platforms.iter().find(|p| p.marketplace() == marketplace)
    }

    fn collection_slug(&self, address: &str) -> String {
        self.registry
            .by_address(address)
            .map(|c| c.slug.clone())
            .unwrap_or_else(|| address.to_lowercase())
    }

    /// Run one cycle. Failures are contained to the affected collection or platform.
    pub async fn run(&self) -> CycleReport {
        let started = Instant::now();
        let started_at = Utc::now();
        info!(collections = self.registry.enabled().count(), "Evaluation cycle started");

        // Held for the whole cycle so admission and publication are serialized
        let mut risk = self.risk.lock().await;

        let mut report = CycleReport {
            started_at,
            registered: 0,
            closed: 0,
            recommendations: Vec::new(),
            published: Vec::new(),
            retained: 0,
            cancelled: Vec::new(),
            denials: Vec::new(),
            rejections: Vec::new(),
            liquidations: Vec::new(),
            stats: risk.portfolio_stats(),
            alerts: Vec::new(),
        };

        let book = self.reconcile(&mut risk, &mut report).await;
        let snapshots = self.refresh(&mut risk).await;
        self.check_liquidations(&book.active, &snapshots, &mut report);

        // Offers still open from earlier cycles stay committed until taken or withdrawn
        let mut pending = PendingCommitments::new();
        let mut platform_pending: HashMap<Marketplace, Decimal> = HashMap::new();
        for (platform, offer) in &book.open {
            pending.add(&self.collection_slug(&offer.collection_address), offer.principal);
            *platform_pending.entry(platform.marketplace()).or_default() += offer.principal;
        }

        for collection in self.registry.enabled() {
            let recommendations = self.evaluate(collection, snapshots.get(&collection.slug)).await;
            let live = self
                .withdraw_stale_offers(
                    collection,
                    &recommendations,
                    &book.open,
                    &mut pending,
                    &mut platform_pending,
                    &mut report,
                )
                .await;

            for (_, recommendation) in recommendations
                .iter()
                .enumerate()
                .filter(|(i, r)| r.should_send && !live.contains(i))
            {
                self.admit(
                    collection,
                    recommendation,
                    &risk,
                    &mut pending,
                    &mut platform_pending,
                    &mut report,
                )
                .await;
            }
            report.recommendations.extend(recommendations);
        }

        report.stats = risk.portfolio_stats();
        report.alerts = risk.risk_alerts();
        drop(risk);

        publish_gauges(&report);
        for alert in &report.alerts {
            warn!(%alert, "Risk alert");
        }

        let elapsed = started.elapsed();
        telemetry::record_cycle_duration(elapsed);
        info!(
            elapsed_ms = elapsed.as_millis() as u64,
            published = report.published.len(),
            retained = report.retained,
            cancelled = report.cancelled.len(),
            denied = report.denials.len(),
            registered = report.registered,
            closed = report.closed,
            deployed = %report.stats.deployed_capital,
            "Evaluation cycle finished"
        );
        report
    }

    /// Sync the ledger with marketplace state. Returns taken loans and open offers.
    async fn reconcile(&self, risk: &mut RiskManager, report: &mut CycleReport) -> OwnBook {
        let mut book = OwnBook::default();

        for platform in &self.platforms {
            let marketplace = platform.marketplace();
            let loans = match platform.own_loans().await {
                Ok(loans) => loans,
                Err(e) => {
                    warn!(%marketplace, error = %e, "Loan reconciliation failed");
                    telemetry::increment(CounterMetric::CollaboratorErrors, Some(marketplace));
                    continue;
                }
            };

            for loan in loans {
                if loan.state == LoanState::Active {
                    if risk.position(&loan.offer_id).is_none() {
                        let slug = self.collection_slug(&loan.collection_address);
                        let floor = match self.prices.latest(&slug).await {
                            Ok(snapshot) => Some(snapshot.floor),
                            Err(e) => {
                                debug!(collection = %slug, error = %e, "No floor for new loan");
                                None
                            }
                        };
                        let mut position =
                            LoanPosition::from_loan(&loan, &slug, floor.unwrap_or_default());
                        position.current_floor_price = floor;

                        match risk.register_loan(position).await {
                            Ok(()) => report.registered += 1,
                            Err(e) => {
                                let offer_id = &loan.offer_id;
                                warn!(%offer_id, error = %e, "Failed to register loan");
                            }
                        }
                    }
                    book.active.push((Arc::clone(platform), loan));
                } else if loan.state == LoanState::Open {
                    book.open.push((Arc::clone(platform), loan));
                } else if let Some(status) = terminal_status(loan.state) {
                    let is_open = risk
                        .position(&loan.offer_id)
                        .map(|p| p.is_active())
                        .unwrap_or(false);
                    if is_open {
                        match risk.update_loan_status(&loan.offer_id, status).await {
                            Ok(()) => report.closed += 1,
                            Err(e) => {
                                let offer_id = &loan.offer_id;
                                warn!(%offer_id, error = %e, "Failed to close loan");
                            }
                        }
                    }
                }
            }
        }

        book
    }

    /// Fetch latest prices and re-mark active positions
    async fn refresh(&self, risk: &mut RiskManager) -> HashMap<String, PriceSnapshot> {
        let positions: Vec<(String, String)> = risk
            .active_positions()
            .into_iter()
            .map(|p| (p.offer_id.clone(), p.collection.clone()))
            .collect();

        let slugs: BTreeSet<String> = self
            .registry
            .enabled()
            .map(|c| c.slug.clone())
            .chain(positions.iter().map(|(_, c)| c.clone()))
            .collect();

        let mut snapshots = HashMap::new();
        for slug in slugs {
            match self.prices.latest(&slug).await {
                Ok(snapshot) => {
                    snapshots.insert(slug, snapshot);
                }
                Err(e) => {
                    warn!(collection = %slug, error = %e, "Price lookup failed");
                    telemetry::increment(CounterMetric::CollaboratorErrors, None);
                }
            }
        }

        for (offer_id, collection) in positions {
            let Some(snapshot) = snapshots.get(&collection) else {
                continue;
            };
            if let Err(e) = risk
                .update_floor_price(&offer_id, snapshot.floor, Some(snapshot.bid))
                .await
            {
                warn!(%offer_id, error = %e, "Failed to update floor price");
            }
        }

        snapshots
    }

    fn check_liquidations(
        &self,
        loans: &[(Arc<dyn LendingPlatform>, OwnLoan)],
        snapshots: &HashMap<String, PriceSnapshot>,
        report: &mut CycleReport,
    ) {
        let now = Utc::now();
        for (platform, loan) in loans {
            let collection = self.collection_slug(&loan.collection_address);
            let Some(snapshot) = snapshots.get(&collection) else {
                debug!(offer_id = %loan.offer_id, %collection, "No floor for liquidation check");
                continue;
            };

            let marketplace = platform.marketplace();
            let offer_id = &loan.offer_id;
            let action = platform.liquidation_check(loan, snapshot.floor, now, &self.thresholds);
            match action {
                LiquidationAction::Hold => continue,
                LiquidationAction::Warn { ltv } => {
                    warn!(%offer_id, %collection, ltv, "Loan approaching recall band");
                }
                LiquidationAction::Recall { ltv } => {
                    warn!(%offer_id, %collection, ltv, "Recall lien");
                    telemetry::increment(CounterMetric::LiquidationActions, Some(marketplace));
                }
                LiquidationAction::Liquidate { overdue_hours } => {
                    warn!(%offer_id, %collection, overdue_hours, "Loan past due, foreclose");
                    telemetry::increment(CounterMetric::LiquidationActions, Some(marketplace));
                }
            }

            report.liquidations.push(LiquidationNotice {
                offer_id: loan.offer_id.clone(),
                marketplace: platform.marketplace(),
                collection,
                action,
            });
        }
    }

    /// Price history to volatility to recommendations for one collection
    async fn evaluate(
        &self,
        collection: &CollectionConfig,
        snapshot: Option<&PriceSnapshot>,
    ) -> Vec<StrategyRecommendation> {
        let Some(snapshot) = snapshot else {
            return vec![StrategyRecommendation::insufficient_data(&collection.slug, 0)];
        };

        let lookback = self.selector.config().lookback_days;
        let history = match self.prices.history(&collection.slug, lookback).await {
            Ok(history) => history,
            Err(e) => {
                warn!(collection = %collection.slug, error = %e, "Price history lookup failed");
                telemetry::increment(CounterMetric::CollaboratorErrors, None);
                Vec::new()
            }
        };

        let volatility = self.estimator.estimate(&history);
        if volatility.is_insufficient() {
            info!(
                collection = %collection.slug,
                points = history.len(),
                "Insufficient price history"
            );
            return vec![StrategyRecommendation::insufficient_data(
                &collection.slug,
                volatility.sample_size,
            )];
        }
        telemetry::set_volatility(&collection.slug, volatility.annualized);

        let market = MarketData::new(
            to_f64(snapshot.floor),
            to_f64(snapshot.bid),
            volatility.annualized,
        );
        debug!(
            collection = %collection.slug,
            floor = market.floor_price,
            bid = market.top_bid,
            volatility = market.volatility,
            "Evaluating collection"
        );

        self.selector.evaluate(collection, &market, &self.platforms).await
    }

    /// Keep open offers that match a sendable recommendation and withdraw the rest.
    ///
    /// Returns the indices of recommendations already live on a marketplace.
    /// A failed withdrawal leaves the offer committed.
    async fn withdraw_stale_offers(
        &self,
        collection: &CollectionConfig,
        recommendations: &[StrategyRecommendation],
        open: &[(Arc<dyn LendingPlatform>, OwnLoan)],
        pending: &mut PendingCommitments,
        platform_pending: &mut HashMap<Marketplace, Decimal>,
        report: &mut CycleReport,
    ) -> HashSet<usize> {
        let mut live = HashSet::new();
        let ours = open
            .iter()
            .filter(|(_, offer)| {
                self.collection_slug(&offer.collection_address) == collection.slug
            });

        for (platform, offer) in ours {
            let marketplace = platform.marketplace();
            let matched = recommendations.iter().enumerate().find(|(i, r)| {
                r.should_send
                    && !live.contains(i)
                    && r.platform == Some(marketplace)
                    && r.offer_details.as_ref().is_some_and(|d| same_terms(offer, d))
            });
            if let Some((i, _)) = matched {
                live.insert(i);
                report.retained += 1;
                debug!(
                    collection = %collection.slug,
                    offer_id = %offer.offer_id,
                    "Open offer still current"
                );
                continue;
            }

            match platform.cancel_offer(&offer.offer_id).await {
                Ok(()) => {
                    pending.remove(&collection.slug, offer.principal);
                    if let Some(committed) = platform_pending.get_mut(&marketplace) {
                        *committed = (*committed - offer.principal).max(Decimal::ZERO);
                    }
                    telemetry::increment(CounterMetric::OffersCancelled, Some(marketplace));
                    info!(
                        collection = %collection.slug,
                        %marketplace,
                        offer_id = %offer.offer_id,
                        amount = %offer.principal,
                        "Stale offer withdrawn"
                    );
                    report.cancelled.push(offer.offer_id.clone());
                }
                Err(e) => {
                    warn!(
                        offer_id = %offer.offer_id,
                        %marketplace,
                        error = %e,
                        "Offer withdrawal failed"
                    );
                    telemetry::increment(CounterMetric::CollaboratorErrors, Some(marketplace));
                }
            }
        }

        live
    }

    /// Admit one sendable recommendation and publish it
    async fn admit(
        &self,
        collection: &CollectionConfig,
        recommendation: &StrategyRecommendation,
        risk: &RiskManager,
        pending: &mut PendingCommitments,
        platform_pending: &mut HashMap<Marketplace, Decimal>,
        report: &mut CycleReport,
    ) {
        let (Some(marketplace), Some(details)) =
            (recommendation.platform, recommendation.offer_details.as_ref())
        else {
            return;
        };
        let Some(platform) = self.platform(marketplace) else {
            return;
        };
        let amount = details.amount;

        let deny = |reason: String| OfferDenial {
            collection: collection.slug.clone(),
            marketplace,
            amount,
            reason,
        };

        if let Err(e) = risk.can_allocate_with_pending(&collection.slug, amount, pending) {
            info!(
                collection = %collection.slug,
                %marketplace,
                amount = %amount,
                reason = %e,
                "Allocation denied"
            );
            telemetry::increment(CounterMetric::AllocationDenials, Some(marketplace));
            report.denials.push(deny(e.to_string()));
            return;
        }

        let committed = platform_pending.get(&marketplace).copied().unwrap_or_default();
        match platform.balance().await {
            Ok(balance) if balance - committed >= amount => {}
            Ok(balance) => {
                let reason = format!(
                    "marketplace balance {} ETH ({} ETH committed) below {} ETH",
                    balance, committed, amount
                );
                info!(collection = %collection.slug, %marketplace, %reason, "Allocation denied");
                telemetry::increment(CounterMetric::AllocationDenials, Some(marketplace));
                report.denials.push(deny(reason));
                return;
            }
            Err(e) => {
                warn!(%marketplace, error = %e, "Balance query failed");
                telemetry::increment(CounterMetric::CollaboratorErrors, Some(marketplace));
                return;
            }
        }

        let offer = NormalizedOffer::new(
            collection.address.clone(),
            amount,
            details.apr,
            details.duration_days,
        );
        match platform.submit_offer(offer.clone()).await {
            Ok(SubmitResult::Accepted { offer_id }) => {
                pending.add(&collection.slug, amount);
                *platform_pending.entry(marketplace).or_default() += amount;
                telemetry::increment(CounterMetric::OffersPublished, Some(marketplace));
                info!(
                    collection = %collection.slug,
                    %marketplace,
                    %offer_id,
                    amount = %amount,
                    apr_bps = offer.apr_bps,
                    duration_days = offer.duration_days,
                    "Offer published"
                );
                report.published.push(PublishedOffer {
                    collection: collection.slug.clone(),
                    marketplace,
                    offer_id,
                    offer,
                });
            }
            Ok(SubmitResult::Rejected { error }) => {
                warn!(collection = %collection.slug, %marketplace, %error, "Offer rejected");
                telemetry::increment(CounterMetric::OffersRejected, Some(marketplace));
                report.rejections.push(deny(error));
            }
            Err(e) => {
                warn!(
                    collection = %collection.slug,
                    %marketplace,
                    error = %e,
                    "Offer submission failed"
                );
                telemetry::increment(CounterMetric::CollaboratorErrors, Some(marketplace));
            }
        }
    }
}

fn publish_gauges(report: &CycleReport) {
    let stats = &report.stats;
    telemetry::set_gauge(GaugeMetric::DeployedCapital, to_f64(stats.deployed_capital));
    telemetry::set_gauge(GaugeMetric::AvailableCapital, to_f64(stats.available_capital));
    telemetry::set_gauge(GaugeMetric::Utilization, to_f64(stats.utilization_rate));
    telemetry::set_gauge(GaugeMetric::AtRiskCapital, to_f64(stats.at_risk_capital));
    telemetry::set_gauge(GaugeMetric::ActiveLoans, stats.active_loans as f64);
    telemetry::set_gauge(GaugeMetric::RiskAlerts, report.alerts.len() as f64);
}
