//! Prometheus metrics

use crate::market::Marketplace;
use std::time::Duration;

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Principal in active loans
    DeployedCapital,
    /// Capital still lendable
    AvailableCapital,
    /// Deployed share of total capital
    Utilization,
    /// Principal in loans with liquidation risk above 0.5
    AtRiskCapital,
    /// Active loan count
    ActiveLoans,
    /// Outstanding risk alerts
    RiskAlerts,
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::DeployedCapital => "nftlender_deployed_capital_eth",
            GaugeMetric::AvailableCapital => "nftlender_available_capital_eth",
            GaugeMetric::Utilization => "nftlender_utilization_ratio",
            GaugeMetric::AtRiskCapital => "nftlender_at_risk_capital_eth",
            GaugeMetric::ActiveLoans => "nftlender_active_loans",
            GaugeMetric::RiskAlerts => "nftlender_risk_alerts",
        }
    }
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    /// Offers accepted by a marketplace
    OffersPublished,
    /// Offers the marketplace refused
    OffersRejected,
    /// Stale offers withdrawn
    OffersCancelled,
    /// Candidates vetoed by the risk manager
    AllocationDenials,
    /// Recall or liquidation actions raised
    LiquidationActions,
    /// Collaborator calls that failed
    CollaboratorErrors,
}

impl CounterMetric {
    fn name(self) -> &'static str {
        match self {
            CounterMetric::OffersPublished => "nftlender_offers_published_total",
            CounterMetric::OffersRejected => "nftlender_offers_rejected_total",
            CounterMetric::OffersCancelled => "nftlender_offers_cancelled_total",
            CounterMetric::AllocationDenials => "nftlender_allocation_denials_total",
            CounterMetric::LiquidationActions => "nftlender_liquidation_actions_total",
            CounterMetric::CollaboratorErrors => "nftlender_collaborator_errors_total",
        }
    }
}

/// Set a portfolio gauge
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Set the annualized volatility estimate for a collection
pub fn set_volatility(collection: &str, value: f64) {
    metrics::gauge!("nftlender_collection_volatility", "collection" => collection.to_string())
        .set(value);
}

/// Increment a counter, labelled by marketplace when one applies
pub fn increment(metric: CounterMetric, marketplace: Option<Marketplace>) {
    match marketplace {
        Some(m) => metrics::counter!(metric.name(), "marketplace" => m.to_string()).increment(1),
        None => metrics::counter!(metric.name()).increment(1),
    }
}

/// Record how long an evaluation cycle took
pub fn record_cycle_duration(duration: Duration) {
    metrics::histogram!("nftlender_cycle_duration_seconds").record(duration.as_secs_f64());
}
