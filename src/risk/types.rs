//! Risk management types

use super::LoanStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Risk management errors
#[derive(Debug, Error)]
pub enum RiskError {
    /// Positions have not been loaded from the store yet
    #[error("Risk manager not initialized")]
    NotInitialized,
    #[error("Insufficient capital: requested {requested} ETH, available {available} ETH")]
    InsufficientCapital {
        requested: Decimal,
        available: Decimal,
    },
    #[error("Utilization {projected} would exceed {max}")]
    UtilizationExceeded { projected: Decimal, max: Decimal },
    /// Lending would eat into the capital held back as reserve
    #[error("Reserve breached: {remaining} ETH would remain, {required} ETH required")]
    ReserveBreached { remaining: Decimal, required: Decimal },
    #[error("Exposure to {collection} would reach {projected} ETH, limit {limit} ETH")]
    CollectionExposureExceeded {
        collection: String,
        projected: Decimal,
        limit: Decimal,
    },
    #[error("{collection} already has {count} active loans (max {max})")]
    CollectionLoanLimit {
        collection: String,
        count: usize,
        max: usize,
    },
    #[error("{count} active loans (max {max})")]
    ActiveLoanLimit { count: usize, max: usize },
    #[error("At-risk capital {at_risk} ETH exceeds {limit} ETH")]
    AtRiskCapitalExceeded { at_risk: Decimal, limit: Decimal },
    #[error("Unknown position: {0}")]
    PositionNotFound(String),
    #[error("Position {offer_id} cannot move from {from} to {to}")]
    InvalidTransition {
        offer_id: String,
        from: LoanStatus,
        to: LoanStatus,
    },
    #[error("Non-positive reference price {price} for position {offer_id}")]
    InvalidPrice { offer_id: String, price: Decimal },
    /// Persistence failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RiskError {
    /// Whether this is a limit denial rather than a fault
    pub fn is_limit_denial(&self) -> bool {
        matches!(
            self,
            RiskError::InsufficientCapital { .. }
                | RiskError::UtilizationExceeded { .. }
                | RiskError::ReserveBreached { .. }
                | RiskError::CollectionExposureExceeded { .. }
                | RiskError::CollectionLoanLimit { .. }
                | RiskError::ActiveLoanLimit { .. }
                | RiskError::AtRiskCapitalExceeded { .. }
        )
    }
}

/// Portfolio snapshot
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PortfolioStats {
    pub total_capital: Decimal,
    pub deployed_capital: Decimal,
    pub available_capital: Decimal,
    pub utilization_rate: Decimal,
    pub active_loans: usize,
    /// Outstanding principal per collection slug
    pub exposure_by_collection: std::collections::BTreeMap<String, Decimal>,
    /// Simple mean of active APRs
    pub average_apr: Decimal,
    /// Interest over full terms of active loans
    pub expected_return: Decimal,
    pub at_risk_capital: Decimal,
}

/// Condition worth an operator's attention
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskAlert {
    HighUtilization { utilization: Decimal, max: Decimal },
    AtRiskCapital { at_risk: Decimal, limit: Decimal },
    CollectionConcentration {
        collection: String,
        exposure: Decimal,
        limit: Decimal,
    },
    PositionAtRisk {
        offer_id: String,
        collection: String,
        liquidation_risk: f64,
    },
}

impl std::fmt::Display for RiskAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskAlert::HighUtilization { utilization, max } => {
                write!(f, "utilization {:.4} near limit {}", utilization, max)
            }
            RiskAlert::AtRiskCapital { at_risk, limit } => {
                write!(f, "at-risk capital {} ETH near limit {} ETH", at_risk, limit)
            }
            RiskAlert::CollectionConcentration {
                collection,
                exposure,
                limit,
            } => write!(
                f,
                "{} exposure {} ETH near limit {} ETH",
                collection, exposure, limit
            ),
            RiskAlert::PositionAtRisk {
                offer_id,
                collection,
                liquidation_risk,
            } => write!(
                f,
                "{} loan {} liquidation risk {:.2}",
                collection, offer_id, liquidation_risk
            ),
        }
    }
}
