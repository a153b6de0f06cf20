//! Risk management module
//!
//! Capital limits, the loan position ledger and liquidation checks

mod limits;
mod liquidation;
mod manager;
mod position;
mod types;

pub use limits::RiskLimits;
pub use liquidation::{evaluate_liquidation, LiquidationAction, LiquidationThresholds};
pub use manager::{PendingCommitments, RiskManager};
pub use position::{liquidation_risk, liquidation_risk_for, LoanPosition, LoanStatus};
pub use types::{PortfolioStats, RiskAlert, RiskError};
