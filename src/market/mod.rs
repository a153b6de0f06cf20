//! Lending marketplace module
//!
//! Marketplace identities, offer snapshots and the platform trait each
//! marketplace integration implements.

mod paper;
mod policy;
mod registry;

pub use paper::{PaperBook, PaperCollectionBook, PaperPlatform};
pub use policy::MarketplacePolicy;
pub use registry::{CollectionConfig, CollectionRegistry};

use crate::risk::{evaluate_liquidation, LiquidationAction, LiquidationThresholds};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported lending marketplaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marketplace {
    /// Fixed-term peer-to-pool collection offers
    Gondi,
    /// Perpetual, lender-recallable liens
    Blend,
    /// Fixed-term peer-to-peer offers
    Nftfi,
}

impl Marketplace {
    /// Every supported marketplace
    pub const ALL: [Marketplace; 3] = [Marketplace::Gondi, Marketplace::Blend, Marketplace::Nftfi];

    /// Offer rules for this marketplace
    pub fn policy(self) -> MarketplacePolicy {
        MarketplacePolicy::for_marketplace(self)
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marketplace::Gondi => "gondi",
            Marketplace::Blend => "blend",
            Marketplace::Nftfi => "nftfi",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Marketplace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gondi" => Ok(Marketplace::Gondi),
            "blend" => Ok(Marketplace::Blend),
            "nftfi" => Ok(Marketplace::Nftfi),
            other => anyhow::bail!("Unknown marketplace: {}", other),
        }
    }
}

/// Best competing terms visible on one marketplace for one duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOffer {
    pub duration_days: u32,
    /// Lowest APR on offer
    pub best_apr_decimal: Decimal,
    /// Principal of the lowest-APR offer
    pub best_apr_amount: Decimal,
    /// Largest principal on offer
    pub best_principal_amount: Decimal,
    /// APR of the largest-principal offer
    pub best_principal_apr_decimal: Decimal,
}

/// A marketplace-neutral offer ready for publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedOffer {
    pub collection_address: String,
    pub loan_amount: Decimal,
    /// APR in basis points
    pub apr_bps: u32,
    pub duration_days: u32,
}

impl NormalizedOffer {
    /// Build an offer, converting a decimal APR to basis points
    pub fn new(
        collection_address: impl Into<String>,
        loan_amount: Decimal,
        apr: Decimal,
        duration_days: u32,
    ) -> Self {
        let apr_bps = (apr * Decimal::from(10_000)).round().to_u32().unwrap_or(0);
        Self {
            collection_address: collection_address.into(),
            loan_amount,
            apr_bps,
            duration_days,
        }
    }

    /// APR as a decimal fraction
    pub fn apr(&self) -> Decimal {
        Decimal::from(self.apr_bps) / Decimal::from(10_000)
    }
}

/// Marketplace response to an offer submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubmitResult {
    /// Offer is live
    Accepted { offer_id: String },
    /// Marketplace refused the offer
    Rejected { error: String },
}

/// Lifecycle of one of our offers as reported by a marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanState {
    /// Offer published, no borrower yet
    Open,
    /// Offer taken, loan outstanding
    Active,
    Repaid,
    Liquidated,
    Defaulted,
    /// Offer withdrawn before execution
    Cancelled,
    /// Offer lapsed before execution
    Expired,
}

/// One of our offers or loans on a marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnLoan {
    pub offer_id: String,
    pub marketplace: Marketplace,
    pub collection_address: String,
    pub principal: Decimal,
    /// Principal plus accrued interest still owed
    pub remaining_balance: Decimal,
    pub apr: Decimal,
    /// `None` for open-ended loans
    pub duration_days: Option<u32>,
    /// Execution time once taken, otherwise publication time
    pub start_time: DateTime<Utc>,
    pub state: LoanState,
}

impl OwnLoan {
    /// Contractual end of a fixed-term loan
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.duration_days
            .map(|days| self.start_time + Duration::days(days as i64))
    }
}

/// Trait for lending marketplace integrations
#[async_trait]
pub trait LendingPlatform: Send + Sync {
    /// Which marketplace this is
    fn marketplace(&self) -> Marketplace;

    /// Offer rules in force on this marketplace
    fn policy(&self) -> MarketplacePolicy {
        self.marketplace().policy()
    }

    /// Prepare the integration (auth, approvals)
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Lendable balance in ETH
    async fn balance(&self) -> anyhow::Result<Decimal>;

    /// Whether the marketplace lists the collection
    async fn supports(&self, collection_address: &str) -> bool;

    /// Best competing terms per duration for a collection
    async fn market_offers(&self, collection_address: &str) -> anyhow::Result<Vec<MarketOffer>>;

    /// Publish an offer
    async fn submit_offer(&self, offer: NormalizedOffer) -> anyhow::Result<SubmitResult>;

    /// Withdraw one of our offers that no borrower has taken
    async fn cancel_offer(&self, offer_id: &str) -> anyhow::Result<()>;

    /// Our offers and loans with their current state
    async fn own_loans(&self) -> anyhow::Result<Vec<OwnLoan>>;

    /// Decide whether an outstanding loan should be recalled or foreclosed
    fn liquidation_check(
        &self,
        loan: &OwnLoan,
        current_floor: Decimal,
        now: DateTime<Utc>,
        thresholds: &LiquidationThresholds,
    ) -> LiquidationAction {
        evaluate_liquidation(loan, current_floor, now, thresholds, self.policy().open_ended)
    }
}
