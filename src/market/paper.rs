//! Paper lending platform
//!
//! In-memory marketplace with a static competing-offer book and simulated
//! borrower activity. Used for dry runs and tests.

use super::{
    LendingPlatform, LoanState, MarketOffer, Marketplace, NormalizedOffer, OwnLoan, SubmitResult,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Competing offers for one collection
#[derive(Debug, Clone, Deserialize)]
pub struct PaperCollectionBook {
    pub collection_address: String,
    #[serde(default)]
    pub offers: Vec<MarketOffer>,
}

/// Serialized description of a paper marketplace
#[derive(Debug, Clone, Deserialize)]
pub struct PaperBook {
    pub marketplace: Marketplace,
    pub balance: Decimal,
    #[serde(default)]
    pub collections: Vec<PaperCollectionBook>,
}

/// Paper lending platform with simulated fills
pub struct PaperPlatform {
    marketplace: Marketplace,
    starting_balance: Decimal,
    initialized: AtomicBool,
    books: Arc<RwLock<HashMap<String, Vec<MarketOffer>>>>,
    loans: Arc<RwLock<HashMap<String, OwnLoan>>>,
}

impl PaperPlatform {
    /// Create an empty paper platform
    pub fn new(marketplace: Marketplace, balance: Decimal) -> Self {
        Self {
            marketplace,
            starting_balance: balance,
            initialized: AtomicBool::new(false),
            books: Arc::new(RwLock::new(HashMap::new())),
            loans: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a paper platform from a serialized book
    pub fn from_book(book: PaperBook) -> Self {
        let books = book
            .collections
            .into_iter()
            .map(|c| (c.collection_address.to_lowercase(), c.offers))
            .collect();

        Self {
            books: Arc::new(RwLock::new(books)),
            ..Self::new(book.marketplace, book.balance)
        }
    }

    /// Replace the competing offers shown for a collection
    pub async fn set_offers(&self, collection_address: &str, offers: Vec<MarketOffer>) {
        let mut books = self.books.write().await;
        books.insert(collection_address.to_lowercase(), offers);
    }

    /// Simulate a borrower taking one of our open offers
    pub async fn accept_offer(&self, offer_id: &str) -> anyhow::Result<()> {
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown offer {}", offer_id))?;

        if loan.state != LoanState::Open {
            anyhow::bail!("Offer {} is not open ({:?})", offer_id, loan.state);
        }

        loan.state = LoanState::Active;
        loan.start_time = Utc::now();
        tracing::info!(offer_id, marketplace = %self.marketplace, "Paper offer taken");
        Ok(())
    }

    /// Simulate a loan closing in the given state
    pub async fn close_loan(&self, offer_id: &str, state: LoanState) -> anyhow::Result<()> {
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown offer {}", offer_id))?;
        loan.state = state;
        Ok(())
    }

    /// Simulate interest accrual on an open-ended lien
    pub async fn set_remaining_balance(
        &self,
        offer_id: &str,
        balance: Decimal,
    ) -> anyhow::Result<()> {
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown offer {}", offer_id))?;
        loan.remaining_balance = balance;
        Ok(())
    }

    fn ensure_initialized(&self) -> anyhow::Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            anyhow::bail!("{} platform not initialized", self.marketplace);
        }
        Ok(())
    }
}

#[async_trait]
impl LendingPlatform for PaperPlatform {
    fn marketplace(&self) -> Marketplace {
        self.marketplace
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.initialized.store(true, Ordering::Release);
        tracing::info!(marketplace = %self.marketplace, "Paper platform initialized");
        Ok(())
    }

    async fn balance(&self) -> anyhow::Result<Decimal> {
        self.ensure_initialized()?;
        let loans = self.loans.read().await;
        let lent: Decimal = loans
            .values()
            .filter(|l| l.state == LoanState::Active)
            .map(|l| l.principal)
            .sum();
        Ok(self.starting_balance - lent)
    }

    async fn supports(&self, collection_address: &str) -> bool {
        let books = self.books.read().await;
        books.contains_key(&collection_address.to_lowercase())
    }

    async fn market_offers(&self, collection_address: &str) -> anyhow::Result<Vec<MarketOffer>> {
        self.ensure_initialized()?;
        let books = self.books.read().await;
        Ok(books
            .get(&collection_address.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn submit_offer(&self, offer: NormalizedOffer) -> anyhow::Result<SubmitResult> {
        self.ensure_initialized()?;
        let policy = self.policy();

        if offer.loan_amount < policy.min_amount {
            return Ok(SubmitResult::Rejected {
                error: format!(
                    "amount {} below marketplace minimum {}",
                    offer.loan_amount, policy.min_amount
                ),
            });
        }
        if offer.apr() < policy.min_apr {
            return Ok(SubmitResult::Rejected {
                error: format!("apr {} below marketplace minimum {}", offer.apr(), policy.min_apr),
            });
        }

        let offer_id = Uuid::new_v4().to_string();
        let loan = OwnLoan {
            offer_id: offer_id.clone(),
            marketplace: self.marketplace,
            collection_address: offer.collection_address.to_lowercase(),
            principal: offer.loan_amount,
            remaining_balance: offer.loan_amount,
            apr: offer.apr(),
            duration_days: (!policy.open_ended).then_some(offer.duration_days),
            start_time: Utc::now(),
            state: LoanState::Open,
        };

        let mut loans = self.loans.write().await;
        loans.insert(offer_id.clone(), loan);

        tracing::info!(
            offer_id = %offer_id,
            marketplace = %self.marketplace,
            amount = %offer.loan_amount,
            apr_bps = offer.apr_bps,
            "Paper offer published"
        );
        Ok(SubmitResult::Accepted { offer_id })
    }

    async fn cancel_offer(&self, offer_id: &str) -> anyhow::Result<()> {
        self.ensure_initialized()?;
        let mut loans = self.loans.write().await;
        let loan = loans
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown offer {}", offer_id))?;

        if loan.state != LoanState::Open {
            anyhow::bail!("Offer {} is not open ({:?})", offer_id, loan.state);
        }

        loan.state = LoanState::Cancelled;
        tracing::info!(offer_id, marketplace = %self.marketplace, "Paper offer cancelled");
        Ok(())
    }

    async fn own_loans(&self) -> anyhow::Result<Vec<OwnLoan>> {
        self.ensure_initialized()?;
        let loans = self.loans.read().await;
        Ok(loans.values().cloned().collect())
    }
}
