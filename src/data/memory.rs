//! In-memory collaborators

use super::{PositionStore, PriceSnapshot, PriceSource};
use crate::model::PricePoint;
use crate::risk::{LoanPosition, LoanStatus};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Position store held in memory
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: RwLock<HashMap<String, LoanPosition>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored position regardless of status
    pub async fn all(&self) -> Vec<LoanPosition> {
        self.positions.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn upsert(&self, position: &LoanPosition) -> anyhow::Result<()> {
        let mut positions = self.positions.write().await;
        positions.insert(position.offer_id.clone(), position.clone());
        Ok(())
    }

    async fn update_status(&self, offer_id: &str, status: LoanStatus) -> anyhow::Result<()> {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(offer_id)
            .ok_or_else(|| anyhow::anyhow!("No stored position {}", offer_id))?;
        position.status = status;
        Ok(())
    }

    async fn load_active(&self) -> anyhow::Result<Vec<LoanPosition>> {
        let positions = self.positions.read().await;
        Ok(positions.values().filter(|p| p.is_active()).cloned().collect())
    }
}

#[derive(Default)]
struct CollectionPrices {
    latest: Option<PriceSnapshot>,
    history: Vec<PricePoint>,
}

/// Price source fed by the caller
#[derive(Default)]
pub struct InMemoryPriceSource {
    prices: RwLock<HashMap<String, CollectionPrices>>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_latest(&self, slug: &str, snapshot: PriceSnapshot) {
        let mut prices = self.prices.write().await;
        prices.entry(slug.to_string()).or_default().latest = Some(snapshot);
    }

    /// Replace the daily history, kept sorted by date
    pub async fn set_history(&self, slug: &str, mut history: Vec<PricePoint>) {
        history.sort_by_key(|p| p.date);
        let mut prices = self.prices.write().await;
        prices.entry(slug.to_string()).or_default().history = history;
    }
}

/// Points within `lookback_days` of the most recent one
pub(crate) fn within_lookback(history: &[PricePoint], lookback_days: u32) -> Vec<PricePoint> {
    let Some(last) = history.last() else {
        return Vec::new();
    };
    let cutoff = last.date - Duration::days(lookback_days as i64);
    history.iter().filter(|p| p.date > cutoff).cloned().collect()
}

#[async_trait]
impl PriceSource for InMemoryPriceSource {
    async fn latest(&self, slug: &str) -> anyhow::Result<PriceSnapshot> {
        let prices = self.prices.read().await;
        prices
            .get(slug)
            .and_then(|p| p.latest)
            .ok_or_else(|| anyhow::anyhow!("No price for {}", slug))
    }

    async fn history(&self, slug: &str, lookback_days: u32) -> anyhow::Result<Vec<PricePoint>> {
        let prices = self.prices.read().await;
        Ok(prices
            .get(slug)
            .map(|p| within_lookback(&p.history, lookback_days))
            .unwrap_or_default())
    }
}
