//! Data module
//!
//! Price and position collaborators, with in-memory and Parquet backends

mod memory;
mod parquet;

pub use self::parquet::{
    position_schema, price_schema, read_positions, read_price_records, write_positions,
    write_price_records, ParquetPositionStore, ParquetPriceSource, PriceRecord,
};
pub use memory::{InMemoryPositionStore, InMemoryPriceSource};

use crate::model::PricePoint;
use crate::risk::{LoanPosition, LoanStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

/// Latest market prices for a collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub floor: Decimal,
    pub bid: Decimal,
    pub mid: Decimal,
}

impl PriceSnapshot {
    /// Build a snapshot, deriving the mid price
    pub fn new(floor: Decimal, bid: Decimal) -> Self {
        Self {
            floor,
            bid,
            mid: (floor + bid) / Decimal::TWO,
        }
    }
}

/// Source of collection prices
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest floor, top bid and mid price
    async fn latest(&self, slug: &str) -> anyhow::Result<PriceSnapshot>;

    /// Daily mid prices over the lookback window, oldest first
    async fn history(&self, slug: &str, lookback_days: u32) -> anyhow::Result<Vec<PricePoint>>;
}

/// Durable storage for loan positions
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Insert or replace a position by offer id
    async fn upsert(&self, position: &LoanPosition) -> anyhow::Result<()>;

    /// Set the status of a stored position
    async fn update_status(&self, offer_id: &str, status: LoanStatus) -> anyhow::Result<()>;

    /// Positions still holding capital
    async fn load_active(&self) -> anyhow::Result<Vec<LoanPosition>>;
}
