//! Offer strategy module
//!
//! Turns priced market snapshots into per-marketplace offer recommendations

mod selector;
mod types;

pub use selector::{no_competitor_apr_floor, StrategyConfig, StrategySelector};
pub use types::{MarketContext, OfferDetails, OfferType, SkipReason, StrategyRecommendation};
