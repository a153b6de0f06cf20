//! Evaluation engine
//!
//! Ties price data, volatility, strategy, risk and marketplaces together into
//! a single evaluation cycle.

mod cycle;

pub use cycle::{CycleReport, EvaluationCycle, LiquidationNotice, OfferDenial, PublishedOffer};
