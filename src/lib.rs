//! nft-lender: Options-based pricing and risk engine for NFT-collateralized lending
//!
//! This library provides the core components for:
//! - Volatility estimation from collection floor history
//! - Loan pricing as a written put on the floor price
//! - Offer selection against competing marketplace offers
//! - Portfolio risk limits and liquidation monitoring
//! - Price history and position persistence to Parquet
//! - Evaluation cycles across paper marketplaces
//! - Full observability stack

pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod market;
pub mod model;
pub mod risk;
pub mod strategy;
pub mod telemetry;
