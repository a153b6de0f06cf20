//! Volatility command implementation

use super::OutputFormat;
use crate::config::Config;
use crate::data::{ParquetPriceSource, PriceSource};
use crate::model::{VolatilityEstimator, VolatilityResult};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct VolatilityArgs {
    /// Collection slug; every collection in the file when omitted
    #[arg(long)]
    pub collection: Option<String>,

    /// Price history file (overrides data.price_history_path)
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Days of history to use (overrides strategy.lookback_days)
    #[arg(long)]
    pub lookback: Option<u32>,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct CollectionVolatility {
    collection: String,
    points: usize,
    #[serde(flatten)]
    result: VolatilityResult,
}

impl VolatilityArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let path = self
            .history
            .clone()
            .unwrap_or_else(|| config.data.price_history_path.clone());
        let source = ParquetPriceSource::open(&path)?;
        let lookback = self.lookback.unwrap_or(config.strategy.lookback_days);
        let estimator = VolatilityEstimator::new(config.volatility.clone());

        let mut slugs: Vec<String> = match &self.collection {
            Some(slug) => vec![slug.clone()],
            None => source.collections().map(str::to_string).collect(),
        };
        slugs.sort();

        let mut rows = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let history = source.history(&slug, lookback).await?;
            let result = estimator.estimate(&history);
            if result.is_insufficient() {
                tracing::warn!(
                    collection = %slug,
                    points = history.len(),
                    "Insufficient price history"
                );
            }
            rows.push(CollectionVolatility {
                collection: slug,
                points: history.len(),
                result,
            });
        }

        self.format.emit(&rows, |rows| print_table(rows))
    }
}

fn print_table(rows: &[CollectionVolatility]) {
    println!(
        "{:<24} {:>6} {:>10} {:>10} {:>10} {:>12} {:>7}",
        "collection", "points", "daily", "ewma", "30d", "annualized", "lambda"
    );
    for row in rows {
        let r = &row.result;
        if r.is_insufficient() {
            println!("{:<24} {:>6} {:>10}", row.collection, row.points, "insufficient");
            continue;
        }
        println!(
            "{:<24} {:>6} {:>9.2}% {:>9.2}% {:>9.2}% {:>11.2}% {:>7.2}",
            row.collection,
            row.points,
            r.daily * 100.0,
            r.ewma * 100.0,
            r.rolling30d * 100.0,
            r.annualized * 100.0,
            r.lambda
        );
    }
}
