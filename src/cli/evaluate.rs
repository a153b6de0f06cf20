//! Evaluate command implementation

use super::OutputFormat;
use crate::config::Config;
use crate::data::{ParquetPositionStore, ParquetPriceSource};
use crate::engine::{CycleReport, EvaluationCycle};
use crate::market::{LendingPlatform, PaperBook, PaperPlatform};
use crate::risk::RiskManager;
use anyhow::Context;
use clap::Args;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Number of cycles to run
    #[arg(long, default_value = "1")]
    pub cycles: u32,

    /// Seconds between cycles
    #[arg(long, default_value = "300")]
    pub interval: u64,

    /// Simulate borrowers taking every published offer
    #[arg(long)]
    pub fill_offers: bool,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

/// Load the paper marketplace books
fn load_books(path: &Path) -> anyhow::Result<Vec<PaperBook>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read paper books from {}", path.display()))?;
    let books: Vec<PaperBook> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid paper books in {}", path.display()))?;
    Ok(books)
}

impl EvaluateArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        if config.collections.is_empty() {
            anyhow::bail!("No collections configured");
        }

        let prices = Arc::new(ParquetPriceSource::open(&config.data.price_history_path)?);
        let store = Arc::new(ParquetPositionStore::open(&config.data.positions_path)?);
        let paper: Vec<Arc<PaperPlatform>> = load_books(&config.data.paper_books_path)?
            .into_iter()
            .map(|book| Arc::new(PaperPlatform::from_book(book)))
            .collect();
        let platforms: Vec<Arc<dyn LendingPlatform>> = paper
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn LendingPlatform>)
            .collect();

        let risk = Arc::new(Mutex::new(RiskManager::new(config.risk.clone(), store)));
        let cycle = EvaluationCycle::new(config, platforms, prices, risk);
        cycle.initialize().await?;

        let mut ticker = tokio::time::interval(Duration::from_secs(self.interval.max(1)));
        for n in 1..=self.cycles {
            ticker.tick().await;
            tracing::info!(cycle = n, of = self.cycles, "Running evaluation cycle");

            let report = cycle.run().await;
            self.format.emit(&report, print_report)?;

            if self.fill_offers {
                for offer in &report.published {
                    let platform = paper.iter().find(|p| p.marketplace() == offer.marketplace);
                    if let Some(platform) = platform {
                        platform.accept_offer(&offer.offer_id).await?;
                    }
                }
            }
        }

        Ok(())
    }
}

fn print_report(report: &CycleReport) {
    println!("Cycle started {}", report.started_at.to_rfc3339());
    println!(
        "  Reconciled: {} registered, {} closed",
        report.registered, report.closed
    );
    println!(
        "  Open offers: {} kept, {} withdrawn",
        report.retained,
        report.cancelled.len()
    );

    println!("Recommendations");
    for rec in &report.recommendations {
        let venue = rec
            .platform
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        match (&rec.offer_details, rec.should_send) {
            (Some(d), true) => println!(
                "  SEND {:<20} {:<6} {:<14} {:>9} ETH {:>6.2}% {:>3}d ltv {:.1}%",
                rec.collection,
                venue,
                d.offer_type.to_string(),
                d.amount,
                d.apr * rust_decimal::Decimal::ONE_HUNDRED,
                d.duration_days,
                d.ltv * 100.0
            ),
            _ => println!("  SKIP {:<20} {:<6} {}", rec.collection, venue, rec.reason),
        }
    }

    if !report.published.is_empty() {
        println!("Published");
        for p in &report.published {
            println!(
                "  {:<20} {:<6} {} ({} ETH, {} bps, {}d)",
                p.collection,
                p.marketplace,
                p.offer_id,
                p.offer.loan_amount,
                p.offer.apr_bps,
                p.offer.duration_days
            );
        }
    }
    for d in report.denials.iter().chain(&report.rejections) {
        println!(
            "  DENIED {:<18} {:<6} {} ETH: {}",
            d.collection, d.marketplace, d.amount, d.reason
        );
    }
    for l in &report.liquidations {
        println!("  LIQUIDATION {} {} {:?}", l.marketplace, l.offer_id, l.action);
    }

    super::status::print_stats(&report.stats, &report.alerts);
}
