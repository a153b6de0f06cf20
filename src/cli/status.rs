//! Status command implementation

use super::OutputFormat;
use crate::config::Config;
use crate::data::ParquetPositionStore;
use crate::risk::{LoanPosition, PortfolioStats, RiskAlert, RiskManager};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List every active position
    #[arg(long)]
    pub positions: bool,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct Status<'a> {
    stats: PortfolioStats,
    alerts: Vec<RiskAlert>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    positions: Vec<&'a LoanPosition>,
}

impl StatusArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = Arc::new(ParquetPositionStore::open(&config.data.positions_path)?);
        let mut risk = RiskManager::new(config.risk.clone(), store);
        for collection in config.registry().all() {
            if let Some(cap) = collection.max_capital {
                risk.set_collection_limit(collection.slug.clone(), cap);
            }
        }
        risk.initialize().await?;

        let status = Status {
            stats: risk.portfolio_stats(),
            alerts: risk.risk_alerts(),
            positions: if self.positions {
                risk.active_positions()
            } else {
                Vec::new()
            },
        };

        self.format.emit(&status, |s| {
            print_stats(&s.stats, &s.alerts);
            if !s.positions.is_empty() {
                print_positions(&s.positions);
            }
        })
    }
}

pub(crate) fn print_stats(stats: &PortfolioStats, alerts: &[RiskAlert]) {
    let pct = |v: Decimal| (v * Decimal::ONE_HUNDRED).round_dp(2);
    println!("Portfolio");
    println!("  Total capital:    {} ETH", stats.total_capital);
    println!("  Deployed:         {} ETH", stats.deployed_capital);
    println!("  Available:        {} ETH", stats.available_capital);
    println!("  Utilization:      {}%", pct(stats.utilization_rate));
    println!("  Active loans:     {}", stats.active_loans);
    println!("  Average APR:      {}%", pct(stats.average_apr));
    println!("  Expected return:  {} ETH", stats.expected_return.round_dp(6));
    println!("  At-risk capital:  {} ETH", stats.at_risk_capital);
    for (collection, exposure) in &stats.exposure_by_collection {
        println!("    {:<22} {} ETH", collection, exposure);
    }

    if alerts.is_empty() {
        println!("Alerts: none");
    } else {
        println!("Alerts");
        for alert in alerts {
            println!("  ! {}", alert);
        }
    }
}

fn print_positions(positions: &[&LoanPosition]) {
    println!("Positions");
    for p in positions {
        println!(
            "  {:<38} {:<6} {:<20} {:>9} ETH {:>3}d ends {} risk {:.2}",
            p.offer_id,
            p.marketplace,
            p.collection,
            p.loan_amount,
            p.duration_days,
            p.end_date.format("%Y-%m-%d"),
            p.liquidation_risk
        );
    }
}
