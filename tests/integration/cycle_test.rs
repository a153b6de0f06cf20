//! Evaluation cycles over paper marketplaces with Parquet-backed data

use chrono::{Duration, TimeZone, Utc};
use nft_lender::config::Config;
use nft_lender::data::{write_price_records, ParquetPositionStore, ParquetPriceSource, PriceRecord};
use nft_lender::engine::EvaluationCycle;
use nft_lender::market::{
    CollectionConfig, LendingPlatform, LoanState, MarketOffer, Marketplace, PaperPlatform,
};
use nft_lender::risk::{LiquidationAction, LoanStatus, RiskLimits, RiskManager};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::Mutex;

const AZUKI: &str = "0xed5af388653567af2f388e6224dc7c4b3241c544";

/// Sixty days of gently oscillating floors ending at floor 10, bid 9.8
fn write_history(path: &Path) {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let mut records: Vec<PriceRecord> = (0..59)
        .map(|i| PriceRecord {
            timestamp: start + Duration::days(i),
            collection: "azuki".to_string(),
            floor_price: Decimal::try_from(10.0 * (1.0 + 0.02 * (i as f64).sin())).unwrap(),
            top_bid: None,
        })
        .collect();
    records.push(PriceRecord {
        timestamp: start + Duration::days(59),
        collection: "azuki".to_string(),
        floor_price: dec!(10),
        top_bid: Some(dec!(9.8)),
    });
    write_price_records(path, &records).unwrap();
}

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.data.positions_path = dir.join("positions.parquet");
    config.data.price_history_path = dir.join("prices.parquet");
    config.strategy.durations = vec![30];
    config.risk = RiskLimits {
        max_capital_eth: dec!(50),
        max_exposure_per_collection: dec!(20),
        ..RiskLimits::default()
    };
    config.collections = vec![CollectionConfig::new("azuki", AZUKI)];
    config
}

fn book() -> Vec<MarketOffer> {
    vec![MarketOffer {
        duration_days: 30,
        best_apr_decimal: dec!(0.35),
        best_apr_amount: dec!(4),
        best_principal_amount: dec!(5),
        best_principal_apr_decimal: dec!(0.45),
    }]
}

async fn build(config: &Config, platform: Arc<PaperPlatform>) -> EvaluationCycle {
    let prices = Arc::new(ParquetPriceSource::open(&config.data.price_history_path).unwrap());
    let store = Arc::new(ParquetPositionStore::open(&config.data.positions_path).unwrap());
    let risk = Arc::new(Mutex::new(RiskManager::new(config.risk.clone(), store)));
    let platforms: Vec<Arc<dyn LendingPlatform>> = vec![platform];

    let cycle = EvaluationCycle::new(config, platforms, prices, risk);
    cycle.initialize().await.unwrap();
    cycle
}

#[tokio::test]
async fn test_loan_lifecycle_survives_restart() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    write_history(&config.data.price_history_path);

    let gondi = Arc::new(PaperPlatform::new(Marketplace::Gondi, dec!(100)));
    gondi.set_offers(AZUKI, book()).await;
    let cycle = build(&config, gondi.clone()).await;

    let report = cycle.run().await;
    assert_eq!(report.published.len(), 2);
    let taken = report.published[1].offer_id.clone();
    assert_eq!(report.published[1].offer.loan_amount, dec!(5));

    gondi.accept_offer(&taken).await.unwrap();
    let report = cycle.run().await;
    assert_eq!(report.registered, 1);
    assert_eq!(report.stats.deployed_capital, dec!(5));
    assert_eq!(report.stats.exposure_by_collection.get("azuki"), Some(&dec!(5)));

    // A fresh ledger over the same snapshot sees the loan
    let store = Arc::new(ParquetPositionStore::open(&config.data.positions_path).unwrap());
    let mut restarted = RiskManager::new(config.risk.clone(), store);
    assert_eq!(restarted.initialize().await.unwrap(), 1);
    assert_eq!(restarted.deployed_capital(), dec!(5));

    gondi.close_loan(&taken, LoanState::Repaid).await.unwrap();
    let report = cycle.run().await;
    assert_eq!(report.closed, 1);
    assert_eq!(report.stats.deployed_capital, Decimal::ZERO);

    let risk = cycle.risk();
    let risk = risk.lock().await;
    assert_eq!(risk.position(&taken).unwrap().status, LoanStatus::Repaid);
}

#[tokio::test]
async fn test_underwater_lien_is_recalled() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    write_history(&config.data.price_history_path);

    let blend = Arc::new(PaperPlatform::new(Marketplace::Blend, dec!(100)));
    blend.set_offers(AZUKI, book()).await;
    let cycle = build(&config, blend.clone()).await;

    let report = cycle.run().await;
    assert_eq!(report.published.len(), 1);
    assert_eq!(report.published[0].offer.loan_amount, dec!(4));
    let lien = report.published[0].offer_id.clone();

    blend.accept_offer(&lien).await.unwrap();
    let report = cycle.run().await;
    assert_eq!(report.registered, 1);
    assert!(report.liquidations.is_empty());

    blend.set_remaining_balance(&lien, dec!(9.1)).await.unwrap();
    let report = cycle.run().await;
    assert_eq!(report.liquidations.len(), 1);
    assert_eq!(report.liquidations[0].offer_id, lien);
    assert!(matches!(
        report.liquidations[0].action,
        LiquidationAction::Recall { .. }
    ));
}

#[tokio::test]
async fn test_platform_balance_limits_publication() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    write_history(&config.data.price_history_path);

    let gondi = Arc::new(PaperPlatform::new(Marketplace::Gondi, dec!(6)));
    gondi.set_offers(AZUKI, book()).await;
    let cycle = build(&config, gondi).await;

    let report = cycle.run().await;
    assert_eq!(report.published.len(), 1);
    assert_eq!(report.denials.len(), 1);
    assert!(report.denials[0].reason.contains("balance"));
}

#[tokio::test]
async fn test_restart_counts_offers_already_open() {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.risk.max_exposure_per_collection = dec!(9);
    write_history(&config.data.price_history_path);

    let gondi = Arc::new(PaperPlatform::new(Marketplace::Gondi, dec!(100)));
    gondi.set_offers(AZUKI, book()).await;

    let cycle = build(&config, gondi.clone()).await;
    assert_eq!(cycle.run().await.published.len(), 2);
    drop(cycle);

    // The restarted engine only learns about its offers from the marketplace
    let cycle = build(&config, gondi.clone()).await;
    for _ in 0..2 {
        let report = cycle.run().await;
        assert!(report.published.is_empty());
        assert_eq!(report.retained, 2);
    }

    let open: Decimal = gondi
        .own_loans()
        .await
        .unwrap()
        .iter()
        .filter(|l| l.state == LoanState::Open)
        .map(|l| l.principal)
        .sum();
    assert_eq!(open, dec!(9));
}
