//! Reference pricing, allocation and liquidation scenarios through the public API

use chrono::Utc;
use nft_lender::data::InMemoryPositionStore;
use nft_lender::market::{LendingPlatform, LoanState, Marketplace, OwnLoan, PaperPlatform};
use nft_lender::model::{LoanPricer, MarketData, RECOMMENDED_APR_MARGIN};
use nft_lender::risk::{
    LiquidationAction, LiquidationThresholds, LoanPosition, RiskError, RiskLimits, RiskManager,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn loan(marketplace: Marketplace, principal: Decimal, remaining: Decimal) -> OwnLoan {
    OwnLoan {
        offer_id: "lien-1".to_string(),
        marketplace,
        collection_address: "0xed5af388653567af2f388e6224dc7c4b3241c544".to_string(),
        principal,
        remaining_balance: remaining,
        apr: dec!(0.2),
        duration_days: match marketplace {
            Marketplace::Blend => None,
            _ => Some(30),
        },
        start_time: Utc::now(),
        state: LoanState::Active,
    }
}

#[test]
fn test_viable_loan_at_thirty_percent_ltv() {
    let pricer = LoanPricer::default();
    let market = MarketData::new(10.0, 9.8, 0.30);

    let result = pricer.price_loan(&market, 3.0, 30).unwrap();
    assert!(result.is_viable);
    assert_eq!(result.max_loss, 3.0);
    assert!(result.risk_score <= 100);
    assert!((result.recommended_apr - result.min_apr * RECOMMENDED_APR_MARGIN).abs() < 1e-4);
}

#[test]
fn test_ninety_percent_ltv_is_not_viable() {
    let pricer = LoanPricer::default();
    let market = MarketData::new(10.0, 9.8, 0.30);

    let result = pricer.price_loan(&market, 9.0, 30).unwrap();
    assert!(!result.is_viable);
}

#[tokio::test]
async fn test_collection_exposure_boundary() {
    let limits = RiskLimits {
        max_capital_eth: dec!(5),
        max_exposure_per_collection: dec!(2),
        ..RiskLimits::default()
    };
    let mut risk = RiskManager::new(limits, Arc::new(InMemoryPositionStore::new()));
    risk.initialize().await.unwrap();

    let taken = loan(Marketplace::Gondi, dec!(1.5), dec!(1.5));
    let position = LoanPosition::from_loan(&taken, "azuki", dec!(10));
    risk.register_loan(position).await.unwrap();

    let denied = risk.can_allocate_capital("azuki", dec!(0.6)).unwrap_err();
    assert!(matches!(denied, RiskError::CollectionExposureExceeded { .. }));
    risk.can_allocate_capital("azuki", dec!(0.5)).unwrap();
}

#[test]
fn test_lien_at_ninety_one_percent_is_recalled() {
    let blend = PaperPlatform::new(Marketplace::Blend, dec!(20));
    let lien = loan(Marketplace::Blend, dec!(8), dec!(9.1));

    let action = blend.liquidation_check(
        &lien,
        dec!(10.0),
        Utc::now(),
        &LiquidationThresholds::default(),
    );
    match action {
        LiquidationAction::Recall { ltv } => assert!((ltv - 0.91).abs() < 1e-9),
        other => panic!("expected recall, got {:?}", other),
    }
}

#[test]
fn test_fixed_term_loans_are_never_recalled_on_ltv() {
    let gondi = PaperPlatform::new(Marketplace::Gondi, dec!(20));
    let loan = loan(Marketplace::Gondi, dec!(9.1), dec!(9.1));

    let action = gondi.liquidation_check(
        &loan,
        dec!(10.0),
        Utc::now(),
        &LiquidationThresholds::default(),
    );
    assert_eq!(action, LiquidationAction::Hold);
}
