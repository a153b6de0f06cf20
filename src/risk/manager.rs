//! Capital ledger and allocation checks

use super::{
    liquidation_risk_for, LoanPosition, LoanStatus, PortfolioStats, RiskAlert, RiskError,
    RiskLimits,
};
use crate::data::PositionStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Liquidation risk above which a position's capital counts as at risk
const AT_RISK_THRESHOLD: f64 = 0.5;
/// Share of a limit at which alerts start firing
const ALERT_FRACTION: Decimal = dec!(0.9);
/// Liquidation risk at which a single position raises an alert
const POSITION_ALERT_RISK: f64 = 0.8;

/// Capital admitted during a cycle but not yet executed on a marketplace
#[derive(Debug, Clone, Default)]
pub struct PendingCommitments {
    by_collection: HashMap<String, (Decimal, usize)>,
}

impl PendingCommitments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admitted offer
    pub fn add(&mut self, collection: &str, amount: Decimal) {
        let entry = self
            .by_collection
            .entry(collection.to_string())
            .or_insert((Decimal::ZERO, 0));
        entry.0 += amount;
        entry.1 += 1;
    }

    /// Release a commitment that will no longer execute
    pub fn remove(&mut self, collection: &str, amount: Decimal) {
        let Some(entry) = self.by_collection.get_mut(collection) else {
            return;
        };
        entry.0 = (entry.0 - amount).max(Decimal::ZERO);
        entry.1 = entry.1.saturating_sub(1);
        if entry.1 == 0 {
            self.by_collection.remove(collection);
        }
    }

    pub fn total(&self) -> Decimal {
        self.by_collection.values().map(|(amount, _)| *amount).sum()
    }

    pub fn count(&self) -> usize {
        self.by_collection.values().map(|(_, count)| *count).sum()
    }

    pub fn collection_amount(&self, collection: &str) -> Decimal {
        self.by_collection
            .get(collection)
            .map(|(amount, _)| *amount)
            .unwrap_or_default()
    }

    pub fn collection_count(&self, collection: &str) -> usize {
        self.by_collection
            .get(collection)
            .map(|(_, count)| *count)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_collection.is_empty()
    }
}

/// Single-writer ledger of loan positions.
///
/// Owns every position it has seen, keyed by offer id. Capital figures are
/// derived from active positions on demand, so repaying or liquidating a
/// loan releases its capital immediately.
pub struct RiskManager {
    limits: RiskLimits,
    collection_limits: HashMap<String, Decimal>,
    positions: HashMap<String, LoanPosition>,
    store: Arc<dyn PositionStore>,
    initialized: bool,
}

impl RiskManager {
    /// Create a manager backed by the given store
    pub fn new(limits: RiskLimits, store: Arc<dyn PositionStore>) -> Self {
        Self {
            limits,
            collection_limits: HashMap::new(),
            positions: HashMap::new(),
            store,
            initialized: false,
        }
    }

    /// Load active positions from the store. Returns how many were loaded.
    pub async fn initialize(&mut self) -> Result<usize, RiskError> {
        let active = self.store.load_active().await?;
        let count = active.len();
        for position in active {
            self.positions.insert(position.offer_id.clone(), position);
        }
        self.initialized = true;
        info!(
            positions = count,
            deployed = %self.deployed_capital(),
            "Risk manager initialized"
        );
        Ok(count)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Override the exposure limit for one collection
    pub fn set_collection_limit(&mut self, collection: impl Into<String>, max_exposure: Decimal) {
        self.collection_limits.insert(collection.into(), max_exposure);
    }

    /// Exposure limit in force for a collection
    pub fn exposure_limit(&self, collection: &str) -> Decimal {
        self.collection_limits
            .get(collection)
            .copied()
            .unwrap_or(self.limits.max_exposure_per_collection)
    }

    fn active(&self) -> impl Iterator<Item = &LoanPosition> {
        self.positions.values().filter(|p| p.is_active())
    }

    pub fn deployed_capital(&self) -> Decimal {
        self.active().map(|p| p.loan_amount).sum()
    }

    pub fn available_capital(&self) -> Decimal {
        self.limits.max_capital_eth - self.deployed_capital()
    }

    pub fn collection_exposure(&self, collection: &str) -> Decimal {
        self.active()
            .filter(|p| p.collection == collection)
            .map(|p| p.loan_amount)
            .sum()
    }

    pub fn collection_loan_count(&self, collection: &str) -> usize {
        self.active().filter(|p| p.collection == collection).count()
    }

    pub fn active_loan_count(&self) -> usize {
        self.active().count()
    }

    /// Principal in active loans whose liquidation risk exceeds 0.5
    pub fn at_risk_capital(&self) -> Decimal {
        self.active()
            .filter(|p| p.liquidation_risk > AT_RISK_THRESHOLD)
            .map(|p| p.loan_amount)
            .sum()
    }

    pub fn position(&self, offer_id: &str) -> Option<&LoanPosition> {
        self.positions.get(offer_id)
    }

    /// Active positions, oldest first
    pub fn active_positions(&self) -> Vec<&LoanPosition> {
        let mut positions: Vec<_> = self.active().collect();
        positions.sort_by_key(|p| p.start_date);
        positions
    }

    /// Check whether a new loan fits every limit
    pub fn can_allocate_capital(&self, collection: &str, amount: Decimal) -> Result<(), RiskError> {
        self.can_allocate_with_pending(collection, amount, &PendingCommitments::default())
    }

    /// Check a new loan with same-cycle admissions counted as deployed.
    ///
    /// Checks run in a fixed order and the first failure is returned.
    pub fn can_allocate_with_pending(
        &self,
        collection: &str,
        amount: Decimal,
        pending: &PendingCommitments,
    ) -> Result<(), RiskError> {
        if !self.initialized {
            return Err(RiskError::NotInitialized);
        }

        let max_capital = self.limits.max_capital_eth;
        let deployed = self.deployed_capital() + pending.total();
        let available = max_capital - deployed;

        if amount > available {
            return Err(RiskError::InsufficientCapital {
                requested: amount,
                available: available.max(Decimal::ZERO),
            });
        }

        if max_capital > Decimal::ZERO {
            let projected = (deployed + amount) / max_capital;
            if projected > self.limits.max_utilization_rate {
                return Err(RiskError::UtilizationExceeded {
                    projected,
                    max: self.limits.max_utilization_rate,
                });
            }
        }

        let remaining = available - amount;
        let required = self.limits.required_reserve();
        if remaining < required {
            return Err(RiskError::ReserveBreached {
                remaining,
                required,
            });
        }

        let limit = self.exposure_limit(collection);
        let projected =
            self.collection_exposure(collection) + pending.collection_amount(collection) + amount;
        if projected > limit {
            return Err(RiskError::CollectionExposureExceeded {
                collection: collection.to_string(),
                projected,
                limit,
            });
        }

        let count = self.collection_loan_count(collection) + pending.collection_count(collection);
        if count >= self.limits.max_loans_per_collection {
            return Err(RiskError::CollectionLoanLimit {
                collection: collection.to_string(),
                count,
                max: self.limits.max_loans_per_collection,
            });
        }

        let count = self.active_loan_count() + pending.count();
        if count >= self.limits.max_active_loan {
            return Err(RiskError::ActiveLoanLimit {
                count,
                max: self.limits.max_active_loan,
            });
        }

        let at_risk = self.at_risk_capital();
        let limit = self.limits.at_risk_limit();
        if at_risk > limit {
            return Err(RiskError::AtRiskCapitalExceeded { at_risk, limit });
        }

        debug!(collection, amount = %amount, "Allocation approved");
        Ok(())
    }

    /// Record an executed loan and persist it
    pub async fn register_loan(&mut self, mut position: LoanPosition) -> Result<(), RiskError> {
        if !self.initialized {
            return Err(RiskError::NotInitialized);
        }
        position.liquidation_risk = position.liquidation_risk.clamp(0.0, 1.0);

        self.store.upsert(&position).await?;
        info!(
            offer_id = %position.offer_id,
            collection = %position.collection,
            marketplace = %position.marketplace,
            amount = %position.loan_amount,
            apr = %position.apr,
            "Loan registered"
        );
        self.positions.insert(position.offer_id.clone(), position);
        Ok(())
    }

    /// Re-mark a position against the latest floor. Returns the new liquidation risk.
    ///
    /// The top bid is the reference price when present, otherwise the floor.
    pub async fn update_floor_price(
        &mut self,
        offer_id: &str,
        current_floor: Decimal,
        top_bid: Option<Decimal>,
    ) -> Result<f64, RiskError> {
        let reference = match top_bid {
            Some(bid) if bid > Decimal::ZERO => bid,
            _ => current_floor,
        };

        let position = self
            .positions
            .get_mut(offer_id)
            .ok_or_else(|| RiskError::PositionNotFound(offer_id.to_string()))?;

        if reference <= Decimal::ZERO {
            return Err(RiskError::InvalidPrice {
                offer_id: offer_id.to_string(),
                price: reference,
            });
        }

        let risk = liquidation_risk_for(position.loan_amount, reference);
        position.current_floor_price = Some(current_floor);
        position.liquidation_risk = risk;
        let snapshot = position.clone();

        self.store.upsert(&snapshot).await?;
        if risk > AT_RISK_THRESHOLD {
            warn!(offer_id, risk, floor = %current_floor, "Position at risk");
        }
        Ok(risk)
    }

    /// Move an active position to a terminal status
    pub async fn update_loan_status(
        &mut self,
        offer_id: &str,
        status: LoanStatus,
    ) -> Result<(), RiskError> {
        let position = self
            .positions
            .get_mut(offer_id)
            .ok_or_else(|| RiskError::PositionNotFound(offer_id.to_string()))?;

        if position.status.is_terminal() || !status.is_terminal() {
            return Err(RiskError::InvalidTransition {
                offer_id: offer_id.to_string(),
                from: position.status,
                to: status,
            });
        }

        self.store.update_status(offer_id, status).await?;
        position.status = status;
        info!(offer_id, status = %status, amount = %position.loan_amount, "Loan closed");
        Ok(())
    }

    /// Snapshot of the current portfolio
    pub fn portfolio_stats(&self) -> PortfolioStats {
        let deployed = self.deployed_capital();
        let total = self.limits.max_capital_eth;
        let active: Vec<_> = self.active().collect();

        let mut exposure_by_collection = BTreeMap::new();
        for position in &active {
            *exposure_by_collection
                .entry(position.collection.clone())
                .or_insert(Decimal::ZERO) += position.loan_amount;
        }

        let average_apr = if active.is_empty() {
            Decimal::ZERO
        } else {
            active.iter().map(|p| p.apr).sum::<Decimal>() / Decimal::from(active.len())
        };

        PortfolioStats {
            total_capital: total,
            deployed_capital: deployed,
            available_capital: total - deployed,
            utilization_rate: if total > Decimal::ZERO {
                deployed / total
            } else {
                Decimal::ZERO
            },
            active_loans: active.len(),
            exposure_by_collection,
            average_apr,
            expected_return: active.iter().map(|p| p.expected_return()).sum(),
            at_risk_capital: self.at_risk_capital(),
        }
    }

    /// Conditions approaching or past a limit
    pub fn risk_alerts(&self) -> Vec<RiskAlert> {
        let stats = self.portfolio_stats();
        let mut alerts = Vec::new();

        let max_utilization = self.limits.max_utilization_rate;
        if stats.utilization_rate >= max_utilization * ALERT_FRACTION {
            alerts.push(RiskAlert::HighUtilization {
                utilization: stats.utilization_rate,
                max: max_utilization,
            });
        }

        let at_risk_limit = self.limits.at_risk_limit();
        if stats.at_risk_capital > Decimal::ZERO
            && stats.at_risk_capital >= at_risk_limit * ALERT_FRACTION
        {
            alerts.push(RiskAlert::AtRiskCapital {
                at_risk: stats.at_risk_capital,
                limit: at_risk_limit,
            });
        }

        for (collection, exposure) in &stats.exposure_by_collection {
            let limit = self.exposure_limit(collection);
            if *exposure > limit * ALERT_FRACTION {
                alerts.push(RiskAlert::CollectionConcentration {
                    collection: collection.clone(),
                    exposure: *exposure,
                    limit,
                });
            }
        }

        for position in self.active_positions() {
            if position.liquidation_risk >= POSITION_ALERT_RISK {
                alerts.push(RiskAlert::PositionAtRisk {
                    offer_id: position.offer_id.clone(),
                    collection: position.collection.clone(),
                    liquidation_risk: position.liquidation_risk,
                });
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryPositionStore;
    use crate::market::Marketplace;
    use chrono::{Duration, Utc};

    fn position(id: &str, collection: &str, amount: Decimal) -> LoanPosition {
        let start = Utc::now();
        LoanPosition {
            offer_id: id.to_string(),
            marketplace: Marketplace::Gondi,
            collection: collection.to_string(),
            collection_address: format!("0x{}", collection),
            loan_amount: amount,
            apr: dec!(0.2),
            duration_days: 30,
            start_date: start,
            end_date: start + Duration::days(30),
            collateral_floor_price: dec!(10),
            current_floor_price: Some(dec!(10)),
            status: LoanStatus::Active,
            liquidation_risk: 0.0,
        }
    }

    async fn manager(limits: RiskLimits) -> (RiskManager, Arc<InMemoryPositionStore>) {
        let store = Arc::new(InMemoryPositionStore::new());
        let mut manager = RiskManager::new(limits, store.clone());
        manager.initialize().await.unwrap();
        (manager, store)
    }

    fn small_limits() -> RiskLimits {
        RiskLimits {
            max_capital_eth: dec!(5),
            max_exposure_per_collection: dec!(2),
            ..RiskLimits::default()
        }
    }

    #[tokio::test]
    async fn test_rejects_before_initialize() {
        let store = Arc::new(InMemoryPositionStore::new());
        let manager = RiskManager::new(RiskLimits::default(), store);
        assert!(matches!(
            manager.can_allocate_capital("azuki", dec!(1)),
            Err(RiskError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_collection_exposure_limit() {
        let (mut manager, _) = manager(small_limits()).await;
        manager
            .register_loan(position("a", "azuki", dec!(1.5)))
            .await
            .unwrap();

        let err = manager.can_allocate_capital("azuki", dec!(0.6)).unwrap_err();
        assert!(matches!(err, RiskError::CollectionExposureExceeded { .. }));
        assert!(err.is_limit_denial());

        assert!(manager.can_allocate_capital("azuki", dec!(0.5)).is_ok());
        assert!(manager.can_allocate_capital("pudgy", dec!(0.6)).is_ok());
    }

    #[tokio::test]
    async fn test_repay_releases_capital() {
        let (mut manager, store) = manager(RiskLimits::default()).await;
        manager
            .register_loan(position("a", "azuki", dec!(2)))
            .await
            .unwrap();
        assert_eq!(manager.available_capital(), dec!(8));

        manager
            .update_loan_status("a", LoanStatus::Repaid)
            .await
            .unwrap();
        assert_eq!(manager.available_capital(), dec!(10));
        assert_eq!(manager.collection_exposure("azuki"), Decimal::ZERO);
        assert!(store.load_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_status_is_final() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        manager
            .register_loan(position("a", "azuki", dec!(1)))
            .await
            .unwrap();
        manager
            .update_loan_status("a", LoanStatus::Liquidated)
            .await
            .unwrap();

        let err = manager
            .update_loan_status("a", LoanStatus::Repaid)
            .await
            .unwrap_err();
        assert!(matches!(err, RiskError::InvalidTransition { .. }));

        let err = manager
            .update_loan_status("missing", LoanStatus::Repaid)
            .await
            .unwrap_err();
        assert!(matches!(err, RiskError::PositionNotFound(_)));
    }

    #[tokio::test]
    async fn test_amount_above_capital_always_rejected() {
        let (manager, _) = manager(RiskLimits::default()).await;
        for amount in [dec!(10.0001), dec!(11), dec!(1000)] {
            assert!(matches!(
                manager.can_allocate_capital("azuki", amount),
                Err(RiskError::InsufficientCapital { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_capital_checks_run_in_order() {
        let limits = RiskLimits {
            max_exposure_per_collection: dec!(100),
            min_reserve_ratio: dec!(0.2),
            ..RiskLimits::default()
        };
        let (manager, _) = manager(limits).await;
        assert_eq!(manager.available_capital(), dec!(10));

        // More than the whole book
        assert!(matches!(
            manager.can_allocate_capital("azuki", dec!(10.5)),
            Err(RiskError::InsufficientCapital { available, .. }) if available == dec!(10)
        ));
        // Fits the book but not 90% utilization
        assert!(matches!(
            manager.can_allocate_capital("azuki", dec!(9.5)),
            Err(RiskError::UtilizationExceeded { .. })
        ));
        // Within utilization, leaves 1.5 ETH against a 2 ETH reserve
        assert!(matches!(
            manager.can_allocate_capital("azuki", dec!(8.5)),
            Err(RiskError::ReserveBreached { remaining, required })
                if remaining == dec!(1.5) && required == dec!(2)
        ));
        assert!(manager.can_allocate_capital("azuki", dec!(8)).is_ok());
    }

    #[tokio::test]
    async fn test_default_limits_report_utilization_before_reserve() {
        let limits = RiskLimits {
            max_exposure_per_collection: dec!(100),
            ..RiskLimits::default()
        };
        let (manager, _) = manager(limits).await;

        let err = manager.can_allocate_capital("azuki", dec!(9.5)).unwrap_err();
        assert!(matches!(err, RiskError::UtilizationExceeded { .. }), "{}", err);
        assert!(err.is_limit_denial());
    }

    #[tokio::test]
    async fn test_loan_count_limits() {
        let limits = RiskLimits {
            max_loans_per_collection: 2,
            max_active_loan: 3,
            ..RiskLimits::default()
        };
        let (mut manager, _) = manager(limits).await;
        for id in ["a", "b"] {
            manager
                .register_loan(position(id, "azuki", dec!(0.1)))
                .await
                .unwrap();
        }
        assert!(matches!(
            manager.can_allocate_capital("azuki", dec!(0.1)),
            Err(RiskError::CollectionLoanLimit { count: 2, .. })
        ));

        manager
            .register_loan(position("c", "pudgy", dec!(0.1)))
            .await
            .unwrap();
        assert!(matches!(
            manager.can_allocate_capital("milady", dec!(0.1)),
            Err(RiskError::ActiveLoanLimit { count: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_pending_commitments_count_as_deployed() {
        let (manager, _) = manager(small_limits()).await;
        let mut pending = PendingCommitments::new();

        assert!(manager
            .can_allocate_with_pending("azuki", dec!(1.5), &pending)
            .is_ok());
        pending.add("azuki", dec!(1.5));

        assert!(matches!(
            manager.can_allocate_with_pending("azuki", dec!(1), &pending),
            Err(RiskError::CollectionExposureExceeded { .. })
        ));
        assert!(manager
            .can_allocate_with_pending("pudgy", dec!(1), &pending)
            .is_ok());
        assert_eq!(pending.total(), dec!(1.5));
        assert_eq!(pending.count(), 1);

        pending.remove("azuki", dec!(1.5));
        assert!(pending.is_empty());
        assert!(manager
            .can_allocate_with_pending("azuki", dec!(1), &pending)
            .is_ok());

        // Unknown collections are ignored
        pending.remove("pudgy", dec!(1));
        assert_eq!(pending.total(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_collection_override() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        manager.set_collection_limit("azuki", dec!(0.5));
        assert!(manager.can_allocate_capital("azuki", dec!(0.6)).is_err());
        assert!(manager.can_allocate_capital("pudgy", dec!(0.6)).is_ok());
    }

    #[tokio::test]
    async fn test_floor_update_and_at_risk_capital() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        manager
            .register_loan(position("a", "azuki", dec!(4)))
            .await
            .unwrap();

        // 4 / 4.2 ≈ 0.95 LTV
        let risk = manager
            .update_floor_price("a", dec!(4.2), None)
            .await
            .unwrap();
        assert!(risk > 0.5);
        assert_eq!(manager.at_risk_capital(), dec!(4));
        assert_eq!(manager.position("a").unwrap().current_floor_price, Some(dec!(4.2)));

        assert!(matches!(
            manager.can_allocate_capital("pudgy", dec!(0.5)),
            Err(RiskError::AtRiskCapitalExceeded { .. })
        ));

        let alerts = manager.risk_alerts();
        assert!(alerts
            .iter()
            .any(|a| matches!(a, RiskAlert::PositionAtRisk { .. })));
        assert!(alerts
            .iter()
            .any(|a| matches!(a, RiskAlert::AtRiskCapital { .. })));

        // A top bid above the floor lowers the effective LTV
        let risk = manager
            .update_floor_price("a", dec!(4.2), Some(dec!(8)))
            .await
            .unwrap();
        assert_eq!(risk, 0.0);
    }

    #[tokio::test]
    async fn test_floor_update_rejects_bad_input() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        assert!(matches!(
            manager.update_floor_price("x", dec!(1), None).await,
            Err(RiskError::PositionNotFound(_))
        ));
        manager
            .register_loan(position("a", "azuki", dec!(1)))
            .await
            .unwrap();
        assert!(matches!(
            manager.update_floor_price("a", Decimal::ZERO, None).await,
            Err(RiskError::InvalidPrice { .. })
        ));
    }

    #[tokio::test]
    async fn test_portfolio_stats() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        let mut second = position("b", "pudgy", dec!(1));
        second.apr = dec!(0.4);
        manager
            .register_loan(position("a", "azuki", dec!(3)))
            .await
            .unwrap();
        manager.register_loan(second).await.unwrap();

        let stats = manager.portfolio_stats();
        assert_eq!(stats.deployed_capital, dec!(4));
        assert_eq!(stats.available_capital, dec!(6));
        assert_eq!(stats.utilization_rate, dec!(0.4));
        assert_eq!(stats.active_loans, 2);
        assert_eq!(stats.average_apr, dec!(0.3));
        assert_eq!(stats.exposure_by_collection["azuki"], dec!(3));
        // (3 * 0.2 + 1 * 0.4) * 30 / 365
        assert_eq!(stats.expected_return.round_dp(6), dec!(0.082192));
    }

    #[tokio::test]
    async fn test_concentration_alert() {
        let (mut manager, _) = manager(RiskLimits::default()).await;
        manager
            .register_loan(position("a", "azuki", dec!(2.8)))
            .await
            .unwrap();
        let alerts = manager.risk_alerts();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(
            &alerts[0],
            RiskAlert::CollectionConcentration { collection, .. } if collection == "azuki"
        ));
    }

    #[tokio::test]
    async fn test_initialize_restores_active_positions() {
        let store = Arc::new(InMemoryPositionStore::new());
        let mut closed = position("b", "azuki", dec!(1));
        closed.status = LoanStatus::Repaid;
        store.upsert(&position("a", "azuki", dec!(2))).await.unwrap();
        store.upsert(&closed).await.unwrap();

        let mut manager = RiskManager::new(RiskLimits::default(), store);
        assert_eq!(manager.initialize().await.unwrap(), 1);
        assert_eq!(manager.deployed_capital(), dec!(2));
    }
}
