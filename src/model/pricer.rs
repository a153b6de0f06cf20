//! Option-theoretic loan pricer
//!
//! Treats a collection loan as a written put on the floor price and derives
//! the break-even APR from the put premium plus an illiquidity surcharge.

use super::black_scholes::black_scholes_put;
use super::volatility::DAYS_PER_YEAR;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Margin applied on top of the break-even APR
pub const RECOMMENDED_APR_MARGIN: f64 = 1.15;

/// APRs at or above this are never viable
pub const MAX_VIABLE_APR: f64 = 2.0;

/// Spread above which the spot price leans towards the bid
const WIDE_SPREAD: f64 = 0.10;

/// Pricing parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Annual risk-free rate
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Annual surcharge for holding illiquid collateral
    #[serde(default = "default_liquidity_premium")]
    pub liquidity_premium: f64,
    /// Multiplier applied to the input volatility
    #[serde(default = "default_safety_multiplier")]
    pub safety_multiplier: f64,
    /// APR undercut applied against the best competing offer
    #[serde(default = "default_min_spread_below_best")]
    pub min_spread_below_best: f64,
}

fn default_risk_free_rate() -> f64 {
    0.05
}
fn default_liquidity_premium() -> f64 {
    0.03
}
fn default_safety_multiplier() -> f64 {
    1.15
}
fn default_min_spread_below_best() -> f64 {
    0.01
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            liquidity_premium: default_liquidity_premium(),
            safety_multiplier: default_safety_multiplier(),
            min_spread_below_best: default_min_spread_below_best(),
        }
    }
}

/// The pricer's view of one collection's market
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Lowest ask
    pub floor_price: f64,
    /// Midpoint of floor and top bid
    pub middle_price: f64,
    /// Highest collection bid
    pub top_bid: f64,
    /// Annualized volatility before the safety multiplier
    pub volatility: f64,
    /// `(floor - bid) / floor`
    pub spread: f64,
}

impl MarketData {
    /// Build market data from floor, bid and annualized volatility
    pub fn new(floor_price: f64, top_bid: f64, volatility: f64) -> Self {
        let spread = if floor_price > 0.0 {
            (floor_price - top_bid) / floor_price
        } else {
            0.0
        };
        Self {
            floor_price,
            middle_price: (floor_price + top_bid) / 2.0,
            top_bid,
            volatility,
            spread,
        }
    }
}

/// Intermediates kept for auditing a price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingDetails {
    /// Blended floor and bid the put is written on
    pub spot: f64,
    /// Loan amount, the strike of the put
    pub strike: f64,
    /// Loan duration in years
    pub time_to_expiry: f64,
    /// Black-Scholes d1
    pub d1: f64,
    /// Black-Scholes d2
    pub d2: f64,
    /// Volatility after the safety multiplier
    pub sigma: f64,
    /// Loan amount over spot
    pub ltv: f64,
    /// Highest LTV allowed for this spread and volatility
    pub max_ltv: f64,
}

/// Outcome of pricing one candidate loan
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    /// LTV within the cap and break-even APR below the viability ceiling
    pub is_viable: bool,
    /// Break-even APR
    pub min_apr: f64,
    /// Break-even APR with the recommended margin on top
    pub recommended_apr: f64,
    /// Put value in ETH
    pub put_premium: f64,
    /// Interest earned at the recommended APR over the term
    pub expected_profit: f64,
    /// Whole principal
    pub max_loss: f64,
    /// Floor at which the collateral just covers principal net of interest
    pub break_even_floor: f64,
    /// Informational 0-100 score
    pub risk_score: u32,
    /// Intermediates behind the figures above
    pub details: PricingDetails,
}

/// Inputs the pricer refuses to price
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PricingError {
    #[error("loan amount must be positive, got {0}")]
    NonPositiveAmount(f64),
    #[error("spot price must be positive, got {0}")]
    NonPositiveSpot(f64),
    #[error("volatility must be positive, got {0}")]
    NonPositiveVolatility(f64),
}

/// Prices collection loans
#[derive(Debug, Clone, Default)]
pub struct LoanPricer {
    config: PricingConfig,
}

impl LoanPricer {
    /// Create a new pricer
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    /// Pricing parameters in use
    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Volatility after the safety multiplier
    pub fn adjusted_volatility(&self, market: &MarketData) -> f64 {
        market.volatility * self.config.safety_multiplier
    }

    /// Price a loan of `loan_amount` ETH for `duration_days`
    pub fn price_loan(
        &self,
        market: &MarketData,
        loan_amount: f64,
        duration_days: u32,
    ) -> Result<PricingResult, PricingError> {
        if !(loan_amount > 0.0 && loan_amount.is_finite()) {
            return Err(PricingError::NonPositiveAmount(loan_amount));
        }
        if !(market.volatility > 0.0 && market.volatility.is_finite()) {
            return Err(PricingError::NonPositiveVolatility(market.volatility));
        }
        let spot = spot_price(market);
        if !(spot > 0.0 && spot.is_finite()) {
            return Err(PricingError::NonPositiveSpot(spot));
        }

        let time_years = duration_days as f64 / DAYS_PER_YEAR;
        let sigma = self.adjusted_volatility(market);

        let put = black_scholes_put(
            spot,
            loan_amount,
            time_years,
            self.config.risk_free_rate,
            sigma,
        );

        let total_premium =
            put.premium + loan_amount * self.config.liquidity_premium * time_years;
        let min_apr = if time_years > 0.0 {
            total_premium / (loan_amount * time_years)
        } else {
            0.0
        };
        let recommended_apr = min_apr * RECOMMENDED_APR_MARGIN;

        let ltv = loan_amount / spot;
        let max_ltv = calculate_max_ltv(market.spread, sigma);
        let is_viable = ltv <= max_ltv && min_apr < MAX_VIABLE_APR;

        let expected_profit = loan_amount * recommended_apr * time_years;

        Ok(PricingResult {
            is_viable,
            min_apr,
            recommended_apr,
            put_premium: put.premium,
            expected_profit,
            max_loss: loan_amount,
            break_even_floor: loan_amount - expected_profit,
            risk_score: risk_score(ltv, sigma, duration_days),
            details: PricingDetails {
                spot,
                strike: loan_amount,
                time_to_expiry: time_years,
                d1: put.d1,
                d2: put.d2,
                sigma,
                ltv,
                max_ltv,
            },
        })
    }
}

/// Blend floor and bid into the spot price used for pricing.
///
/// Tight books use the midpoint; wide books lean towards the bid, up to
/// fully on the bid at a 50% spread.
pub fn spot_price(market: &MarketData) -> f64 {
    if market.spread < WIDE_SPREAD {
        return (market.floor_price + market.top_bid) / 2.0;
    }
    let bid_weight = 0.85 + 0.15 * ((market.spread - WIDE_SPREAD) / 0.40).min(1.0);
    bid_weight * market.top_bid + (1.0 - bid_weight) * market.floor_price
}

/// Maximum LTV allowed for a given spread and adjusted volatility
pub fn calculate_max_ltv(spread: f64, sigma: f64) -> f64 {
    let spread_penalty = (spread * 0.5).min(0.15);
    let volatility_penalty = (sigma * 0.1).min(0.10);
    (0.80 - spread_penalty - volatility_penalty).max(0.30)
}

/// 0-100 score from LTV, adjusted volatility and duration
pub fn risk_score(ltv: f64, sigma: f64, duration_days: u32) -> u32 {
    let duration_factor = (duration_days as f64 / 90.0).min(1.0);
    let raw = (ltv * 40.0 + sigma * 30.0 + duration_factor * 30.0).round();
    raw.clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_market() -> MarketData {
        MarketData::new(10.0, 9.8, 0.30)
    }

    #[test]
    fn test_market_data_spread() {
        let market = scenario_market();
        assert!((market.spread - 0.02).abs() < 1e-12);
        assert!((market.middle_price - 9.9).abs() < 1e-12);
    }

    #[test]
    fn test_spot_tight_spread_is_midpoint() {
        assert!((spot_price(&scenario_market()) - 9.9).abs() < 1e-12);
    }

    #[test]
    fn test_spot_wide_spread_leans_to_bid() {
        // 30% spread: weight = 0.85 + 0.15 * 0.5 = 0.925
        let market = MarketData::new(10.0, 7.0, 0.5);
        let expected = 0.925 * 7.0 + 0.075 * 10.0;
        assert!((spot_price(&market) - expected).abs() < 1e-12);

        // Beyond 50% spread the bid carries full weight
        let market = MarketData::new(10.0, 4.0, 0.5);
        assert!((spot_price(&market) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_ltv_penalties_and_floor() {
        assert!((calculate_max_ltv(0.0, 0.0) - 0.80).abs() < 1e-12);
        assert!((calculate_max_ltv(0.02, 0.345) - (0.80 - 0.01 - 0.0345)).abs() < 1e-12);
        assert!((calculate_max_ltv(1.0, 5.0) - 0.55).abs() < 1e-12);
        assert!(calculate_max_ltv(1.0, 5.0) >= 0.30);
    }

    #[test]
    fn test_scenario_small_loan_is_viable() {
        let pricer = LoanPricer::default();
        let result = pricer.price_loan(&scenario_market(), 3.0, 30).unwrap();

        assert!(result.is_viable);
        assert_eq!(result.max_loss, 3.0);
        assert!(result.risk_score <= 100);
        assert!((result.recommended_apr - result.min_apr * 1.15).abs() < 1e-4);
        // Far out of the money: the liquidity surcharge dominates
        assert!((result.min_apr - 0.03).abs() < 1e-3);
        assert!((result.details.sigma - 0.345).abs() < 1e-12);
    }

    #[test]
    fn test_scenario_high_ltv_is_not_viable() {
        let pricer = LoanPricer::default();
        let result = pricer.price_loan(&scenario_market(), 9.0, 30).unwrap();
        assert!(!result.is_viable);
    }

    #[test]
    fn test_ltv_above_85_pct_never_viable() {
        let pricer = LoanPricer::default();
        for vol in [0.05, 0.3, 1.0, 3.0] {
            for bid in [9.99, 9.5, 8.0] {
                let market = MarketData::new(10.0, bid, vol);
                let spot = spot_price(&market);
                for days in [1, 7, 30, 90] {
                    let result = pricer.price_loan(&market, spot * 0.86, days).unwrap();
                    assert!(!result.is_viable);
                }
            }
        }
    }

    #[test]
    fn test_expected_profit_and_break_even() {
        let pricer = LoanPricer::default();
        let result = pricer.price_loan(&scenario_market(), 3.0, 30).unwrap();
        let t = 30.0 / 365.0;
        assert!((result.expected_profit - 3.0 * result.recommended_apr * t).abs() < 1e-12);
        assert!((result.break_even_floor - (3.0 - result.expected_profit)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_duration_has_zero_min_apr() {
        let pricer = LoanPricer::default();
        let result = pricer.price_loan(&scenario_market(), 3.0, 0).unwrap();
        assert_eq!(result.min_apr, 0.0);
        assert_eq!(result.put_premium, 0.0);
    }

    #[test]
    fn test_min_apr_rises_with_volatility() {
        let pricer = LoanPricer::default();
        let calm = pricer
            .price_loan(&MarketData::new(10.0, 9.8, 0.3), 6.0, 30)
            .unwrap();
        let wild = pricer
            .price_loan(&MarketData::new(10.0, 9.8, 1.5), 6.0, 30)
            .unwrap();
        assert!(wild.min_apr > calm.min_apr);
        assert!(wild.risk_score > calm.risk_score);
    }

    #[test]
    fn test_preconditions_are_rejected() {
        let pricer = LoanPricer::default();
        let market = scenario_market();

        assert_eq!(
            pricer.price_loan(&market, 0.0, 30),
            Err(PricingError::NonPositiveAmount(0.0))
        );
        assert!(matches!(
            pricer.price_loan(&MarketData::new(10.0, 9.8, 0.0), 3.0, 30),
            Err(PricingError::NonPositiveVolatility(_))
        ));
        assert!(matches!(
            pricer.price_loan(&MarketData::new(0.0, 0.0, 0.3), 3.0, 30),
            Err(PricingError::NonPositiveSpot(_))
        ));
    }

    #[test]
    fn test_risk_score_bounds() {
        assert_eq!(risk_score(0.0, 0.0, 0), 0);
        assert_eq!(risk_score(1.0, 1.0, 90), 100);
        assert_eq!(risk_score(2.0, 5.0, 365), 100);
    }
}
