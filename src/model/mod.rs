//! Pricing model module
//!
//! Volatility estimation and option-theoretic loan pricing

mod black_scholes;
mod pricer;
mod volatility;

pub use black_scholes::{black_scholes_put, normal_cdf, PutValuation, MIN_TIME_TO_EXPIRY};
pub use pricer::{
    calculate_max_ltv, risk_score, spot_price, LoanPricer, MarketData, PricingConfig,
    PricingDetails, PricingError, PricingResult, MAX_VIABLE_APR, RECOMMENDED_APR_MARGIN,
};
pub use volatility::{
    annualize, PricePoint, VolatilityConfig, VolatilityEstimator, VolatilityResult,
    DAYS_PER_YEAR, FALLBACK_LAMBDA,
};
