//! Black-Scholes European put
//!
//! A lender holding NFT collateral is short a put struck at the loan amount:
//! premium = K*e^(-rT)*N(-d2) - S*N(-d1)

use serde::{Deserialize, Serialize};

/// Below this time to expiry (in years) the put is valued at intrinsic
pub const MIN_TIME_TO_EXPIRY: f64 = 0.001;

/// Put value together with its intermediates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PutValuation {
    /// Put premium, never negative
    pub premium: f64,
    pub d1: f64,
    pub d2: f64,
}

/// Price a European put.
///
/// `time_years` below [`MIN_TIME_TO_EXPIRY`], or a non-positive `sigma`,
/// collapses to intrinsic value `max(0, K - S)`.
pub fn black_scholes_put(
    spot: f64,
    strike: f64,
    time_years: f64,
    rate: f64,
    sigma: f64,
) -> PutValuation {
    if time_years < MIN_TIME_TO_EXPIRY || sigma <= 0.0 {
        return PutValuation {
            premium: (strike - spot).max(0.0),
            d1: 0.0,
            d2: 0.0,
        };
    }

    let sigma_sqrt_t = sigma * time_years.sqrt();
    let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * time_years) / sigma_sqrt_t;
    let d2 = d1 - sigma_sqrt_t;

    let premium =
        strike * (-rate * time_years).exp() * normal_cdf(-d2) - spot * normal_cdf(-d1);

    PutValuation {
        premium: premium.max(0.0),
        d1,
        d2,
    }
}

/// Standard normal CDF approximation (Abramowitz and Stegun 7.1.26)
pub fn normal_cdf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs() / std::f64::consts::SQRT_2;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    0.5 * (1.0 + sign * y)
}
