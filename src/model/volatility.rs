//! Volatility estimation module
//!
//! Realized volatility of a collection's daily mid-price: plain, EWMA and
//! rolling estimates over a lookback window.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Calendar days per year used for annualization
pub const DAYS_PER_YEAR: f64 = 365.0;

/// EWMA decay used when there are too few returns to calibrate one
pub const FALLBACK_LAMBDA: f64 = 0.94;

/// Minimum number of returns before the EWMA decay is grid-searched
const MIN_RETURNS_FOR_CALIBRATION: usize = 10;

/// One observed daily mid-price for a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Observation date
    pub date: NaiveDate,
    /// Mid-price in ETH
    pub price: Decimal,
}

impl PricePoint {
    /// Create a new price point
    pub fn new(date: NaiveDate, price: Decimal) -> Self {
        Self { date, price }
    }
}

/// Alternative volatility estimates over the same price window
///
/// `daily`, `ewma` and `rolling30d` are daily-scale; only `annualized` is
/// scaled to a year and it is the figure handed to the pricer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatilityResult {
    /// Population std of daily log returns
    pub daily: f64,
    /// Exponentially weighted daily volatility
    pub ewma: f64,
    /// Daily volatility over the most recent window
    pub rolling30d: f64,
    /// `daily` annualized with `sqrt(365)`
    pub annualized: f64,
    /// Number of log returns the estimates were computed from
    pub sample_size: usize,
    /// EWMA decay factor that was used
    pub lambda: f64,
}

impl VolatilityResult {
    /// True when there were too few returns to estimate anything.
    ///
    /// An all-zero result from a short series means "no data", not "no risk".
    pub fn is_insufficient(&self) -> bool {
        self.sample_size < 2
    }
}

/// Volatility estimator settings
#[derive(Debug, Clone, Deserialize)]
pub struct VolatilityConfig {
    /// Prices with |z-score| above this are dropped as outliers
    #[serde(default = "default_outlier_z")]
    pub outlier_z_threshold: f64,
    /// Number of most recent points used for the rolling estimate
    #[serde(default = "default_window_days")]
    pub window_days: usize,
}

fn default_outlier_z() -> f64 {
    2.0
}
fn default_window_days() -> usize {
    30
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            outlier_z_threshold: default_outlier_z(),
            window_days: default_window_days(),
        }
    }
}

/// Estimates volatility from a window of daily prices
#[derive(Debug, Clone, Default)]
pub struct VolatilityEstimator {
    config: VolatilityConfig,
}

impl VolatilityEstimator {
    /// Create a new estimator
    pub fn new(config: VolatilityConfig) -> Self {
        Self { config }
    }

    /// Compute every volatility measure for an ordered price series
    pub fn estimate(&self, points: &[PricePoint]) -> VolatilityResult {
        let prices: Vec<f64> = points
            .iter()
            .map(|p| p.price.try_into().unwrap_or(0.0))
            .collect();

        let filtered = remove_outliers(&prices, self.config.outlier_z_threshold);
        let returns = log_returns(&filtered);

        if returns.len() < 2 {
            return VolatilityResult {
                sample_size: returns.len(),
                lambda: FALLBACK_LAMBDA,
                ..Default::default()
            };
        }

        let daily = std_dev(&returns);
        let lambda = optimal_lambda(&returns);
        let ewma = ewma_volatility(&returns, lambda);

        let window = self.config.window_days;
        let rolling30d = if window >= 2 && filtered.len() >= window {
            std_dev(&log_returns(&filtered[filtered.len() - window..]))
        } else {
            daily
        };

        VolatilityResult {
            daily,
            ewma,
            rolling30d,
            annualized: annualize(daily, 1.0),
            sample_size: returns.len(),
            lambda,
        }
    }
}

/// Scale a per-period volatility to an annual one: `v * sqrt(365 / period_days)`.
///
/// A daily figure uses `period_days = 1`. A value that is already annual
/// (`period_days = 365`) comes back unchanged.
pub fn annualize(volatility: f64, period_days: f64) -> f64 {
    if period_days <= 0.0 {
        return volatility;
    }
    volatility * (DAYS_PER_YEAR / period_days).sqrt()
}

/// Drop prices whose population z-score exceeds `threshold`
fn remove_outliers(prices: &[f64], threshold: f64) -> Vec<f64> {
    if prices.len() < 3 {
        return prices.to_vec();
    }

    let n = prices.len() as f64;
    let mean = prices.iter().sum::<f64>() / n;
    let std = (prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n).sqrt();

    if std == 0.0 {
        return prices.to_vec();
    }

    prices
        .iter()
        .copied()
        .filter(|p| ((p - mean) / std).abs() <= threshold)
        .collect()
}

/// Log returns of consecutive positive prices
fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect()
}

/// Population standard deviation, zero below two samples
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Daily EWMA volatility for a given decay factor
fn ewma_volatility(returns: &[f64], lambda: f64) -> f64 {
    returns
        .iter()
        .fold(0.0, |var, r| lambda * var + (1.0 - lambda) * r * r)
        .sqrt()
}

/// Grid-search the decay factor minimising one-step-ahead forecast MSE of r²
fn optimal_lambda(returns: &[f64]) -> f64 {
    if returns.len() < MIN_RETURNS_FOR_CALIBRATION {
        return FALLBACK_LAMBDA;
    }

    let mut best_lambda = FALLBACK_LAMBDA;
    let mut best_mse = f64::INFINITY;

    for step in 80..=99 {
        let lambda = step as f64 / 100.0;
        let mut var = 0.0;
        let mut sq_err = 0.0;

        for r in returns {
            let realized = r * r;
            sq_err += (realized - var).powi(2);
            var = lambda * var + (1.0 - lambda) * realized;
        }

        let mse = sq_err / returns.len() as f64;
        if mse < best_mse {
            best_mse = mse;
            best_lambda = lambda;
        }
    }

    best_lambda
}
