//! Configuration types for nft-lender

use crate::market::{CollectionConfig, CollectionRegistry};
use crate::model::{PricingConfig, VolatilityConfig};
use crate::risk::{LiquidationThresholds, RiskLimits};
use crate::strategy::StrategyConfig;
use crate::telemetry::LogFormat;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub volatility: VolatilityConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub liquidation: LiquidationThresholds,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// File locations
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Position snapshot
    #[serde(default = "default_positions_path")]
    pub positions_path: PathBuf,
    /// Price observations
    #[serde(default = "default_price_history_path")]
    pub price_history_path: PathBuf,
    /// JSON list of paper marketplace books
    #[serde(default = "default_paper_books_path")]
    pub paper_books_path: PathBuf,
}

fn default_positions_path() -> PathBuf {
    PathBuf::from("./data/positions.parquet")
}
fn default_price_history_path() -> PathBuf {
    PathBuf::from("./data/prices.parquet")
}
fn default_paper_books_path() -> PathBuf {
    PathBuf::from("./data/books.json")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            positions_path: default_positions_path(),
            price_history_path: default_price_history_path(),
            paper_books_path: default_paper_books_path(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no cycle could run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let risk = &self.risk;
        if risk.max_capital_eth <= Decimal::ZERO {
            anyhow::bail!("risk.max_capital_eth must be positive");
        }
        for (name, ratio) in [
            ("min_reserve_ratio", risk.min_reserve_ratio),
            ("max_utilization_rate", risk.max_utilization_rate),
            ("liquidation_risk_threshold", risk.liquidation_risk_threshold),
        ] {
            if ratio < Decimal::ZERO || ratio > Decimal::ONE {
                anyhow::bail!("risk.{} must be within [0, 1], got {}", name, ratio);
            }
        }
        if self.strategy.durations.is_empty() || self.strategy.durations.contains(&0) {
            anyhow::bail!("strategy.durations must be non-empty and positive");
        }
        if self.liquidation.warn_ltv > self.liquidation.recall_ltv {
            anyhow::bail!("liquidation.warn_ltv must not exceed recall_ltv");
        }
        Ok(())
    }

    /// Registry of configured collections
    pub fn registry(&self) -> CollectionRegistry {
        CollectionRegistry::new(self.collections.clone())
    }
}
