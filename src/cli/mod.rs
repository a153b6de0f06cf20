//! CLI interface for nft-lender
//!
//! Provides subcommands for:
//! - `price`: Price a single loan
//! - `volatility`: Estimate a collection's volatility from price history
//! - `evaluate`: Run evaluation cycles against paper marketplaces
//! - `status`: Show portfolio state from the position store
//! - `config`: Show configuration

mod evaluate;
mod price;
mod status;
mod volatility;

pub use evaluate::EvaluateArgs;
pub use price::PriceArgs;
pub use status::StatusArgs;
pub use volatility::VolatilityArgs;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "nft-lender")]
#[command(about = "Options-based pricing and risk engine for NFT-collateralized lending")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Price a single loan
    Price(PriceArgs),
    /// Estimate volatility from stored price history
    Volatility(VolatilityArgs),
    /// Run evaluation cycles against paper marketplaces
    Evaluate(EvaluateArgs),
    /// Show portfolio state
    Status(StatusArgs),
    /// Show configuration
    Config,
}

/// Output format shared by the subcommands
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl OutputFormat {
    /// Print `value` as pretty JSON, or run `table` for the human format
    pub(crate) fn emit<T: serde::Serialize>(
        self,
        value: &T,
        table: impl FnOnce(&T),
    ) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Table => table(value),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_command() {
        let cli = Cli::try_parse_from([
            "nft-lender",
            "price",
            "--floor",
            "10",
            "--bid",
            "9.5",
            "--volatility",
            "0.6",
            "--amount",
            "5",
            "--duration",
            "30",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.config, "config.toml");
        match cli.command {
            Commands::Price(args) => {
                assert_eq!(args.floor, 10.0);
                assert_eq!(args.duration, 30);
                assert_eq!(args.format, OutputFormat::Json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_evaluate_defaults() {
        let cli = Cli::try_parse_from(["nft-lender", "-c", "other.toml", "evaluate"]).unwrap();
        assert_eq!(cli.config, "other.toml");
        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.cycles, 1);
                assert_eq!(args.format, OutputFormat::Table);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_format() {
        let result = Cli::try_parse_from(["nft-lender", "status", "--format", "xml"]);
        assert!(result.is_err());
    }
}
