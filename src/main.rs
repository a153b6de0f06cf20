use clap::Parser;
use nft_lender::cli::{Cli, Commands};
use nft_lender::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    nft_lender::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Price(args) => args.execute(&config)?,
        Commands::Volatility(args) => args.execute(&config).await?,
        Commands::Evaluate(args) => {
            tracing::info!(collections = config.collections.len(), "Starting evaluation");
            args.execute(&config).await?;
        }
        Commands::Status(args) => args.execute(&config).await?,
        Commands::Config => {
            let risk = &config.risk;
            println!("Current configuration:");
            println!(
                "  Pricing: r={}, liquidity={}, safety={}x, undercut={}",
                config.pricing.risk_free_rate,
                config.pricing.liquidity_premium,
                config.pricing.safety_multiplier,
                config.pricing.min_spread_below_best
            );
            println!(
                "  Strategy: durations={:?}, max APR={}, lookback={}d",
                config.strategy.durations, config.strategy.max_apr, config.strategy.lookback_days
            );
            println!(
                "  Risk: capital={} ETH, per-collection={} ETH, reserve={}, max utilization={}",
                risk.max_capital_eth,
                risk.max_exposure_per_collection,
                risk.min_reserve_ratio,
                risk.max_utilization_rate
            );
            println!(
                "  Liquidation: warn at {} LTV, recall at {} LTV",
                config.liquidation.warn_ltv, config.liquidation.recall_ltv
            );
            println!("  Collections:");
            for c in &config.collections {
                println!(
                    "    {:<20} {} {}{}",
                    c.slug,
                    c.address,
                    if c.enabled { "enabled" } else { "disabled" },
                    c.max_capital
                        .map(|cap| format!(", cap {} ETH", cap))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
