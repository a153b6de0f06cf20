//! Price command implementation

use super::OutputFormat;
use crate::config::Config;
use crate::model::{LoanPricer, MarketData, PricingResult};
use clap::Args;

#[derive(Args, Debug)]
pub struct PriceArgs {
    /// Collection floor price in ETH
    #[arg(long)]
    pub floor: f64,

    /// Top collection bid in ETH (defaults to the floor)
    #[arg(long)]
    pub bid: Option<f64>,

    /// Annualized volatility
    #[arg(long)]
    pub volatility: f64,

    /// Loan principal in ETH
    #[arg(long)]
    pub amount: f64,

    /// Loan duration in days
    #[arg(long, default_value = "30")]
    pub duration: u32,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

impl PriceArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let market = MarketData::new(self.floor, self.bid.unwrap_or(self.floor), self.volatility);
        let pricer = LoanPricer::new(config.pricing);
        let result = pricer.price_loan(&market, self.amount, self.duration)?;

        tracing::debug!(
            amount = self.amount,
            duration = self.duration,
            min_apr = result.min_apr,
            viable = result.is_viable,
            "Priced loan"
        );

        self.format.emit(&result, |r| print_table(&market, r))
    }
}

fn print_table(market: &MarketData, result: &PricingResult) {
    let d = &result.details;
    println!("Market");
    println!("  Floor:            {:.4} ETH", market.floor_price);
    println!("  Bid:              {:.4} ETH", market.top_bid);
    println!("  Spread:           {:.2}%", market.spread * 100.0);
    println!("  Spot:             {:.4} ETH", d.spot);
    println!("  Sigma (adjusted): {:.2}%", d.sigma * 100.0);
    println!("Loan");
    println!("  Principal:        {:.4} ETH", d.strike);
    println!("  Term:             {:.4} years", d.time_to_expiry);
    println!("  LTV:              {:.2}% (max {:.2}%)", d.ltv * 100.0, d.max_ltv * 100.0);
    println!("Pricing");
    println!("  Put premium:      {:.6} ETH", result.put_premium);
    println!("  Min APR:          {:.2}%", result.min_apr * 100.0);
    println!("  Recommended APR:  {:.2}%", result.recommended_apr * 100.0);
    println!("  Expected profit:  {:.6} ETH", result.expected_profit);
    println!("  Break-even floor: {:.4} ETH", result.break_even_floor);
    println!("  Risk score:       {}/100", result.risk_score);
    println!("  Viable:           {}", if result.is_viable { "yes" } else { "no" });
}
