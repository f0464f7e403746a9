mod script;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ride_escrow::{
    EscrowSettings, FeePercentage, InMemoryTokenLedger, RideEscrow, TokenAmount,
};
use serde_json::json;
use std::{path::PathBuf, str::FromStr, sync::Arc};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "ride-escrow", about = "Replay and inspect ride escrow ledgers")]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a JSON ride script and print the resulting ledger
    Run {
        /// Path to the script
        script: PathBuf,
    },
    /// Show how a fare splits into fee and payment
    Fee {
        /// Fare as a decimal token amount
        fare: String,
        /// Fee percentage, defaults to the configured one
        #[arg(long)]
        percentage: Option<u8>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = EscrowSettings::load(cli.config.as_deref()).context("loading settings")?;

    let level = Level::from_str(&settings.log_level)
        .with_context(|| format!("invalid log_level '{}'", settings.log_level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run { script } => run(&settings, script).await,
        Command::Fee { fare, percentage } => fee(&settings, &fare, percentage),
    }
}

async fn run(settings: &EscrowSettings, path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let parsed: script::Script = serde_json::from_str(&raw)
        .with_context(|| format!("parsing script {}", path.display()))?;

    let ledger = Arc::new(InMemoryTokenLedger::new(settings.escrow_account()?));
    let escrow = RideEscrow::new(settings.escrow_config()?, ledger.clone());

    info!("Replaying {} ({} steps)", path.display(), parsed.steps.len());
    let report = script::replay(&escrow, &ledger, parsed).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn fee(settings: &EscrowSettings, fare: &str, percentage: Option<u8>) -> Result<()> {
    let fare = TokenAmount::parse_decimal(fare)?;
    let fee_percentage = match percentage {
        Some(value) => FeePercentage::new(value)?,
        None => settings.escrow_config()?.fee_percentage,
    };
    let (fee, payment) = fee_percentage.split(fare)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "fare": fare,
            "fee_percentage": fee_percentage.value(),
            "fee": fee,
            "payment": payment,
        }))?
    );
    Ok(())
}
