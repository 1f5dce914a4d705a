use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tradewatch::api::{BinanceKlinesClient, Fetcher};
use tradewatch::config::ScannerConfig;
use tradewatch::freshness::FreshnessEvaluator;
use tradewatch::Result;

/// One fetch per configured feed, printing candle age against its limit
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("tradewatch=warn")
        .init();

    let cli = Cli::parse();
    let config = ScannerConfig::load(cli.config.as_deref())?;
    let evaluator = FreshnessEvaluator::new(config.thresholds()?);
    let client = BinanceKlinesClient::with_limits(
        config.exchange_base_url.clone(),
        config.requests_per_minute,
        config.candle_limit,
    );

    println!("\n═══════════════════════════════════════════════════════");
    println!("         DATA FRESHNESS CHECK: {}", config.exchange_base_url);
    println!("═══════════════════════════════════════════════════════\n");
    println!(
        "{:<12} {:<5} {:>12} {:>10}  {}",
        "SYMBOL", "TF", "AGE", "LIMIT", "VERDICT"
    );

    let mut stale = 0;
    for (symbol, timeframe) in config.feeds() {
        let limit = evaluator
            .thresholds()
            .max_age_secs(timeframe)
            .map(|s| format!("{:.0}s", s))
            .unwrap_or_else(|| "-".to_string());

        match client.fetch(&symbol, timeframe).await {
            Ok(batch) => {
                let freshness = evaluator.evaluate_batch(&batch, Utc::now());
                let age = if freshness.age_seconds.is_finite() {
                    format!("{:.1}s", freshness.age_seconds)
                } else {
                    "undatable".to_string()
                };
                let verdict = if freshness.is_fresh { "✓ fresh" } else { "✗ STALE" };
                if !freshness.is_fresh {
                    stale += 1;
                }
                println!("{:<12} {:<5} {:>12} {:>10}  {}", symbol, timeframe, age, limit, verdict);
            }
            Err(e) => {
                stale += 1;
                println!("{:<12} {:<5} {:>12} {:>10}  ✗ {}", symbol, timeframe, "-", limit, e);
            }
        }
    }

    println!();
    if stale == 0 {
        println!("All {} feed(s) fresh", config.feeds().len());
    } else {
        println!("{} of {} feed(s) stale or unreachable", stale, config.feeds().len());
    }

    Ok(())
}
