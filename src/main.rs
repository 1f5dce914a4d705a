use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tradewatch::alerts::notifier::DEFAULT_ALERT_QUEUE;
use tradewatch::alerts::{AlertDeduplicator, AlertDispatcher, LogNotifier};
use tradewatch::api::{BinanceKlinesClient, Fetcher};
use tradewatch::config::ScannerConfig;
use tradewatch::execution::{
    CycleReport, PriceCache, PriceResolver, RetryOrchestrator, ScanContext, ScanLoop, Trade,
    TradeTracker,
};
use tradewatch::freshness::FreshnessEvaluator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Trade lifecycle and data-freshness monitor", long_about = None)]
struct Cli {
    /// TOML config file; TRADEWATCH__* environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed open trades from a JSON array
    #[arg(long)]
    trades: Option<PathBuf>,

    /// Write closed trades to this JSON file on shutdown
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Run a single cycle per feed and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = ScannerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    tracing::info!(
        "🚀 TradeWatch starting: {} symbol(s) x {} timeframe(s), primary {}",
        config.symbols.len(),
        config.timeframes.len(),
        config.primary_timeframe
    );

    // ========================================================================
    // Shared state
    // ========================================================================

    let seeded = match &cli.trades {
        Some(path) => {
            let trades = load_trades(path)?;
            tracing::info!("Read {} trade(s) from {}", trades.len(), path.display());
            trades
        }
        None => Vec::new(),
    };
    let tracker = TradeTracker::with_trades(config.trade_rules.clone(), seeded);

    let evaluator = FreshnessEvaluator::new(config.thresholds()?);
    let retry = RetryOrchestrator::new(config.retry_delays(), evaluator);
    tracing::info!(
        "Recovery schedule {:?} (at most {}s of backoff per cycle)",
        config.retry_delays_secs,
        retry.max_backoff().as_secs()
    );
    let resolver = PriceResolver::new(PriceCache::new(), config.cache_max_age());
    let (dispatcher, alert_task) = AlertDispatcher::spawn(Arc::new(LogNotifier), DEFAULT_ALERT_QUEUE);

    let ctx = ScanContext::new(
        tracker,
        resolver,
        AlertDeduplicator::new(config.alert_policy()),
        dispatcher,
        config.primary_timeframe,
    );

    let fetcher: Arc<dyn Fetcher> = Arc::new(BinanceKlinesClient::with_limits(
        config.exchange_base_url.clone(),
        config.requests_per_minute,
        config.candle_limit,
    ));

    let loops: Vec<ScanLoop> = config
        .feeds()
        .into_iter()
        .map(|(symbol, timeframe)| {
            ScanLoop::new(symbol, timeframe, fetcher.clone(), retry.clone(), ctx.clone())
        })
        .collect();

    // ========================================================================
    // Scan loops
    // ========================================================================

    let cancel = CancellationToken::new();

    if cli.once {
        for report in run_once(loops, &cancel).await {
            log_report(&report);
        }
    } else {
        tracing::info!("Press Ctrl+C to stop...");
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        };
        run_until(loops, config.scan_interval(), cancel, shutdown).await;
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    let (active, closed) = {
        let tracker = ctx.tracker.lock().await;
        (tracker.active_trades().to_vec(), tracker.closed_trades().to_vec())
    };
    tracing::info!("{} active trade(s), {} closed", active.len(), closed.len());

    if let Some(path) = &cli.archive {
        write_archive(path, &closed)?;
        tracing::info!("Archived {} closed trade(s) to {}", closed.len(), path.display());
    }

    // Dropping the last dispatcher lets the alert task drain and exit
    drop(ctx);
    if tokio::time::timeout(Duration::from_secs(5), alert_task).await.is_err() {
        tracing::warn!("Alert queue not drained before exit");
    }

    tracing::info!("👋 TradeWatch stopped");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// One cycle per feed, all feeds concurrently
async fn run_once(loops: Vec<ScanLoop>, cancel: &CancellationToken) -> Vec<CycleReport> {
    let mut tasks: JoinSet<CycleReport> = JoinSet::new();
    for scan in loops {
        let cancel = cancel.clone();
        tasks.spawn(async move { scan.run_cycle(&cancel).await });
    }

    let mut reports = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!("Scan task failed: {}", e),
        }
    }
    reports
}

/// Run every loop until `shutdown` resolves or a loop exits, then cancel the
/// rest and wait for them.
async fn run_until<F>(loops: Vec<ScanLoop>, every: Duration, cancel: CancellationToken, shutdown: F)
where
    F: std::future::Future<Output = ()>,
{
    let mut tasks: JoinSet<()> = JoinSet::new();
    for scan in loops {
        let cancel = cancel.clone();
        tasks.spawn(async move {
            scan.run(every, cancel).await;
        });
    }

    tokio::select! {
        _ = shutdown => {}
        Some(result) = tasks.join_next() => {
            tracing::error!("Scan loop exited early: {:?}", result);
        }
    }

    cancel.cancel();
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!("Scan loop failed: {}", e);
        }
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tradewatch=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_trades(path: &Path) -> anyhow::Result<Vec<Trade>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read trades from {}", path.display()))?;
    let trades: Vec<Trade> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse trades in {}", path.display()))?;
    Ok(trades)
}

fn write_archive(path: &Path, closed: &[Trade]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(closed)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write archive {}", path.display()))?;
    Ok(())
}

fn log_report(report: &CycleReport) {
    let price = report
        .price
        .map(|p| match p.price {
            Some(price) => format!("{:.4} ({})", price, p.source),
            None => p.source.to_string(),
        })
        .unwrap_or_else(|| "-".to_string());

    tracing::info!(
        symbol = %report.symbol,
        timeframe = %report.timeframe,
        "fresh={} age={:.1}s attempts={} price={} alerts={} errors={}",
        report.freshness.is_fresh,
        report.freshness.age_seconds,
        report.fetch_attempts,
        price,
        report.alerts.len(),
        report.errors.len()
    );
    for error in &report.errors {
        tracing::warn!(kind = error.kind(), "  {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use tradewatch::api::FetchError;
    use tradewatch::{Candle, CandleBatch, Timeframe};

    struct FreshFetcher;

    #[async_trait]
    impl Fetcher for FreshFetcher {
        async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleBatch, FetchError> {
            let candle = Candle {
                symbol: symbol.to_string(),
                timestamp: Utc::now(),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1.0,
            };
            Ok(CandleBatch::new(symbol, timeframe, vec![candle]))
        }
    }

    fn loops(feeds: &[(&str, Timeframe)]) -> (Vec<ScanLoop>, ScanContext) {
        let (dispatcher, _task) = AlertDispatcher::spawn(Arc::new(LogNotifier), 16);
        let ctx = ScanContext::new(
            TradeTracker::default(),
            PriceResolver::default(),
            AlertDeduplicator::default(),
            dispatcher,
            Timeframe::M1,
        );
        let fetcher: Arc<dyn Fetcher> = Arc::new(FreshFetcher);
        let retry = RetryOrchestrator::with_default_delays(FreshnessEvaluator::default());
        let loops = feeds
            .iter()
            .map(|(symbol, tf)| ScanLoop::new(*symbol, *tf, fetcher.clone(), retry.clone(), ctx.clone()))
            .collect();
        (loops, ctx)
    }

    #[tokio::test]
    async fn test_run_once_reports_every_feed() {
        let (loops, _ctx) = loops(&[("BTCUSDT", Timeframe::M1), ("BTCUSDT", Timeframe::M5)]);

        let reports = run_once(loops, &CancellationToken::new()).await;

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.freshness.is_fresh));
        assert_eq!(reports.iter().filter(|r| r.price.is_some()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stops_every_loop_on_shutdown() {
        let (loops, ctx) = loops(&[("BTCUSDT", Timeframe::M1), ("ETHUSDT", Timeframe::M1)]);
        let cancel = CancellationToken::new();

        run_until(
            loops,
            Duration::from_secs(60),
            cancel.clone(),
            tokio::time::sleep(Duration::from_secs(150)),
        )
        .await;

        assert!(cancel.is_cancelled());
        let alerts = ctx.alerts.lock().await;
        assert!(alerts.last_trade_update_time().is_some());
        assert_eq!(alerts.trade_update_failure_count(), 0);
    }
}
