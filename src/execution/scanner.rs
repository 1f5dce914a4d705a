use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{PriceResolution, PriceResolver, PriceSource, RetryOrchestrator, TradeTracker, UpdateReport};
use crate::alerts::{Alert, AlertDeduplicator, AlertDispatcher};
use crate::api::Fetcher;
use crate::errors::ScanError;
use crate::freshness::Freshness;
use crate::models::{CandleBatch, Momentum, Timeframe};
use crate::strategy::SignalDetector;

/// State shared by every scan loop of one scanner
#[derive(Clone)]
pub struct ScanContext {
    pub tracker: Arc<Mutex<TradeTracker>>,
    pub resolver: PriceResolver,
    pub alerts: Arc<Mutex<AlertDeduplicator>>,
    pub dispatcher: AlertDispatcher,
    /// Only loops on this timeframe resolve prices and update trades
    pub primary_timeframe: Timeframe,
}

impl ScanContext {
    pub fn new(
        tracker: TradeTracker,
        resolver: PriceResolver,
        alerts: AlertDeduplicator,
        dispatcher: AlertDispatcher,
        primary_timeframe: Timeframe,
    ) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            resolver,
            alerts: Arc::new(Mutex::new(alerts)),
            dispatcher,
            primary_timeframe,
        }
    }
}

/// What happened during one cycle of one feed
#[derive(Debug)]
pub struct CycleReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Verdict on the batch finally used
    pub freshness: Freshness,
    /// Initial fetch plus retries
    pub fetch_attempts: usize,
    /// Went stale and a retry brought it back
    pub recovered: bool,
    pub cancelled: bool,
    pub momentum: Momentum,
    /// Set only on the primary-timeframe loop
    pub price: Option<PriceResolution>,
    pub update: Option<UpdateReport>,
    pub opened: Vec<String>,
    /// Alerts handed to the dispatcher
    pub alerts: Vec<Alert>,
    pub errors: Vec<ScanError>,
}

impl CycleReport {
    fn new(symbol: &str, timeframe: Timeframe, freshness: Freshness) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            freshness,
            fetch_attempts: 0,
            recovered: false,
            cancelled: false,
            momentum: Momentum::Neutral,
            price: None,
            update: None,
            opened: Vec::new(),
            alerts: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn trades_updated(&self) -> bool {
        self.update.is_some()
    }
}

/// One independent fetch → check → recover → monitor loop for a
/// (symbol, timeframe) feed.
pub struct ScanLoop {
    symbol: String,
    timeframe: Timeframe,
    fetcher: Arc<dyn Fetcher>,
    detector: Option<Arc<dyn SignalDetector>>,
    retry: RetryOrchestrator,
    ctx: ScanContext,
}

impl ScanLoop {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryOrchestrator,
        ctx: ScanContext,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            fetcher,
            detector: None,
            retry,
            ctx,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn SignalDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn monitors_trades(&self) -> bool {
        self.timeframe == self.ctx.primary_timeframe
    }

    /// Run cycles on a fixed interval until cancelled
    pub async fn run(&self, every: Duration, cancel: CancellationToken) {
        tracing::info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            "📡 Scan loop started (every {}s, trades: {})",
            every.as_secs(),
            self.monitors_trades()
        );

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run_cycle(&cancel).await;
            if report.cancelled {
                break;
            }
        }

        tracing::info!(symbol = %self.symbol, timeframe = %self.timeframe, "Scan loop stopped");
    }

    /// One full cycle: fetch, freshness check, recovery, price resolution,
    /// trade updates, alert dispatch. Never fails; problems land in the report.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let evaluator = self.retry.evaluator();

        let (mut batch, freshness, fetch_error) =
            match self.fetcher.fetch(&self.symbol, self.timeframe).await {
                Ok(batch) => {
                    let freshness = evaluator.evaluate_batch(&batch, Utc::now());
                    (Some(batch), freshness, None)
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %self.symbol,
                        timeframe = %self.timeframe,
                        "Fetch failed: {}",
                        e
                    );
                    let freshness = evaluator.evaluate(None, self.timeframe, Utc::now());
                    (None, freshness, Some(e))
                }
            };

        let mut report = CycleReport::new(&self.symbol, self.timeframe, freshness);
        report.fetch_attempts = 1;
        report.errors.extend(fetch_error.map(ScanError::Fetch));
        self.observe(&mut report, freshness, Utc::now()).await;

        if !freshness.is_fresh {
            tracing::warn!(
                symbol = %self.symbol,
                timeframe = %self.timeframe,
                "{}",
                ScanError::StaleData {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                    age_seconds: freshness.age_seconds,
                }
            );

            let outcome = self
                .retry
                .recover(
                    self.fetcher.as_ref(),
                    &self.symbol,
                    self.timeframe,
                    batch.take(),
                    freshness,
                    cancel,
                )
                .await;

            for attempt in &outcome.attempts {
                report.fetch_attempts += 1;
                self.observe(&mut report, attempt.freshness, attempt.at).await;
            }

            report.recovered = outcome.is_fresh();
            report.freshness = outcome.freshness;
            report.cancelled = outcome.cancelled;
            batch = outcome.batch;

            if !report.recovered {
                report.errors.push(ScanError::StaleData {
                    symbol: self.symbol.clone(),
                    timeframe: self.timeframe,
                    age_seconds: report.freshness.age_seconds,
                });
            }
        }

        if report.cancelled {
            self.dispatch(&report);
            return report;
        }

        let fresh_batch = batch.as_ref().filter(|_| report.freshness.is_fresh);

        if let Some(fresh) = fresh_batch {
            self.detect(&mut report, fresh).await;
        }

        if self.monitors_trades() {
            let fresh_close = fresh_batch.and_then(|b| b.latest()).map(|c| c.close);
            self.update_trades(&mut report, fresh_close).await;
        }

        self.dispatch(&report);

        tracing::debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            "Cycle done: fresh={} attempts={} alerts={} errors={}",
            report.freshness.is_fresh,
            report.fetch_attempts,
            report.alerts.len(),
            report.errors.len()
        );
        report
    }

    async fn observe(&self, report: &mut CycleReport, freshness: Freshness, at: chrono::DateTime<Utc>) {
        let alert = self
            .ctx
            .alerts
            .lock()
            .await
            .observe_freshness(&self.symbol, self.timeframe, &freshness, at);
        report.alerts.extend(alert);
    }

    /// Ask the detector for momentum and a new setup; fresh data only
    async fn detect(&self, report: &mut CycleReport, batch: &CandleBatch) {
        let Some(detector) = &self.detector else {
            return;
        };

        report.momentum = detector.momentum(batch);

        let Some(signal) = detector.detect(batch) else {
            return;
        };
        tracing::info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            "💡 {} signal from {}",
            signal.direction,
            detector.name()
        );

        let opened = self.ctx.tracker.lock().await.open_trade(signal);
        match opened {
            Ok(event) => {
                report.opened.push(event.trade_id.clone());
                report.alerts.push(Alert::from_trade_event(&event));
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, "Signal not opened: {}", e);
                report.errors.push(e.into());
            }
        }
    }

    /// Resolve one price snapshot and advance every active trade on the symbol
    async fn update_trades(&self, report: &mut CycleReport, fresh_close: Option<f64>) {
        let now = Utc::now();
        let resolution = self.ctx.resolver.resolve(&self.symbol, fresh_close, now);
        report.price = Some(resolution);

        let Some(price) = resolution.price else {
            tracing::warn!(
                symbol = %self.symbol,
                "⏸️ No usable price (source {}), trades left untouched",
                resolution.source
            );
            let error = ScanError::PriceUnavailable {
                symbol: self.symbol.clone(),
            };
            self.record_failure(report, &error, now).await;
            report.errors.push(error);
            return;
        };

        if resolution.source == PriceSource::Cached {
            tracing::info!(
                symbol = %self.symbol,
                "Using cached price {:.4} ({:.0}s old)",
                price,
                resolution.cache_age_seconds.unwrap_or_default()
            );
        }

        let updated = self
            .ctx
            .tracker
            .lock()
            .await
            .update(&self.symbol, price, report.momentum, now);

        match updated {
            Ok(update) => {
                report
                    .alerts
                    .extend(update.events.iter().map(Alert::from_trade_event));
                self.ctx.alerts.lock().await.record_trade_update_success(now);
                report.update = Some(update);
            }
            Err(e) => {
                tracing::error!(symbol = %self.symbol, "Trade update aborted: {}", e);
                let error = ScanError::from(e);
                self.record_failure(report, &error, now).await;
                report.errors.push(error);
            }
        }
    }

    async fn record_failure(
        &self,
        report: &mut CycleReport,
        error: &ScanError,
        now: chrono::DateTime<Utc>,
    ) {
        let alert = self
            .ctx
            .alerts
            .lock()
            .await
            .record_trade_update_failure(&error.to_string(), now);
        report.alerts.extend(alert);
    }

    fn dispatch(&self, report: &CycleReport) {
        for alert in &report.alerts {
            self.ctx.dispatcher.dispatch(alert.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertKind, LogNotifier};
    use crate::api::FetchError;
    use crate::execution::TradeEventKind;
    use crate::freshness::FreshnessEvaluator;
    use crate::models::{Candle, Direction};
    use crate::strategy::TradeSignal;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Serves (age seconds, close) pairs in order; errors once exhausted or on `None`
    struct StubFetcher {
        script: StdMutex<VecDeque<Option<(i64, f64)>>>,
    }

    impl StubFetcher {
        fn new(script: Vec<Option<(i64, f64)>>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleBatch, FetchError> {
            let next = self.script.lock().unwrap().pop_front().flatten();
            let Some((age, close)) = next else {
                return Err(FetchError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            };
            let candle = Candle {
                symbol: symbol.to_string(),
                timestamp: Utc::now() - ChronoDuration::seconds(age),
                open: close,
                high: close,
                low: close,
                close,
                volume: 10.0,
            };
            Ok(CandleBatch::new(symbol, timeframe, vec![candle]))
        }
    }

    struct FixedDetector {
        signal: Option<TradeSignal>,
        momentum: Momentum,
    }

    impl SignalDetector for FixedDetector {
        fn detect(&self, _batch: &CandleBatch) -> Option<TradeSignal> {
            self.signal.clone()
        }

        fn momentum(&self, _batch: &CandleBatch) -> Momentum {
            self.momentum
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn long_signal() -> TradeSignal {
        TradeSignal {
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            extended_take_profit: None,
        }
    }

    fn context() -> ScanContext {
        let (dispatcher, _handle) = AlertDispatcher::spawn(Arc::new(LogNotifier), 64);
        ScanContext::new(
            TradeTracker::default(),
            PriceResolver::default(),
            AlertDeduplicator::default(),
            dispatcher,
            Timeframe::M1,
        )
    }

    fn scan_loop(timeframe: Timeframe, fetcher: Arc<StubFetcher>, ctx: ScanContext) -> ScanLoop {
        let retry = RetryOrchestrator::with_default_delays(FreshnessEvaluator::default());
        ScanLoop::new("BTCUSDT", timeframe, fetcher, retry, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cycle_updates_trades_with_live_price() {
        let ctx = context();
        ctx.tracker.lock().await.open_trade(long_signal()).unwrap();
        let fetcher = StubFetcher::new(vec![Some((10, 104.0))]);
        let scan = scan_loop(Timeframe::M1, fetcher, ctx.clone());

        let report = scan.run_cycle(&CancellationToken::new()).await;

        assert!(report.freshness.is_fresh);
        assert_eq!(report.fetch_attempts, 1);
        let price = report.price.unwrap();
        assert_eq!(price.source, PriceSource::Live);
        assert_eq!(price.price, Some(104.0));
        assert_eq!(report.update.as_ref().unwrap().evaluated, 1);
        assert!(report.errors.is_empty());
        assert_eq!(ctx.resolver.cache().get("BTCUSDT").unwrap().price, 104.0);
        assert!(ctx.alerts.lock().await.last_trade_update_time().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_timeframe_leaves_trades_alone() {
        let ctx = context();
        ctx.tracker.lock().await.open_trade(long_signal()).unwrap();
        let fetcher = StubFetcher::new(vec![Some((30, 111.0))]);
        let scan = scan_loop(Timeframe::M5, fetcher, ctx.clone());

        let report = scan.run_cycle(&CancellationToken::new()).await;

        assert!(!scan.monitors_trades());
        assert!(report.price.is_none());
        assert!(!report.trades_updated());
        assert_eq!(ctx.tracker.lock().await.active_trades().len(), 1);
        assert!(ctx.resolver.cache().get("BTCUSDT").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cycle_recovers_on_second_retry() {
        let ctx = context();
        let fetcher = StubFetcher::new(vec![
            Some((500, 100.0)),
            Some((400, 100.0)),
            Some((20, 101.0)),
        ]);
        let scan = scan_loop(Timeframe::M1, fetcher, ctx.clone());

        let report = scan.run_cycle(&CancellationToken::new()).await;

        assert!(report.recovered);
        assert_eq!(report.fetch_attempts, 3);
        assert_eq!(report.price.unwrap().source, PriceSource::Live);

        // Two stale observations then fresh: recovery alert, no stale alert
        let kinds: Vec<AlertKind> = report.alerts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlertKind::Recovered]);
        let alerts = ctx.alerts.lock().await;
        assert_eq!(
            alerts.freshness_state("BTCUSDT", Timeframe::M1).unwrap().consecutive_stale_count,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_price_counts_as_failure() {
        let ctx = context();
        ctx.tracker.lock().await.open_trade(long_signal()).unwrap();
        let fetcher = StubFetcher::new(vec![]);
        let scan = scan_loop(Timeframe::M1, fetcher, ctx.clone());
        let cancel = CancellationToken::new();

        let first = scan.run_cycle(&cancel).await;
        assert_eq!(first.fetch_attempts, 4);
        assert_eq!(first.price.unwrap().source, PriceSource::Unavailable);
        assert!(first.errors.iter().any(|e| e.blocks_trade_update()));
        assert_eq!(ctx.alerts.lock().await.trade_update_failure_count(), 1);

        scan.run_cycle(&cancel).await;
        let third = scan.run_cycle(&cancel).await;

        assert!(third
            .alerts
            .iter()
            .any(|a| a.kind == AlertKind::TradeUpdateFailure));
        assert_eq!(ctx.alerts.lock().await.trade_update_failure_count(), 3);
        assert!(ctx.tracker.lock().await.active_trades()[0].last_price.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_opens_trade_on_fresh_data_only() {
        let ctx = context();
        let detector = Arc::new(FixedDetector {
            signal: Some(long_signal()),
            momentum: Momentum::Neutral,
        });

        let fresh = scan_loop(Timeframe::M1, StubFetcher::new(vec![Some((5, 100.0))]), ctx.clone())
            .with_detector(detector.clone());
        let report = fresh.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.opened.len(), 1);
        assert_eq!(
            report.alerts[0].kind,
            AlertKind::Trade(TradeEventKind::Opened)
        );

        let stale_script = vec![Some((900, 100.0)); 4];
        let stale = scan_loop(Timeframe::M1, StubFetcher::new(stale_script), ctx.clone())
            .with_detector(detector);
        let report = stale.run_cycle(&CancellationToken::new()).await;
        assert!(report.opened.is_empty());
        assert_eq!(report.momentum, Momentum::Neutral);
        assert_eq!(ctx.tracker.lock().await.active_trades().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_momentum_feeds_trade_update() {
        let ctx = context();
        ctx.tracker.lock().await.open_trade(long_signal()).unwrap();
        let detector = Arc::new(FixedDetector {
            signal: None,
            momentum: Momentum::Reversing,
        });
        let scan = scan_loop(Timeframe::M1, StubFetcher::new(vec![Some((5, 102.0))]), ctx.clone())
            .with_detector(detector);

        let report = scan.run_cycle(&CancellationToken::new()).await;

        let events = &report.update.unwrap().events;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TradeEventKind::MomentumReversal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_recovery_skips_trade_update() {
        let ctx = context();
        ctx.tracker.lock().await.open_trade(long_signal()).unwrap();
        let scan = scan_loop(Timeframe::M1, StubFetcher::new(vec![Some((500, 100.0))]), ctx.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = scan.run_cycle(&cancel).await;

        assert!(report.cancelled);
        assert_eq!(report.fetch_attempts, 1);
        assert!(report.price.is_none());
        assert_eq!(ctx.alerts.lock().await.trade_update_failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let ctx = context();
        let script = vec![Some((5, 100.0)); 8];
        let scan = Arc::new(scan_loop(Timeframe::M1, StubFetcher::new(script), ctx));
        let cancel = CancellationToken::new();

        let handle = {
            let scan = scan.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scan.run(Duration::from_secs(60), cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
