use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::Fetcher;
use crate::freshness::{Freshness, FreshnessEvaluator};
use crate::models::{CandleBatch, Timeframe};

/// Fixed delays before each recovery fetch
pub const DEFAULT_RETRY_DELAYS_SECS: [u64; 3] = [5, 10, 30];

/// Upper bounds on a configured schedule
pub const MAX_RETRY_ATTEMPTS: usize = 3;
pub const MAX_RETRY_BACKOFF_SECS: u64 = 45;

/// One recovery fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based
    pub index: usize,
    pub delay: Duration,
    pub freshness: Freshness,
    /// When the fetch completed
    pub at: DateTime<Utc>,
    /// Set when the fetch itself failed
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Newest batch seen, fresh or not. `None` only if nothing was ever fetched.
    pub batch: Option<CandleBatch>,
    pub freshness: Freshness,
    pub attempts: Vec<RetryAttempt>,
    pub cancelled: bool,
}

impl RetryOutcome {
    pub fn is_fresh(&self) -> bool {
        self.freshness.is_fresh
    }
}

/// Re-fetches a stale feed on a fixed backoff schedule.
///
/// Never returns an error: fetch failures count as stale attempts and the
/// last batch fetched is handed back when every attempt stays stale.
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    delays: Vec<Duration>,
    evaluator: FreshnessEvaluator,
}

impl RetryOrchestrator {
    pub fn new(delays: Vec<Duration>, evaluator: FreshnessEvaluator) -> Self {
        Self { delays, evaluator }
    }

    pub fn with_default_delays(evaluator: FreshnessEvaluator) -> Self {
        Self::new(
            DEFAULT_RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            evaluator,
        )
    }

    pub fn evaluator(&self) -> &FreshnessEvaluator {
        &self.evaluator
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Worst-case time spent sleeping
    pub fn max_backoff(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// Try to recover a fresh batch.
    ///
    /// `last_batch` and `last_freshness` describe the stale fetch that
    /// triggered recovery; they are returned unchanged if no attempt runs.
    pub async fn recover(
        &self,
        fetcher: &dyn Fetcher,
        symbol: &str,
        timeframe: Timeframe,
        last_batch: Option<CandleBatch>,
        last_freshness: Freshness,
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let mut outcome = RetryOutcome {
            batch: last_batch,
            freshness: last_freshness,
            attempts: Vec::with_capacity(self.delays.len()),
            cancelled: false,
        };

        let total = self.delays.len();
        for (i, delay) in self.delays.iter().copied().enumerate() {
            let index = i + 1;
            tracing::warn!(
                symbol = %symbol,
                timeframe = %timeframe,
                "🔄 Stale data, retry {}/{} in {}s",
                index,
                total,
                delay.as_secs_f64()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(
                        symbol = %symbol,
                        timeframe = %timeframe,
                        "Retry {}/{} abandoned: shutdown requested",
                        index,
                        total
                    );
                    outcome.cancelled = true;
                    return outcome;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let fetched = fetcher.fetch(symbol, timeframe).await;
            let at = Utc::now();
            let attempt = match fetched {
                Ok(batch) => {
                    let freshness = self.evaluator.evaluate_batch(&batch, at);
                    outcome.batch = Some(batch);
                    outcome.freshness = freshness;
                    RetryAttempt {
                        index,
                        delay,
                        freshness,
                        at,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %symbol,
                        timeframe = %timeframe,
                        "Retry {}/{} fetch failed: {}",
                        index,
                        total,
                        e
                    );
                    let freshness = self.evaluator.evaluate(None, timeframe, at);
                    outcome.freshness = Freshness {
                        is_fresh: false,
                        ..outcome.freshness
                    };
                    RetryAttempt {
                        index,
                        delay,
                        freshness,
                        at,
                        error: Some(e.to_string()),
                    }
                }
            };

            let fresh = attempt.freshness.is_fresh;
            outcome.attempts.push(attempt);

            if fresh {
                tracing::info!(
                    symbol = %symbol,
                    timeframe = %timeframe,
                    "✓ Fresh data recovered on retry {}/{} (age {:.1}s)",
                    index,
                    total,
                    outcome.freshness.age_seconds
                );
                return outcome;
            }
        }

        tracing::warn!(
            symbol = %symbol,
            timeframe = %timeframe,
            "✗ Data still stale after {} retries (age {:.1}s)",
            total,
            outcome.freshness.age_seconds
        );
        outcome
    }
}
