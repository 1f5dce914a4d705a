use chrono::{DateTime, Utc};

use super::FreshnessThresholds;
use crate::models::{CandleBatch, Timeframe};

/// Result of a freshness check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freshness {
    pub is_fresh: bool,
    /// `f64::INFINITY` when the data could not be dated
    pub age_seconds: f64,
    pub threshold_seconds: Option<f64>,
}

impl Freshness {
    fn unusable(threshold_seconds: Option<f64>) -> Self {
        Self {
            is_fresh: false,
            age_seconds: f64::INFINITY,
            threshold_seconds,
        }
    }
}

/// Classifies the newest candle of a feed as fresh or stale.
///
/// Pure: no clocks are read here, `now` is always supplied. Anything that
/// cannot be dated reliably fails closed with an infinite age.
#[derive(Debug, Clone, Default)]
pub struct FreshnessEvaluator {
    thresholds: FreshnessThresholds,
}

impl FreshnessEvaluator {
    pub fn new(thresholds: FreshnessThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &FreshnessThresholds {
        &self.thresholds
    }

    /// Evaluate a single timestamp. The threshold boundary is inclusive.
    pub fn evaluate(
        &self,
        timestamp: Option<DateTime<Utc>>,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Freshness {
        let threshold = self.thresholds.max_age_secs(timeframe);

        let Some(timestamp) = timestamp else {
            return Freshness::unusable(threshold);
        };

        // A candle dated after `now` is as untrustworthy as a reordered one
        if timestamp > now {
            return Freshness::unusable(threshold);
        }

        let age_seconds = (now - timestamp).num_milliseconds() as f64 / 1000.0;
        let is_fresh = match threshold {
            Some(max_age) => age_seconds <= max_age,
            None => false,
        };

        Freshness {
            is_fresh,
            age_seconds,
            threshold_seconds: threshold,
        }
    }

    /// Evaluate the latest candle of a batch
    pub fn evaluate_batch(&self, batch: &CandleBatch, now: DateTime<Utc>) -> Freshness {
        if !batch.is_strictly_increasing() {
            return Freshness::unusable(self.thresholds.max_age_secs(batch.timeframe));
        }
        self.evaluate(batch.latest().map(|c| c.timestamp), batch.timeframe, now)
    }
}
