use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Alert, AlertKind};
use crate::freshness::Freshness;
use crate::models::Timeframe;

/// Freshness history of one (symbol, timeframe) feed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessState {
    pub is_stale: bool,
    pub consecutive_stale_count: u32,
    pub last_fresh_at: Option<DateTime<Utc>>,
    pub last_stale_alert_at: Option<DateTime<Utc>>,
    /// A stale alert went out during the current stale run
    pub stale_alert_sent: bool,
}

/// When stale/recovery/failure alerts are allowed through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Consecutive stale observations before the first alert
    pub stale_alert_after: u32,
    /// Minimum gap between two stale alerts for one feed
    pub stale_alert_window_secs: i64,
    /// Alert on every Nth consecutive trade-update failure
    pub failure_alert_every: u32,
    /// Skip recovery alerts for stale runs that never earned a stale alert
    #[serde(default)]
    pub recovery_requires_stale_alert: bool,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            stale_alert_after: 3,
            stale_alert_window_secs: 900,
            failure_alert_every: 3,
            recovery_requires_stale_alert: false,
        }
    }
}

/// Gates stale-data, recovery and trade-update-failure alerts.
///
/// Holds all the process-wide counters, so tests can run against isolated
/// instances.
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    policy: AlertPolicy,
    feeds: HashMap<(String, Timeframe), FreshnessState>,
    trade_update_failure_count: u32,
    last_trade_update_time: Option<DateTime<Utc>>,
}

impl AlertDeduplicator {
    pub fn new(policy: AlertPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn freshness_state(&self, symbol: &str, timeframe: Timeframe) -> Option<&FreshnessState> {
        self.feeds.get(&(symbol.to_string(), timeframe))
    }

    pub fn trade_update_failure_count(&self) -> u32 {
        self.trade_update_failure_count
    }

    pub fn last_trade_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_trade_update_time
    }

    /// Record one freshness observation and return the alert it earns, if any
    pub fn observe_freshness(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        freshness: &Freshness,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let window = Duration::seconds(self.policy.stale_alert_window_secs);
        let stale_alert_after = self.policy.stale_alert_after;
        let recovery_requires_stale_alert = self.policy.recovery_requires_stale_alert;
        let state = self
            .feeds
            .entry((symbol.to_string(), timeframe))
            .or_default();

        if freshness.is_fresh {
            let was_stale = state.is_stale;
            let stale_count = state.consecutive_stale_count;
            let stale_alert_sent = state.stale_alert_sent;
            state.is_stale = false;
            state.consecutive_stale_count = 0;
            state.stale_alert_sent = false;
            state.last_fresh_at = Some(now);

            if !was_stale {
                return None;
            }
            if recovery_requires_stale_alert && !stale_alert_sent {
                tracing::debug!(
                    symbol = %symbol,
                    timeframe = %timeframe,
                    "Recovered after {} stale observations, no stale alert to follow up",
                    stale_count
                );
                return None;
            }

            tracing::info!(
                symbol = %symbol,
                timeframe = %timeframe,
                "✅ Data recovered after {} stale observations",
                stale_count
            );
            return Some(Alert::new(
                AlertKind::Recovered,
                Some(symbol),
                Some(timeframe),
                format!(
                    "✅ DATA RECOVERED {} {}: fresh again after {} stale fetches (age {:.0}s)",
                    symbol, timeframe, stale_count, freshness.age_seconds
                ),
                now,
            ));
        }

        state.is_stale = true;
        state.consecutive_stale_count += 1;

        if state.consecutive_stale_count < stale_alert_after {
            return None;
        }

        let window_open = match state.last_stale_alert_at {
            None => true,
            Some(last) => now - last >= window,
        };
        if !window_open {
            tracing::debug!(
                symbol = %symbol,
                timeframe = %timeframe,
                "Stale alert suppressed ({} consecutive)",
                state.consecutive_stale_count
            );
            return None;
        }

        state.last_stale_alert_at = Some(now);
        state.stale_alert_sent = true;
        Some(Alert::new(
            AlertKind::StaleData,
            Some(symbol),
            Some(timeframe),
            format!(
                "⚠️ STALE DATA {} {}: {} consecutive stale fetches, {}",
                symbol,
                timeframe,
                state.consecutive_stale_count,
                describe_age(freshness)
            ),
            now,
        ))
    }

    /// A trade-update pass completed
    pub fn record_trade_update_success(&mut self, now: DateTime<Utc>) {
        if self.trade_update_failure_count > 0 {
            tracing::info!(
                "Trade updates recovered after {} failed cycles",
                self.trade_update_failure_count
            );
        }
        self.trade_update_failure_count = 0;
        self.last_trade_update_time = Some(now);
    }

    /// A trade-update pass could not run; alerts every Nth consecutive failure
    pub fn record_trade_update_failure(&mut self, reason: &str, now: DateTime<Utc>) -> Option<Alert> {
        self.trade_update_failure_count += 1;
        let count = self.trade_update_failure_count;
        let every = self.policy.failure_alert_every.max(1);

        if count % every != 0 {
            return None;
        }

        Some(Alert::new(
            AlertKind::TradeUpdateFailure,
            None,
            None,
            format!(
                "❌ TRADE MONITORING DEGRADED: {} consecutive failed update cycles ({})",
                count, reason
            ),
            now,
        ))
    }
}

fn describe_age(freshness: &Freshness) -> String {
    let limit = freshness
        .threshold_seconds
        .map(|t| format!("{:.0}s", t))
        .unwrap_or_else(|| "unset".to_string());
    if freshness.age_seconds.is_finite() {
        format!("latest candle {:.0}s old (limit {})", freshness.age_seconds, limit)
    } else {
        format!("no usable candle (limit {})", limit)
    }
}
