// Scanner configuration: defaults, optional TOML file, TRADEWATCH__ env overrides
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::alerts::AlertPolicy;
use crate::api::binance::BINANCE_API_BASE;
use crate::execution::price_resolver::DEFAULT_CACHE_MAX_AGE_SECS;
use crate::execution::retry::{
    DEFAULT_RETRY_DELAYS_SECS, MAX_RETRY_ATTEMPTS, MAX_RETRY_BACKOFF_SECS,
};
use crate::execution::TradeRules;
use crate::freshness::FreshnessThresholds;
use crate::models::Timeframe;

pub const ENV_PREFIX: &str = "TRADEWATCH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    /// Timeframe whose loop resolves prices and updates trades
    pub primary_timeframe: Timeframe,
    pub scan_interval_secs: u64,
    /// Overrides on top of the built-in per-timeframe limits
    pub freshness_thresholds: HashMap<String, u64>,
    pub retry_delays_secs: Vec<u64>,
    pub cache_max_age_secs: i64,
    pub stale_alert_after: u32,
    pub stale_alert_window_secs: i64,
    pub failure_alert_every: u32,
    /// Send recovery alerts only for feeds that earned a stale alert
    pub recovery_requires_stale_alert: bool,
    pub exchange_base_url: String,
    pub requests_per_minute: u32,
    pub candle_limit: u32,
    pub trade_rules: TradeRules,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let policy = AlertPolicy::default();
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            timeframes: vec![Timeframe::M1, Timeframe::M5],
            primary_timeframe: Timeframe::M1,
            scan_interval_secs: 60,
            freshness_thresholds: HashMap::new(),
            retry_delays_secs: DEFAULT_RETRY_DELAYS_SECS.to_vec(),
            cache_max_age_secs: DEFAULT_CACHE_MAX_AGE_SECS,
            stale_alert_after: policy.stale_alert_after,
            stale_alert_window_secs: policy.stale_alert_window_secs,
            failure_alert_every: policy.failure_alert_every,
            recovery_requires_stale_alert: policy.recovery_requires_stale_alert,
            exchange_base_url: BINANCE_API_BASE.to_string(),
            requests_per_minute: 600,
            candle_limit: 100,
            trade_rules: TradeRules::default(),
        }
    }
}

impl ScannerConfig {
    /// Load from an optional TOML file plus `TRADEWATCH__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder.add_source(env).build()?;
        let scanner: ScannerConfig = config.try_deserialize()?;
        scanner.validate()?;
        Ok(scanner)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid("symbols must be non-empty".to_string()));
        }
        if self.timeframes.is_empty() {
            return Err(ConfigError::Invalid("timeframes must be non-empty".to_string()));
        }
        if !self.timeframes.contains(&self.primary_timeframe) {
            return Err(ConfigError::Invalid(format!(
                "primary timeframe {} is not among the scanned timeframes",
                self.primary_timeframe
            )));
        }
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid("scan_interval_secs must be positive".to_string()));
        }
        if self.retry_delays_secs.len() > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Invalid(format!(
                "at most {} retry delays allowed, got {}",
                MAX_RETRY_ATTEMPTS,
                self.retry_delays_secs.len()
            )));
        }
        let total_backoff: u64 = self.retry_delays_secs.iter().sum();
        if total_backoff > MAX_RETRY_BACKOFF_SECS {
            return Err(ConfigError::Invalid(format!(
                "retry delays add up to {}s, limit is {}s",
                total_backoff, MAX_RETRY_BACKOFF_SECS
            )));
        }
        if self.cache_max_age_secs <= 0 {
            return Err(ConfigError::Invalid("cache_max_age_secs must be positive".to_string()));
        }
        if self.requests_per_minute == 0 || self.candle_limit == 0 {
            return Err(ConfigError::Invalid(
                "requests_per_minute and candle_limit must be positive".to_string(),
            ));
        }

        let thresholds = self.thresholds()?;
        for tf in &self.timeframes {
            if thresholds.max_age_secs(*tf).is_none() {
                return Err(ConfigError::Invalid(format!("no freshness threshold for {}", tf)));
            }
        }
        Ok(())
    }

    /// Built-in limits with configured overrides applied
    pub fn thresholds(&self) -> Result<FreshnessThresholds, ConfigError> {
        let mut thresholds = FreshnessThresholds::default();
        for (key, secs) in &self.freshness_thresholds {
            let timeframe: Timeframe = key.parse().map_err(ConfigError::Invalid)?;
            if *secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "freshness threshold for {} must be positive",
                    timeframe
                )));
            }
            thresholds = thresholds.with(timeframe, *secs);
        }
        Ok(thresholds)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_max_age_secs)
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            stale_alert_after: self.stale_alert_after,
            stale_alert_window_secs: self.stale_alert_window_secs,
            failure_alert_every: self.failure_alert_every,
            recovery_requires_stale_alert: self.recovery_requires_stale_alert,
        }
    }

    /// Every (symbol, timeframe) pair that gets its own loop
    pub fn feeds(&self) -> Vec<(String, Timeframe)> {
        self.symbols
            .iter()
            .flat_map(|s| self.timeframes.iter().map(move |tf| (s.clone(), *tf)))
            .collect()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("symbols")
        .with_list_parse_key("timeframes")
        .with_list_parse_key("retry_delays_secs")
        .try_parsing(true)
}
