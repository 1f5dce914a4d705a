use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{CandleValidator, FetchError, Fetcher};
use crate::models::{Candle, CandleBatch, Timeframe};

pub const BINANCE_API_BASE: &str = "https://api.binance.com";
const KLINES_PATH: &str = "/api/v3/klines";
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 600;
const DEFAULT_CANDLE_LIMIT: u32 = 200;

type KlinesRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Candle fetcher for Binance-compatible `/api/v3/klines` endpoints
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct BinanceKlinesClient {
    client: Client,
    base_url: String,
    limit: u32,
    rate_limiter: Arc<KlinesRateLimiter>,
    validator: Arc<CandleValidator>,
}

impl BinanceKlinesClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_limits(base_url, DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_CANDLE_LIMIT)
    }

    pub fn with_limits(base_url: impl Into<String>, requests_per_minute: u32, limit: u32) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limit: limit.clamp(1, 1000),
            rate_limiter,
            validator: Arc::new(CandleValidator::new()),
        }
    }

    fn parse_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        rows: Vec<Vec<Value>>,
    ) -> Result<CandleBatch, FetchError> {
        let candles = rows
            .iter()
            .enumerate()
            .map(|(index, row)| parse_kline(symbol, row).map_err(|e| {
                FetchError::Decode(format!("kline {}: {}", index, e))
            }))
            .collect::<Result<Vec<_>, _>>()?;

        let batch = CandleBatch::new(symbol, timeframe, candles);
        self.validator.validate_batch(&batch)?;
        Ok(batch)
    }
}

impl Default for BinanceKlinesClient {
    fn default() -> Self {
        Self::new(BINANCE_API_BASE)
    }
}

#[async_trait]
impl Fetcher for BinanceKlinesClient {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleBatch, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, KLINES_PATH);
        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<Vec<Value>> = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        let batch = self.parse_klines(symbol, timeframe, rows)?;

        tracing::debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            candles = batch.len(),
            "Fetched klines"
        );

        Ok(batch)
    }
}

/// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`
fn parse_kline(symbol: &str, row: &[Value]) -> Result<Candle, String> {
    if row.len() < 6 {
        return Err(format!("expected at least 6 fields, got {}", row.len()));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| format!("open time is not an integer: {}", row[0]))?;
    let timestamp = DateTime::<Utc>::from_timestamp_millis(open_time_ms)
        .ok_or_else(|| format!("open time out of range: {}", open_time_ms))?;

    Ok(Candle {
        symbol: symbol.to_string(),
        timestamp,
        open: decimal_field(&row[1], "open")?,
        high: decimal_field(&row[2], "high")?,
        low: decimal_field(&row[3], "low")?,
        close: decimal_field(&row[4], "close")?,
        volume: decimal_field(&row[5], "volume")?,
    })
}

/// Binance sends decimals as strings; accept bare numbers too
fn decimal_field(value: &Value, name: &str) -> Result<f64, String> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| format!("{} '{}' is not a number: {}", name, s, e)),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} is not representable: {}", name, n)),
        other => Err(format!("{} has unexpected type: {}", name, other)),
    }
}
