use async_trait::async_trait;
use thiserror::Error;

use crate::models::{CandleBatch, Timeframe};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode exchange response: {0}")]
    Decode(String),

    #[error("malformed candle batch: {0}")]
    Malformed(String),

    #[error("no candles returned for {symbol} {timeframe}")]
    Empty { symbol: String, timeframe: Timeframe },
}

/// Source of candle batches for a (symbol, timeframe) feed.
///
/// Implementations return a complete, validated batch or an error; never a
/// partially filled one.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleBatch, FetchError>;
}
