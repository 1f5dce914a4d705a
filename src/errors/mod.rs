// Scan-level error classification
use thiserror::Error;

use crate::api::FetchError;
use crate::execution::TrackerError;
use crate::models::Timeframe;

/// Everything that can go wrong in one scan cycle.
///
/// None of these stop the scanner; they are collected into the cycle report
/// and logged, and the next cycle starts from scratch.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("stale data for {symbol} {timeframe} ({age_seconds:.1}s old)")]
    StaleData {
        symbol: String,
        timeframe: Timeframe,
        age_seconds: f64,
    },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("no usable price for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("trade {0} is not active")]
    MissingTrade(String),

    #[error("trade rejected: {0}")]
    TradeRejected(TrackerError),
}

impl ScanError {
    /// Short label for structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::StaleData { .. } => "stale_data",
            ScanError::Fetch(_) => "fetch",
            ScanError::PriceUnavailable { .. } => "price_unavailable",
            ScanError::InvalidPrice { .. } => "invalid_price",
            ScanError::MissingTrade(_) => "missing_trade",
            ScanError::TradeRejected(_) => "trade_rejected",
        }
    }

    /// Whether this error means trades went without an update this cycle
    pub fn blocks_trade_update(&self) -> bool {
        matches!(
            self,
            ScanError::PriceUnavailable { .. } | ScanError::InvalidPrice { .. }
        )
    }
}

impl From<TrackerError> for ScanError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::InvalidPrice { symbol, price } => ScanError::InvalidPrice { symbol, price },
            TrackerError::MissingTrade(id) => ScanError::MissingTrade(id),
            other => ScanError::TradeRejected(other),
        }
    }
}
