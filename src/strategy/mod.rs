// Signal detection seam. Detectors themselves live outside this crate.
use serde::{Deserialize, Serialize};

use crate::models::{CandleBatch, Direction, Momentum};

/// Levels for a new trade proposed by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    #[serde(default)]
    pub extended_take_profit: Option<f64>,
}

/// Base trait for strategy detectors plugged into a scan loop
///
/// Only consulted with fresh data.
pub trait SignalDetector: Send + Sync {
    /// Propose a trade from the latest candles, if the setup is present
    fn detect(&self, batch: &CandleBatch) -> Option<TradeSignal>;

    /// Summarise momentum for open-trade notifications
    fn momentum(&self, _batch: &CandleBatch) -> Momentum {
        Momentum::Neutral
    }

    /// Detector name for logs
    fn name(&self) -> &str;
}
