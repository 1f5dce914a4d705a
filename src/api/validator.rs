use super::FetchError;
use crate::models::{Candle, CandleBatch};

/// Validates OHLC candle data before it reaches the scanner
pub struct CandleValidator;

impl CandleValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a whole batch. Any bad candle rejects the batch.
    pub fn validate_batch(&self, batch: &CandleBatch) -> Result<(), FetchError> {
        if batch.is_empty() {
            return Err(FetchError::Empty {
                symbol: batch.symbol.clone(),
                timeframe: batch.timeframe,
            });
        }

        for (index, candle) in batch.candles.iter().enumerate() {
            if candle.symbol != batch.symbol {
                return Err(malformed(format!(
                    "Candle {} belongs to {} not {}",
                    index, candle.symbol, batch.symbol
                )));
            }
            self.validate(candle)
                .map_err(|e| malformed(format!("Candle {}: {}", index, e)))?;
        }

        if !batch.is_strictly_increasing() {
            return Err(malformed(
                "Candle timestamps are not strictly increasing".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a single candle
    pub fn validate(&self, candle: &Candle) -> Result<(), String> {
        self.validate_prices(candle)?;
        self.validate_ohlc_relationship(candle)?;
        Ok(())
    }

    /// Validate that all prices are positive and finite
    fn validate_prices(&self, candle: &Candle) -> Result<(), String> {
        for (name, value) in [
            ("open", candle.open),
            ("high", candle.high),
            ("low", candle.low),
            ("close", candle.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("Invalid {} price: {}", name, value));
            }
        }
        // Volume can be 0.0 on quiet intervals
        if !candle.volume.is_finite() || candle.volume < 0.0 {
            return Err(format!("Invalid volume: {}", candle.volume));
        }
        Ok(())
    }

    /// Validate OHLC relationships (high >= low, etc.)
    fn validate_ohlc_relationship(&self, candle: &Candle) -> Result<(), String> {
        if candle.high < candle.low {
            return Err(format!(
                "High ({}) is less than low ({})",
                candle.high, candle.low
            ));
        }
        if candle.high < candle.open.max(candle.close) {
            return Err(format!(
                "High ({}) is less than open/close ({}/{})",
                candle.high, candle.open, candle.close
            ));
        }
        if candle.low > candle.open.min(candle.close) {
            return Err(format!(
                "Low ({}) is greater than open/close ({}/{})",
                candle.low, candle.open, candle.close
            ));
        }
        Ok(())
    }
}

impl Default for CandleValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn malformed(message: String) -> FetchError {
    FetchError::Malformed(message)
}
