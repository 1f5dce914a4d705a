use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Last confirmed-fresh price for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachedPrice {
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl CachedPrice {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.observed_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Thread-safe last-known-price store, one entry per symbol
///
/// Clones share the same map, so scan loops for different timeframes of one
/// symbol see each other's writes.
#[derive(Clone, Default)]
pub struct PriceCache {
    data: Arc<RwLock<HashMap<String, CachedPrice>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for a symbol
    pub fn store(&self, symbol: &str, price: f64, observed_at: DateTime<Utc>) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(symbol.to_string(), CachedPrice { price, observed_at });
    }

    pub fn get(&self, symbol: &str) -> Option<CachedPrice> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(symbol).copied()
    }
}
