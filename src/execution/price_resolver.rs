use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::PriceCache;

pub const DEFAULT_CACHE_MAX_AGE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceSource {
    Live,
    Cached,
    Unavailable,
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceSource::Live => f.write_str("LIVE"),
            PriceSource::Cached => f.write_str("CACHED"),
            PriceSource::Unavailable => f.write_str("UNAVAILABLE"),
        }
    }
}

/// Price chosen for trade evaluation, tagged with where it came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceResolution {
    pub price: Option<f64>,
    pub source: PriceSource,
    /// Age of the cached entry when `source` is `Cached`
    pub cache_age_seconds: Option<f64>,
}

impl PriceResolution {
    fn unavailable() -> Self {
        Self {
            price: None,
            source: PriceSource::Unavailable,
            cache_age_seconds: None,
        }
    }
}

/// Picks the best available price: live fresh candle, then a recent cached
/// price, then nothing. Independent of signal-detection freshness so trade
/// monitoring keeps running when indicator work is skipped.
#[derive(Clone)]
pub struct PriceResolver {
    cache: PriceCache,
    max_cache_age: Duration,
}

impl PriceResolver {
    pub fn new(cache: PriceCache, max_cache_age: Duration) -> Self {
        Self {
            cache,
            max_cache_age,
        }
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Resolve a price for `symbol`.
    ///
    /// `fresh_close` is the latest close of the primary timeframe, passed
    /// only when that candle was judged fresh. Taking it refreshes the cache.
    pub fn resolve(
        &self,
        symbol: &str,
        fresh_close: Option<f64>,
        now: DateTime<Utc>,
    ) -> PriceResolution {
        if let Some(price) = fresh_close {
            if price.is_finite() && price > 0.0 {
                self.cache.store(symbol, price, now);
                return PriceResolution {
                    price: Some(price),
                    source: PriceSource::Live,
                    cache_age_seconds: None,
                };
            }
            tracing::warn!(symbol = %symbol, "Ignoring unusable live price {}", price);
        }

        if let Some(cached) = self.cache.get(symbol) {
            let age = now - cached.observed_at;
            // Ceiling is exclusive: an entry exactly at the limit is expired
            if age < self.max_cache_age {
                return PriceResolution {
                    price: Some(cached.price),
                    source: PriceSource::Cached,
                    cache_age_seconds: Some(cached.age_seconds(now)),
                };
            }
            tracing::debug!(
                symbol = %symbol,
                "Cached price expired ({:.0}s old)",
                cached.age_seconds(now)
            );
        }

        PriceResolution::unavailable()
    }
}

impl Default for PriceResolver {
    fn default() -> Self {
        Self::new(
            PriceCache::new(),
            Duration::seconds(DEFAULT_CACHE_MAX_AGE_SECS),
        )
    }
}
