use std::collections::HashMap;

use crate::models::Timeframe;

/// Maximum allowed candle age per timeframe, in seconds
///
/// Built once at startup and shared read-only between scan loops.
#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessThresholds {
    max_age_secs: HashMap<Timeframe, f64>,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self::from_pairs([
            (Timeframe::M1, 90),
            (Timeframe::M3, 270),
            (Timeframe::M5, 420),
            (Timeframe::M15, 1_200),
            (Timeframe::M30, 2_400),
            (Timeframe::H1, 5_400),
            (Timeframe::H4, 16_200),
            (Timeframe::D1, 93_600),
        ])
    }
}

impl FreshnessThresholds {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Timeframe, u64)>) -> Self {
        Self {
            max_age_secs: pairs
                .into_iter()
                .map(|(tf, secs)| (tf, secs as f64))
                .collect(),
        }
    }

    /// Threshold for a timeframe. `None` means unconfigured, which evaluates as stale.
    pub fn max_age_secs(&self, timeframe: Timeframe) -> Option<f64> {
        self.max_age_secs.get(&timeframe).copied()
    }

    /// Override or add a single entry
    pub fn with(mut self, timeframe: Timeframe, secs: u64) -> Self {
        self.max_age_secs.insert(timeframe, secs as f64);
        self
    }

    pub fn timeframes(&self) -> impl Iterator<Item = Timeframe> + '_ {
        self.max_age_secs.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let thresholds = FreshnessThresholds::default();
        assert_eq!(thresholds.max_age_secs(Timeframe::M1), Some(90.0));
        assert_eq!(thresholds.max_age_secs(Timeframe::M5), Some(420.0));
        assert_eq!(thresholds.max_age_secs(Timeframe::H1), Some(5_400.0));
        assert_eq!(thresholds.timeframes().count(), Timeframe::ALL.len());
    }

    #[test]
    fn test_override() {
        let thresholds = FreshnessThresholds::from_pairs([(Timeframe::M1, 90)])
            .with(Timeframe::M1, 120)
            .with(Timeframe::H4, 20_000);
        assert_eq!(thresholds.max_age_secs(Timeframe::M1), Some(120.0));
        assert_eq!(thresholds.max_age_secs(Timeframe::H4), Some(20_000.0));
        assert_eq!(thresholds.max_age_secs(Timeframe::D1), None);
    }
}
