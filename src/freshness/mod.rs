// Data freshness classification
pub mod evaluator;
pub mod thresholds;

pub use evaluator::{Freshness, FreshnessEvaluator};
pub use thresholds::FreshnessThresholds;
