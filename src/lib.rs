// Core modules
pub mod alerts;
pub mod api;
pub mod config;
pub mod errors;
pub mod execution;
pub mod freshness;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use alerts::{Alert, AlertDeduplicator, AlertDispatcher, LogNotifier, Notifier};
pub use api::{BinanceKlinesClient, FetchError, Fetcher};
pub use config::ScannerConfig;
pub use errors::ScanError;
pub use execution::{
    PriceResolver, PriceSource, RetryOrchestrator, ScanContext, ScanLoop, Trade, TradeTracker,
};
pub use freshness::{Freshness, FreshnessEvaluator, FreshnessThresholds};
pub use models::*;
pub use strategy::{SignalDetector, TradeSignal};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
