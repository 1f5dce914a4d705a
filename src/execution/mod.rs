// Scan loop, data recovery and trade lifecycle tracking
pub mod price_cache;
pub mod price_resolver;
pub mod retry;
pub mod scanner;
pub mod trade_tracker;

pub use price_cache::{CachedPrice, PriceCache};
pub use price_resolver::{PriceResolution, PriceResolver, PriceSource};
pub use retry::{RetryAttempt, RetryOrchestrator, RetryOutcome};
pub use scanner::{CycleReport, ScanContext, ScanLoop};
pub use trade_tracker::{
    CloseReason, TrackerError, Trade, TradeEvent, TradeEventKind, TradeRules, TradeStatus,
    TradeTracker, UpdateReport,
};
