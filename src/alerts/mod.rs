// Alert gating and delivery
pub mod dedup;
pub mod notifier;

pub use dedup::{AlertDeduplicator, AlertPolicy, FreshnessState};
pub use notifier::{AlertDispatcher, LogNotifier, Notifier, NotifyError};

use chrono::{DateTime, Utc};

use crate::execution::{TradeEvent, TradeEventKind};
use crate::models::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    StaleData,
    Recovered,
    TradeUpdateFailure,
    Trade(TradeEventKind),
}

impl AlertKind {
    pub fn tag(&self) -> &'static str {
        match self {
            AlertKind::StaleData => "stale_data",
            AlertKind::Recovered => "data_recovered",
            AlertKind::TradeUpdateFailure => "trade_update_failure",
            AlertKind::Trade(kind) => kind.tag(),
        }
    }
}

/// A message bound for the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
    pub message: String,
    pub tags: Vec<String>,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        symbol: Option<&str>,
        timeframe: Option<Timeframe>,
        message: String,
        at: DateTime<Utc>,
    ) -> Self {
        let mut tags = vec![kind.tag().to_string()];
        if let Some(symbol) = symbol {
            tags.push(symbol.to_string());
        }
        if let Some(timeframe) = timeframe {
            tags.push(timeframe.to_string());
        }
        Self {
            kind,
            symbol: symbol.map(str::to_string),
            timeframe,
            message,
            tags,
            at,
        }
    }

    /// Trade events bypass deduplication; the tracker's one-shot flags
    /// already guarantee each fires once.
    pub fn from_trade_event(event: &TradeEvent) -> Self {
        let mut alert = Self::new(
            AlertKind::Trade(event.kind),
            Some(&event.symbol),
            None,
            event.message(),
            event.at,
        );
        alert.tags.push(event.trade_id.clone());
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    #[test]
    fn test_alert_tags() {
        let alert = Alert::new(
            AlertKind::StaleData,
            Some("BTCUSDT"),
            Some(Timeframe::M1),
            "stale".to_string(),
            Utc::now(),
        );
        assert_eq!(alert.tags, vec!["stale_data", "BTCUSDT", "1m"]);

        let global = Alert::new(
            AlertKind::TradeUpdateFailure,
            None,
            None,
            "failing".to_string(),
            Utc::now(),
        );
        assert_eq!(global.tags, vec!["trade_update_failure"]);
    }

    #[test]
    fn test_from_trade_event() {
        let event = TradeEvent {
            trade_id: "BTCUSDT_LONG_1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            kind: TradeEventKind::TargetHit,
            price: 110.0,
            pnl_pct: 10.0,
            at: Utc::now(),
        };

        let alert = Alert::from_trade_event(&event);
        assert_eq!(alert.kind, AlertKind::Trade(TradeEventKind::TargetHit));
        assert_eq!(alert.message, event.message());
        assert_eq!(alert.tags, vec!["target_hit", "BTCUSDT", "BTCUSDT_LONG_1"]);
    }
}
