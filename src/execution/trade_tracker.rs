use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::{Direction, Momentum};
use crate::strategy::TradeSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Active,
    Extended,
    ClosedTarget,
    ClosedStop,
}

impl TradeStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, TradeStatus::ClosedTarget | TradeStatus::ClosedStop)
    }

    /// Forward-only transitions; closed states are terminal
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        matches!(
            (self, next),
            (TradeStatus::Active, TradeStatus::Extended)
                | (TradeStatus::Active, TradeStatus::ClosedTarget)
                | (TradeStatus::Active, TradeStatus::ClosedStop)
                | (TradeStatus::Extended, TradeStatus::ClosedTarget)
                | (TradeStatus::Extended, TradeStatus::ClosedStop)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    Target,
    Stop,
}

impl CloseReason {
    fn status(&self) -> TradeStatus {
        match self {
            CloseReason::Target => TradeStatus::ClosedTarget,
            CloseReason::Stop => TradeStatus::ClosedStop,
        }
    }

    fn event(&self) -> TradeEventKind {
        match self {
            CloseReason::Target => TradeEventKind::TargetHit,
            CloseReason::Stop => TradeEventKind::StopHit,
        }
    }
}

/// A tracked position, from signal to closure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub extended_take_profit: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub status: TradeStatus,
    #[serde(default)]
    pub breakeven_notified: bool,
    #[serde(default)]
    pub target_notified: bool,
    #[serde(default)]
    pub stop_warning_sent: bool,
    #[serde(default)]
    pub extension_notified: bool,
    #[serde(default)]
    pub reversal_notified: bool,
    #[serde(default)]
    pub last_price: Option<f64>,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub realized_pnl_pct: Option<f64>,
}

impl Trade {
    /// Target currently in force
    pub fn active_target(&self) -> f64 {
        match (self.status, self.extended_take_profit) {
            (TradeStatus::Extended, Some(extended)) => extended,
            _ => self.take_profit,
        }
    }

    /// P&L as a percentage of entry at `price`
    pub fn pnl_pct(&self, price: f64) -> f64 {
        let raw = match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        };
        raw / self.entry_price * 100.0
    }

    fn target_hit(&self, price: f64) -> bool {
        let target = self.active_target();
        match self.direction {
            Direction::Long => price >= target,
            Direction::Short => price <= target,
        }
    }

    fn stop_hit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    /// Fraction of the entry→take_profit distance covered
    fn progress_to_target(&self, price: f64) -> f64 {
        self.progress_toward(self.take_profit, price)
    }

    /// Fraction of the entry→active target distance covered
    fn progress_to_active_target(&self, price: f64) -> f64 {
        self.progress_toward(self.active_target(), price)
    }

    fn progress_toward(&self, target: f64, price: f64) -> f64 {
        let span = (target - self.entry_price).abs();
        match self.direction {
            Direction::Long => (price - self.entry_price) / span,
            Direction::Short => (self.entry_price - price) / span,
        }
    }

    /// Fraction of the entry→stop distance covered
    fn progress_to_stop(&self, price: f64) -> f64 {
        let span = (self.entry_price - self.stop_loss).abs();
        match self.direction {
            Direction::Long => (self.entry_price - price) / span,
            Direction::Short => (price - self.entry_price) / span,
        }
    }

    fn advance(&mut self, next: TradeStatus) {
        debug_assert!(self.status.can_transition_to(next));
        self.status = next;
    }
}

/// Thresholds for the non-closing notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeRules {
    pub extension_progress: f64,
    pub breakeven_progress: f64,
    pub stop_warning_progress: f64,
    pub max_active_per_symbol: usize,
}

impl Default for TradeRules {
    fn default() -> Self {
        Self {
            extension_progress: 0.8,
            breakeven_progress: 0.5,
            stop_warning_progress: 0.75,
            max_active_per_symbol: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeEventKind {
    Opened,
    TargetHit,
    StopHit,
    Extended,
    MomentumReversal,
    Breakeven,
    StopWarning,
}

impl TradeEventKind {
    pub fn title(&self) -> &'static str {
        match self {
            TradeEventKind::Opened => "🆕 NEW TRADE",
            TradeEventKind::TargetHit => "🎯 TARGET HIT",
            TradeEventKind::StopHit => "🛑 STOP HIT",
            TradeEventKind::Extended => "🚀 TARGET EXTENDED",
            TradeEventKind::MomentumReversal => "↩️ MOMENTUM REVERSAL",
            TradeEventKind::Breakeven => "🔒 MOVE STOP TO BREAKEVEN",
            TradeEventKind::StopWarning => "⚠️ STOP WARNING",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            TradeEventKind::Opened => "trade_opened",
            TradeEventKind::TargetHit => "target_hit",
            TradeEventKind::StopHit => "stop_hit",
            TradeEventKind::Extended => "target_extended",
            TradeEventKind::MomentumReversal => "momentum_reversal",
            TradeEventKind::Breakeven => "breakeven",
            TradeEventKind::StopWarning => "stop_warning",
        }
    }
}

/// A lifecycle event that should reach a human exactly once
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub trade_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub kind: TradeEventKind,
    pub price: f64,
    pub pnl_pct: f64,
    pub at: DateTime<Utc>,
}

impl TradeEvent {
    fn new(trade: &Trade, kind: TradeEventKind, price: f64, at: DateTime<Utc>) -> Self {
        Self {
            trade_id: trade.trade_id.clone(),
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            kind,
            price,
            pnl_pct: trade.pnl_pct(price),
            at,
        }
    }

    pub fn message(&self) -> String {
        format!(
            "{} {} {} @ {:.4} ({:+.2}%) [{}]",
            self.kind.title(),
            self.symbol,
            self.direction,
            self.price,
            self.pnl_pct,
            self.trade_id
        )
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    #[error("invalid price {price} for {symbol}: update pass aborted")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("trade {0} is not active")]
    MissingTrade(String),

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("{symbol} already has {limit} active trades")]
    TooManyOpenTrades { symbol: String, limit: usize },
}

/// Result of one update pass over a symbol's trades
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub symbol: String,
    pub price: f64,
    pub evaluated: usize,
    pub closed: Vec<String>,
    pub events: Vec<TradeEvent>,
}

/// Non-closing checks, evaluated in this order; the first that fires ends
/// the pass for that trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecondaryCheck {
    Extension,
    MomentumReversal,
    Breakeven,
    StopWarning,
}

const SECONDARY_ORDER: [SecondaryCheck; 4] = [
    SecondaryCheck::Extension,
    SecondaryCheck::MomentumReversal,
    SecondaryCheck::Breakeven,
    SecondaryCheck::StopWarning,
];

/// Owns every open trade and drives the lifecycle state machine.
///
/// Closed trades leave the active list for a read-only archive and are never
/// evaluated again.
pub struct TradeTracker {
    active: Vec<Trade>,
    closed: Vec<Trade>,
    rules: TradeRules,
    last_update_at: Option<DateTime<Utc>>,
}

impl TradeTracker {
    pub fn new(rules: TradeRules) -> Self {
        Self {
            active: Vec::new(),
            closed: Vec::new(),
            rules,
            last_update_at: None,
        }
    }

    /// Create a tracker and restore previously saved trades
    ///
    /// Trades go through the same level checks as new signals. Invalid trades
    /// and duplicate ids are dropped, keeping the first occurrence.
    pub fn with_trades(rules: TradeRules, trades: Vec<Trade>) -> Self {
        let mut tracker = Self::new(rules);
        for trade in trades {
            if tracker.contains_id(&trade.trade_id) {
                tracing::warn!("Skipping duplicate trade {}", trade.trade_id);
                continue;
            }
            if let Err(e) = validate_restored(&trade) {
                tracing::warn!("Skipping trade {}: {}", trade.trade_id, e);
                continue;
            }
            if trade.status.is_closed() {
                tracker.closed.push(trade);
            } else {
                tracker.active.push(trade);
            }
        }

        tracing::info!(
            "Restored {} active and {} closed trades",
            tracker.active.len(),
            tracker.closed.len()
        );

        tracker
    }

    pub fn active_trades(&self) -> &[Trade] {
        &self.active
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed
    }

    pub fn is_active(&self, trade_id: &str) -> bool {
        self.active.iter().any(|t| t.trade_id == trade_id)
    }

    /// Look up a trade in either collection
    pub fn get(&self, trade_id: &str) -> Option<&Trade> {
        self.active
            .iter()
            .chain(self.closed.iter())
            .find(|t| t.trade_id == trade_id)
    }

    /// Time of the last successful update pass
    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        self.last_update_at
    }

    fn contains_id(&self, trade_id: &str) -> bool {
        self.get(trade_id).is_some()
    }

    /// Build an id from symbol, direction and a microsecond timestamp,
    /// nudging the timestamp forward until it is unused.
    fn allocate_id(
        &self,
        symbol: &str,
        direction: Direction,
        created_at: DateTime<Utc>,
    ) -> (String, DateTime<Utc>) {
        let mut ts = created_at;
        loop {
            let id = format!(
                "{}_{}_{}",
                symbol,
                direction,
                ts.format("%Y%m%dT%H%M%S%.6f")
            );
            if !self.contains_id(&id) {
                return (id, ts);
            }
            ts += Duration::microseconds(1);
        }
    }

    /// Open a trade from a signal (live)
    pub fn open_trade(&mut self, signal: TradeSignal) -> Result<TradeEvent, TrackerError> {
        self.open_trade_at(signal, None)
    }

    /// Open a trade with an explicit creation time
    pub fn open_trade_at(
        &mut self,
        signal: TradeSignal,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<TradeEvent, TrackerError> {
        validate_signal(&signal)?;

        let open_for_symbol = self
            .active
            .iter()
            .filter(|t| t.symbol == signal.symbol)
            .count();
        if open_for_symbol >= self.rules.max_active_per_symbol {
            return Err(TrackerError::TooManyOpenTrades {
                symbol: signal.symbol,
                limit: self.rules.max_active_per_symbol,
            });
        }

        let (trade_id, created_at) = self.allocate_id(
            &signal.symbol,
            signal.direction,
            created_at.unwrap_or_else(Utc::now),
        );

        let trade = Trade {
            trade_id,
            symbol: signal.symbol,
            direction: signal.direction,
            entry_price: signal.entry_price,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            extended_take_profit: signal.extended_take_profit,
            created_at,
            status: TradeStatus::Active,
            breakeven_notified: false,
            target_notified: false,
            stop_warning_sent: false,
            extension_notified: false,
            reversal_notified: false,
            last_price: None,
            exit_price: None,
            closed_at: None,
            realized_pnl_pct: None,
        };

        tracing::info!(
            "Opened {} {} @ {:.4} (stop {:.4}, target {:.4}) as {}",
            trade.direction,
            trade.symbol,
            trade.entry_price,
            trade.stop_loss,
            trade.take_profit,
            trade.trade_id
        );

        let event = TradeEvent::new(&trade, TradeEventKind::Opened, trade.entry_price, created_at);
        self.active.push(trade);
        Ok(event)
    }

    /// Advance every active trade on `symbol` against one price snapshot.
    ///
    /// An invalid price aborts the whole pass before any trade is touched.
    pub fn update(
        &mut self,
        symbol: &str,
        price: f64,
        momentum: Momentum,
        now: DateTime<Utc>,
    ) -> Result<UpdateReport, TrackerError> {
        if !price.is_finite() || price <= 0.0 {
            return Err(TrackerError::InvalidPrice {
                symbol: symbol.to_string(),
                price,
            });
        }

        let mut report = UpdateReport {
            symbol: symbol.to_string(),
            price,
            ..UpdateReport::default()
        };

        let trade_ids: Vec<String> = self
            .active
            .iter()
            .filter(|t| t.symbol == symbol)
            .map(|t| t.trade_id.clone())
            .collect();

        for trade_id in trade_ids {
            let Some(index) = self.active.iter().position(|t| t.trade_id == trade_id) else {
                tracing::warn!("{}", TrackerError::MissingTrade(trade_id));
                continue;
            };
            report.evaluated += 1;

            let trade = &mut self.active[index];
            trade.last_price = Some(price);

            let close_reason = if trade.target_hit(price) {
                Some(CloseReason::Target)
            } else if trade.stop_hit(price) {
                Some(CloseReason::Stop)
            } else {
                None
            };

            if let Some(reason) = close_reason {
                let event = self.close_at_index(index, price, reason, now);
                report.closed.push(event.trade_id.clone());
                report.events.push(event);
                continue;
            }

            if let Some(kind) = evaluate_secondary(trade, price, momentum, &self.rules) {
                tracing::info!("{} {} @ {:.4}", kind.title(), trade.trade_id, price);
                report.events.push(TradeEvent::new(trade, kind, price, now));
            }
        }

        self.last_update_at = Some(now);
        Ok(report)
    }

    /// Close an active trade outside the price pass.
    ///
    /// Closing an id that is no longer active is a no-op reported as
    /// `MissingTrade`, so racing closures stay idempotent.
    pub fn close_trade(
        &mut self,
        trade_id: &str,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<TradeEvent, TrackerError> {
        let index = self
            .active
            .iter()
            .position(|t| t.trade_id == trade_id)
            .ok_or_else(|| TrackerError::MissingTrade(trade_id.to_string()))?;

        if !price.is_finite() || price <= 0.0 {
            return Err(TrackerError::InvalidPrice {
                symbol: self.active[index].symbol.clone(),
                price,
            });
        }

        Ok(self.close_at_index(index, price, reason, now))
    }

    fn close_at_index(
        &mut self,
        index: usize,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> TradeEvent {
        let mut trade = self.active.remove(index);
        trade.advance(reason.status());
        trade.exit_price = Some(price);
        trade.closed_at = Some(now);
        trade.realized_pnl_pct = Some(trade.pnl_pct(price));
        trade.last_price = Some(price);
        if reason == CloseReason::Target {
            trade.target_notified = true;
        }

        tracing::info!(
            "{} {} closed @ {:.4} ({:+.2}%)",
            reason.event().title(),
            trade.trade_id,
            price,
            trade.pnl_pct(price)
        );

        let event = TradeEvent::new(&trade, reason.event(), price, now);
        self.closed.push(trade);
        event
    }
}

impl Default for TradeTracker {
    fn default() -> Self {
        Self::new(TradeRules::default())
    }
}

/// Run the secondary checks in priority order, setting the one-shot flag of
/// the first that fires.
fn evaluate_secondary(
    trade: &mut Trade,
    price: f64,
    momentum: Momentum,
    rules: &TradeRules,
) -> Option<TradeEventKind> {
    for check in SECONDARY_ORDER {
        match check {
            SecondaryCheck::Extension => {
                if !trade.extension_notified
                    && trade.status == TradeStatus::Active
                    && trade.extended_take_profit.is_some()
                    && momentum == Momentum::Strengthening
                    && trade.progress_to_target(price) >= rules.extension_progress
                {
                    trade.extension_notified = true;
                    trade.advance(TradeStatus::Extended);
                    return Some(TradeEventKind::Extended);
                }
            }
            SecondaryCheck::MomentumReversal => {
                if !trade.reversal_notified
                    && momentum == Momentum::Reversing
                    && trade.pnl_pct(price) > 0.0
                {
                    trade.reversal_notified = true;
                    return Some(TradeEventKind::MomentumReversal);
                }
            }
            SecondaryCheck::Breakeven => {
                if !trade.breakeven_notified
                    && trade.progress_to_active_target(price) >= rules.breakeven_progress
                {
                    trade.breakeven_notified = true;
                    return Some(TradeEventKind::Breakeven);
                }
            }
            SecondaryCheck::StopWarning => {
                if !trade.stop_warning_sent
                    && trade.progress_to_stop(price) >= rules.stop_warning_progress
                {
                    trade.stop_warning_sent = true;
                    return Some(TradeEventKind::StopWarning);
                }
            }
        }
    }
    None
}

fn validate_signal(signal: &TradeSignal) -> Result<(), TrackerError> {
    validate_levels(
        signal.direction,
        signal.entry_price,
        signal.stop_loss,
        signal.take_profit,
        signal.extended_take_profit,
    )
}

/// Level checks plus the state a saved trade must be consistent with
fn validate_restored(trade: &Trade) -> Result<(), TrackerError> {
    validate_levels(
        trade.direction,
        trade.entry_price,
        trade.stop_loss,
        trade.take_profit,
        trade.extended_take_profit,
    )?;

    if trade.status == TradeStatus::Extended && trade.extended_take_profit.is_none() {
        return Err(TrackerError::InvalidTrade(
            "extended trade has no extended target".to_string(),
        ));
    }
    Ok(())
}

fn validate_levels(
    direction: Direction,
    entry: f64,
    stop: f64,
    target: f64,
    extended_target: Option<f64>,
) -> Result<(), TrackerError> {
    if [entry, stop, target].iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(TrackerError::InvalidTrade(format!(
            "prices must be positive: entry {}, stop {}, target {}",
            entry, stop, target
        )));
    }

    let ordered = match direction {
        Direction::Long => stop < entry && entry < target,
        Direction::Short => stop > entry && entry > target,
    };
    if !ordered {
        return Err(TrackerError::InvalidTrade(format!(
            "{} levels out of order: stop {}, entry {}, target {}",
            direction, stop, entry, target
        )));
    }

    if let Some(extended) = extended_target {
        let beyond = match direction {
            Direction::Long => extended > target,
            Direction::Short => extended < target,
        };
        if !extended.is_finite() || !beyond {
            return Err(TrackerError::InvalidTrade(format!(
                "extended target {} must lie beyond target {}",
                extended, target
            )));
        }
    }

    Ok(())
}
