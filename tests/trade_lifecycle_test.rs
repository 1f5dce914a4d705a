use chrono::{Duration, Utc};
use tradewatch::execution::{TradeEventKind, TradeRules, TradeStatus, TradeTracker};
use tradewatch::{Direction, Momentum, Trade, TradeSignal};

fn long_signal(extended: Option<f64>) -> TradeSignal {
    TradeSignal {
        symbol: "SOLUSDT".to_string(),
        direction: Direction::Long,
        entry_price: 100.0,
        stop_loss: 95.0,
        take_profit: 110.0,
        extended_take_profit: extended,
    }
}

fn event_kinds(tracker: &mut TradeTracker, price: f64, momentum: Momentum) -> Vec<TradeEventKind> {
    tracker
        .update("SOLUSDT", price, momentum, Utc::now())
        .unwrap()
        .events
        .iter()
        .map(|e| e.kind)
        .collect()
}

#[test]
fn test_long_trade_full_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut tracker = TradeTracker::new(TradeRules::default());

    println!("1. Opening LONG @ 100 (stop 95, target 110)");
    let opened = tracker.open_trade(long_signal(None)).unwrap();
    assert_eq!(opened.kind, TradeEventKind::Opened);
    let id = opened.trade_id;

    println!("2. Drifting up: breakeven once");
    assert_eq!(event_kinds(&mut tracker, 105.0, Momentum::Neutral), vec![TradeEventKind::Breakeven]);
    assert!(event_kinds(&mut tracker, 106.0, Momentum::Neutral).is_empty());

    println!("3. Pullback toward stop: warning once");
    assert!(event_kinds(&mut tracker, 97.0, Momentum::Neutral).is_empty());
    assert_eq!(event_kinds(&mut tracker, 96.2, Momentum::Neutral), vec![TradeEventKind::StopWarning]);
    assert!(event_kinds(&mut tracker, 96.0, Momentum::Neutral).is_empty());

    println!("4. Target hit");
    assert_eq!(event_kinds(&mut tracker, 110.0, Momentum::Neutral), vec![TradeEventKind::TargetHit]);
    assert!(!tracker.is_active(&id));

    let closed = tracker.get(&id).unwrap().clone();
    assert_eq!(closed.status, TradeStatus::ClosedTarget);
    assert!(closed.target_notified);
    assert!(closed.breakeven_notified);
    assert!(closed.stop_warning_sent);
    assert_eq!(closed.realized_pnl_pct, Some(10.0));
    assert_eq!(closed.exit_price, Some(110.0));

    println!("5. Further prices never touch the closed trade");
    for price in [112.0, 120.0, 90.0] {
        let report = tracker.update("SOLUSDT", price, Momentum::Reversing, Utc::now()).unwrap();
        assert_eq!(report.evaluated, 0);
        assert!(report.events.is_empty());
    }
    assert_eq!(tracker.get(&id).unwrap(), &closed);
}

#[test]
fn test_extension_then_extended_target() {
    let mut tracker = TradeTracker::default();
    let id = tracker.open_trade(long_signal(Some(120.0))).unwrap().trade_id;

    assert_eq!(
        event_kinds(&mut tracker, 108.0, Momentum::Strengthening),
        vec![TradeEventKind::Extended]
    );
    assert_eq!(tracker.get(&id).unwrap().status, TradeStatus::Extended);

    // Original target no longer closes the trade
    let kinds = event_kinds(&mut tracker, 112.0, Momentum::Neutral);
    assert!(!kinds.contains(&TradeEventKind::TargetHit));
    assert!(tracker.is_active(&id));

    assert_eq!(
        event_kinds(&mut tracker, 120.0, Momentum::Neutral),
        vec![TradeEventKind::TargetHit]
    );
    assert_eq!(tracker.get(&id).unwrap().realized_pnl_pct, Some(20.0));
}

#[test]
fn test_short_trade_full_lifecycle() {
    let mut tracker = TradeTracker::default();
    let id = tracker
        .open_trade(TradeSignal {
            symbol: "SOLUSDT".to_string(),
            direction: Direction::Short,
            entry_price: 100.0,
            stop_loss: 104.0,
            take_profit: 92.0,
            extended_take_profit: Some(84.0),
        })
        .unwrap()
        .trade_id;

    println!("1. Adverse move toward the stop: warning once");
    assert_eq!(event_kinds(&mut tracker, 103.0, Momentum::Neutral), vec![TradeEventKind::StopWarning]);
    assert!(event_kinds(&mut tracker, 103.5, Momentum::Neutral).is_empty());

    println!("2. Strong move down: target extended to 84");
    assert_eq!(
        event_kinds(&mut tracker, 93.0, Momentum::Strengthening),
        vec![TradeEventKind::Extended]
    );

    println!("3. Through the original target: breakeven against 84, still open");
    assert_eq!(event_kinds(&mut tracker, 91.0, Momentum::Neutral), vec![TradeEventKind::Breakeven]);
    assert!(tracker.is_active(&id));

    println!("4. Reversal while in profit");
    assert_eq!(
        event_kinds(&mut tracker, 90.0, Momentum::Reversing),
        vec![TradeEventKind::MomentumReversal]
    );

    println!("5. Extended target hit");
    assert_eq!(event_kinds(&mut tracker, 84.0, Momentum::Neutral), vec![TradeEventKind::TargetHit]);
    let closed = tracker.get(&id).unwrap();
    assert_eq!(closed.status, TradeStatus::ClosedTarget);
    assert_eq!(closed.realized_pnl_pct, Some(16.0));
}

#[test]
fn test_several_trades_share_one_price_snapshot() {
    let mut tracker = TradeTracker::default();
    let now = Utc::now();

    let a = tracker.open_trade_at(long_signal(None), Some(now)).unwrap().trade_id;
    let b = tracker.open_trade_at(long_signal(None), Some(now)).unwrap().trade_id;
    let short = tracker
        .open_trade_at(
            TradeSignal {
                symbol: "SOLUSDT".to_string(),
                direction: Direction::Short,
                entry_price: 100.0,
                stop_loss: 104.0,
                take_profit: 90.0,
                extended_take_profit: None,
            },
            Some(now),
        )
        .unwrap()
        .trade_id;
    assert_ne!(a, b);

    // 104 stops the short and leaves both longs open
    let report = tracker.update("SOLUSDT", 104.0, Momentum::Neutral, now).unwrap();
    assert_eq!(report.evaluated, 3);
    assert_eq!(report.closed, vec![short.clone()]);
    assert_eq!(tracker.get(&short).unwrap().status, TradeStatus::ClosedStop);
    assert!(tracker.is_active(&a) && tracker.is_active(&b));
    assert!(tracker
        .active_trades()
        .iter()
        .all(|t| t.last_price == Some(104.0)));
}

#[test]
fn test_seed_and_archive_through_json() {
    let mut tracker = TradeTracker::default();
    let now = Utc::now() - Duration::hours(1);
    let id = tracker.open_trade_at(long_signal(None), Some(now)).unwrap().trade_id;
    tracker.update("SOLUSDT", 105.0, Momentum::Neutral, Utc::now()).unwrap();

    let json = serde_json::to_string(tracker.active_trades()).unwrap();
    let restored: Vec<Trade> = serde_json::from_str(&json).unwrap();
    let mut restored = TradeTracker::with_trades(TradeRules::default(), restored);

    // Flag survived the round trip, so no repeat notification
    assert!(restored.get(&id).unwrap().breakeven_notified);
    let report = restored.update("SOLUSDT", 106.0, Momentum::Neutral, Utc::now()).unwrap();
    assert!(report.events.is_empty());

    restored.update("SOLUSDT", 94.0, Momentum::Neutral, Utc::now()).unwrap();
    let archive = serde_json::to_value(restored.closed_trades()).unwrap();
    assert_eq!(archive[0]["status"], "CLOSED_STOP");
    assert_eq!(archive[0]["direction"], "LONG");
}
