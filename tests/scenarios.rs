mod common;

use approx::assert_relative_eq;
use chrono::Duration;
use common::*;
use trend_signals::{
    CloseReason, ConfigError, EntryMode, NullObserver, RecordingObserver, StrategyConfig, Timeframe, TradeSignal,
    Trend, TrendTrader,
};

fn rising_prices() -> Vec<f64> {
    let mut prices = vec![100.0; 20];
    prices.extend((1..=60).map(|i| 100.0 + 0.5 * i as f64));
    prices
}

#[test]
fn test_rising_series_single_entry_then_take_profit() {
    let mut config = quick_config(Timeframe::M30);
    config.entry.mode = EntryMode::Immediate;
    config.entry.gates.direction_change = true;

    let mut trader = TrendTrader::vidya(config, NullObserver).unwrap();
    let signals = trader.warm_up(&ticks_for_bars(&rising_prices(), Timeframe::M30));

    let opens: Vec<_> = signals.iter().filter(|s| s.is_entry()).collect();
    assert_eq!(opens.len(), 1, "signals: {:?}", signals);
    let TradeSignal::OpenLong(entry) = opens[0] else {
        panic!("expected OpenLong, got {:?}", opens[0]);
    };
    // The first rising bar (index 20) crosses the upper band; it completes
    // on the first tick of bar 21, which opens at 101.0
    assert_eq!(entry.timestamp, start() + Duration::minutes(21 * 30));
    assert_eq!(entry.price, 101.0);
    assert_relative_eq!(entry.take_profit, 101.0 * 1.014, epsilon = 1e-9);

    let exits: Vec<_> = signals.iter().filter_map(|s| s.exit()).collect();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].reason, CloseReason::TakeProfit);
    assert_relative_eq!(exits[0].price, entry.take_profit);
    assert!(exits[0].profit_loss > 0.0);
    assert!(signals.iter().all(|s| !matches!(s, TradeSignal::OpenShort(_))));

    let summary = trader.summary();
    assert_eq!(summary.total_trades, 1);
    assert_eq!(summary.wins, 1);
}

#[test]
fn test_flat_series_with_angle_entry_never_trades() {
    let mut config = quick_config(Timeframe::M30);
    config.trend_angle.enabled = true;

    let mut trader = TrendTrader::vidya(config, NullObserver).unwrap();
    let signals = trader.warm_up(&ticks_for_bars(&[100.0; 100], Timeframe::M30));

    assert!(signals.is_empty(), "unexpected signals: {:?}", signals);
    assert!(trader.is_flat());
    assert_eq!(trader.summary().total_trades, 0);
}

#[test]
fn test_losing_exit_locks_until_fifth_boundary() {
    let config = StrategyConfig {
        timeframe: Timeframe::M30,
        entry: trend_signals::EntryConfig {
            mode: EntryMode::Immediate,
            ..Default::default()
        },
        ..Default::default()
    };
    let source = ScriptedSource::trending(Trend::Up, 95.0, 110.0);
    let mut trader = TrendTrader::try_new(config, source, RecordingObserver::default()).unwrap();

    let mut signals = Vec::new();
    let mut ts = at(9, 0);
    while ts < at(10, 0) {
        signals.extend(trader.update(&tick_at(ts, 100.0)).signals);
        ts += Duration::minutes(1);
    }
    assert!(matches!(signals.last(), Some(TradeSignal::OpenLong(_))));

    // Boundary tick at 10:00 trades through the band
    let out = trader.update(&trend_signals::Bar::new(at(10, 0), 99.0, 99.0, 94.0, 94.5, 1.0));
    let exit = out.signals.iter().find_map(|s| s.exit()).unwrap();
    assert_eq!(exit.reason, CloseReason::BandStop);
    assert!(exit.profit_loss < 0.0);
    assert_eq!(trader.lock_state().locked_until, Some(at(12, 30)));

    let mut later = Vec::new();
    let mut ts = at(10, 1);
    while ts <= at(13, 0) {
        later.extend(trader.update(&tick_at(ts, 100.0)).signals);
        ts += Duration::minutes(1);
    }
    let first_entry = later.iter().find(|s| s.is_entry()).unwrap();
    assert_eq!(first_entry.timestamp(), at(12, 30));

    let events = &trader.observer().events;
    assert!(events.iter().any(|e| e.starts_with("locked")));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = StrategyConfig {
        position_size_pct: 150.0,
        ..Default::default()
    };
    let err = TrendTrader::vidya(config, NullObserver).err().unwrap();
    assert!(matches!(err, ConfigError::OutOfRange { field: "position_size_pct", .. }));
}

#[test]
fn test_out_of_order_ticks_are_reported() {
    let mut trader = TrendTrader::sar(quick_config(Timeframe::M5), RecordingObserver::default()).unwrap();
    trader.update(&tick_at(at(9, 10), 100.0));
    let out = trader.update(&tick_at(at(9, 5), 100.0));
    assert!(out.signals.is_empty());
    assert_eq!(trader.observer().events.len(), 1);
}

#[test]
fn test_signals_serialize_as_json_lines() {
    let mut config = quick_config(Timeframe::M30);
    config.entry.mode = EntryMode::Immediate;
    config.entry.gates.direction_change = true;
    let mut trader = TrendTrader::vidya(config, NullObserver).unwrap();
    let signals = trader.warm_up(&ticks_for_bars(&rising_prices(), Timeframe::M30));

    let line = serde_json::to_string(&signals[0]).unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["kind"], "OpenLong");
    assert_eq!(value["trigger"], "Trend");
}
