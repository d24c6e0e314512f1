//! Observer hooks for trader state transitions.
//!
//! The trader reports what it decided through this trait and never reads
//! anything back, so swapping observers cannot change a replay.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::signals::{EntrySignal, ExitSignal, StopUpdate};
use super::trend_source::Direction;

pub trait TraderObserver {
    fn on_entry(&mut self, _direction: Direction, _entry: &EntrySignal) {}

    fn on_exit(&mut self, _direction: Direction, _exit: &ExitSignal) {}

    fn on_stop_update(&mut self, _update: &StopUpdate) {}

    /// A pullback target was set (or moved) for a pending entry.
    fn on_target_armed(&mut self, _direction: Direction, _price: f64, _at: DateTime<Utc>) {}

    fn on_target_cleared(&mut self, _at: DateTime<Utc>) {}

    /// Take profit touched with strong flow; waiting for the stronger target.
    fn on_take_profit_deferred(&mut self, _direction: Direction, _flow: f64, _target: f64) {}

    fn on_entry_rejected(&mut self, _direction: Direction, _gate: &'static str) {}

    fn on_locked(&mut self, _until: DateTime<Utc>) {}

    fn on_unlocked(&mut self, _at: DateTime<Utc>) {}

    fn on_tick_rejected(&mut self, _tick: DateTime<Utc>, _last: DateTime<Utc>) {}
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl TraderObserver for NullObserver {}

/// Writes events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TraderObserver for TracingObserver {
    fn on_entry(&mut self, direction: Direction, entry: &EntrySignal) {
        info!(
            "ENTRY: {} @ {:.2} | Stop: {:.2} | Target: {:.2} | Size: {:.4} (${:.2}) | {:?}",
            direction, entry.price, entry.stop_loss, entry.take_profit, entry.shares, entry.invested_amount, entry.trigger
        );
    }

    fn on_exit(&mut self, direction: Direction, exit: &ExitSignal) {
        let outcome = if exit.profit_loss > 0.0 { "WIN" } else { "LOSS" };
        info!(
            "EXIT {}: {} @ {:.2} | P&L: ${:+.2} | {}",
            exit.reason, direction, exit.price, exit.profit_loss, outcome
        );
    }

    fn on_stop_update(&mut self, update: &StopUpdate) {
        debug!(
            "Stop updated: {} {:.2} -> {:.2}",
            update.direction, update.previous, update.stop_loss
        );
    }

    fn on_target_armed(&mut self, direction: Direction, price: f64, at: DateTime<Utc>) {
        info!("TARGET: {} entry @ {:.2} (set {})", direction, price, at);
    }

    fn on_target_cleared(&mut self, at: DateTime<Utc>) {
        debug!("Target cleared at {}", at);
    }

    fn on_take_profit_deferred(&mut self, direction: Direction, flow: f64, target: f64) {
        info!(
            "TP DEFERRED: {} | flow {:+.2}% waiting for {:+.2}%",
            direction,
            flow * 100.0,
            target * 100.0
        );
    }

    fn on_entry_rejected(&mut self, direction: Direction, gate: &'static str) {
        debug!("{} entry rejected by {}", direction, gate);
    }

    fn on_locked(&mut self, until: DateTime<Utc>) {
        info!("LOCKED until {}", until);
    }

    fn on_unlocked(&mut self, at: DateTime<Utc>) {
        debug!("Unlocked at {}", at);
    }

    fn on_tick_rejected(&mut self, tick: DateTime<Utc>, last: DateTime<Utc>) {
        warn!("Ignoring out-of-order tick {} (last {})", tick, last);
    }
}

/// Collects event names, for tests
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    pub events: Vec<String>,
}

impl TraderObserver for RecordingObserver {
    fn on_entry(&mut self, direction: Direction, entry: &EntrySignal) {
        self.events.push(format!("entry {} {:.2}", direction, entry.price));
    }

    fn on_exit(&mut self, direction: Direction, exit: &ExitSignal) {
        self.events.push(format!("exit {} {}", direction, exit.reason));
    }

    fn on_take_profit_deferred(&mut self, direction: Direction, _flow: f64, _target: f64) {
        self.events.push(format!("deferred {}", direction));
    }

    fn on_locked(&mut self, until: DateTime<Utc>) {
        self.events.push(format!("locked {}", until));
    }

    fn on_tick_rejected(&mut self, tick: DateTime<Utc>, _last: DateTime<Utc>) {
        self.events.push(format!("rejected {}", tick));
    }
}
