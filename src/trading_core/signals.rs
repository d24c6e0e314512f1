//! Signals, positions and the post-exit lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::bars::Timeframe;
use super::trend_source::Direction;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CloseReason {
    /// Fixed take-profit level touched with no strong continuation flow
    TakeProfit,
    /// Deferred take profit confirmed by the stronger flow target
    FlowTakeProfit,
    /// Deferred take profit abandoned as price came back through the level
    TakeProfitReversal,
    /// Price traded through the exit band
    BandStop,
    /// Hard max-loss level hit
    MaxLoss,
    /// Price crossed the long-period trend filter while losing
    TrendFilter,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "take profit",
            CloseReason::FlowTakeProfit => "flow take profit",
            CloseReason::TakeProfitReversal => "take profit reversal",
            CloseReason::BandStop => "band stop",
            CloseReason::MaxLoss => "max loss",
            CloseReason::TrendFilter => "trend filter",
        };
        f.write_str(s)
    }
}

/// How a position came to be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryTrigger {
    /// Trend gates passed, filled at the reference price
    Trend,
    /// Pending pullback target touched
    Pullback,
    /// Trend-angle classifier
    Angle,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySignal {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_loss: Option<f64>,
    /// Cash committed after the opening fee
    pub invested_amount: f64,
    pub shares: f64,
    pub trigger: EntryTrigger,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitSignal {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub reason: CloseReason,
    /// Realized P&L net of the closing fee
    pub profit_loss: f64,
    pub invested_amount: f64,
    pub shares: f64,
    /// Human-readable detail, not meant to be parsed
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopUpdate {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub previous: f64,
    pub stop_loss: f64,
}

/// Decision emitted by the trader. Consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum TradeSignal {
    OpenLong(EntrySignal),
    OpenShort(EntrySignal),
    CloseLong(ExitSignal),
    CloseShort(ExitSignal),
    UpdateStopLoss(StopUpdate),
}

impl TradeSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            TradeSignal::OpenLong(_) => "OpenLong",
            TradeSignal::OpenShort(_) => "OpenShort",
            TradeSignal::CloseLong(_) => "CloseLong",
            TradeSignal::CloseShort(_) => "CloseShort",
            TradeSignal::UpdateStopLoss(_) => "UpdateStopLoss",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TradeSignal::OpenLong(e) | TradeSignal::OpenShort(e) => e.timestamp,
            TradeSignal::CloseLong(x) | TradeSignal::CloseShort(x) => x.timestamp,
            TradeSignal::UpdateStopLoss(u) => u.timestamp,
        }
    }

    /// Fill price for opens and closes, the new stop for stop updates.
    pub fn price(&self) -> f64 {
        match self {
            TradeSignal::OpenLong(e) | TradeSignal::OpenShort(e) => e.price,
            TradeSignal::CloseLong(x) | TradeSignal::CloseShort(x) => x.price,
            TradeSignal::UpdateStopLoss(u) => u.stop_loss,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, TradeSignal::OpenLong(_) | TradeSignal::OpenShort(_))
    }

    pub fn exit(&self) -> Option<&ExitSignal> {
        match self {
            TradeSignal::CloseLong(x) | TradeSignal::CloseShort(x) => Some(x),
            _ => None,
        }
    }

    pub(crate) fn open(direction: Direction, entry: EntrySignal) -> Self {
        match direction {
            Direction::Long => TradeSignal::OpenLong(entry),
            Direction::Short => TradeSignal::OpenShort(entry),
        }
    }

    pub(crate) fn close(direction: Direction, exit: ExitSignal) -> Self {
        match direction {
            Direction::Long => TradeSignal::CloseLong(exit),
            Direction::Short => TradeSignal::CloseShort(exit),
        }
    }
}

/// The single open position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_price: f64,
    pub shares: f64,
    /// Cash committed after the opening fee
    pub invested_amount: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_loss: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Gross P&L if closed at `price`.
    pub fn gross_pnl(&self, price: f64) -> f64 {
        self.shares * (price - self.entry_price) * self.direction.sign()
    }

    /// Stop and target sit on opposite sides of the entry.
    pub fn levels_consistent(&self) -> bool {
        match self.direction {
            Direction::Long => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Direction::Short => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
        }
    }

    /// Whether `candidate` is a tighter stop that still protects the entry.
    pub fn tightens_stop(&self, candidate: f64) -> bool {
        match self.direction {
            Direction::Long => candidate > self.stop_loss && candidate < self.entry_price,
            Direction::Short => candidate < self.stop_loss && candidate > self.entry_price,
        }
    }
}

/// Post-exit entry lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LockState {
    pub locked_until: Option<DateTime<Utc>>,
    /// One off-boundary entry check granted after a profitable exit
    pub fast_reentry_allowed: bool,
}

impl LockState {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Lock until the end of the exit's period plus `periods - 1` full periods.
    /// Saturates at the latest representable instant.
    pub fn lock_after_loss(&mut self, exit_time: DateTime<Utc>, timeframe: Timeframe, periods: u32) -> DateTime<Utc> {
        let extra = i32::try_from(periods).unwrap_or(i32::MAX);
        let until = timeframe
            .duration()
            .checked_mul(extra)
            .and_then(|span| timeframe.period_start(exit_time).checked_add_signed(span))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.locked_until = Some(until);
        self.fast_reentry_allowed = false;
        until
    }

    pub fn unlock_after_profit(&mut self) {
        self.locked_until = None;
        self.fast_reentry_allowed = true;
    }

    /// Consume the fast re-entry grant.
    pub fn take_fast_reentry(&mut self) -> bool {
        std::mem::take(&mut self.fast_reentry_allowed)
    }

    /// Drop an expired lock.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if self.locked_until.is_some_and(|until| now >= until) {
            self.locked_until = None;
        }
    }
}
