//! Pluggable trend source consumed by the position state machine.
//!
//! A source turns completed bars into a [`TrendView`]: direction, exit bands,
//! support/resistance candidates, slope and order flow. The state machine
//! never looks at indicator internals beyond this view.

use serde::Serialize;
use std::fmt;

use super::bars::Bar;
use super::sar::SarSnapshot;
use super::vidya::VidyaSnapshot;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => f.write_str("Long"),
            Direction::Short => f.write_str("Short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Trend {
    Up,
    Down,
    #[default]
    Neutral,
}

impl Trend {
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Trend::Up => Some(Direction::Long),
            Trend::Down => Some(Direction::Short),
            Trend::Neutral => None,
        }
    }
}

/// Exit bands: longs leave on `lower`, shorts on `upper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bands {
    pub upper: f64,
    pub lower: f64,
}

impl Bands {
    pub fn exit_level(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.lower,
            Direction::Short => self.upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Slope {
    Rising,
    Falling,
    #[default]
    Flat,
}

impl Slope {
    pub fn supports(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Slope::Rising, Direction::Long) | (Slope::Falling, Direction::Short)
        )
    }
}

/// What a trend source reports after each completed bar
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendView {
    pub ready: bool,
    pub trend: Trend,
    /// The trend differs from the previous bar's trend
    pub trend_changed: bool,
    /// The trend was established by a band cross (as opposed to a fallback)
    pub from_bands: bool,
    pub bands: Option<Bands>,
    /// Confirmed levels below the close, newest last
    pub supports: Vec<f64>,
    /// Confirmed levels above the close, newest last
    pub resistances: Vec<f64>,
    pub slope: Slope,
    /// Cross-reset buy minus sell volume
    pub order_flow: f64,
}

/// Indicator state published alongside each tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceSnapshot {
    Vidya(VidyaSnapshot),
    Sar(SarSnapshot),
}

/// A trend indicator that can drive [`TrendTrader`](super::trader::TrendTrader).
pub trait TrendSource {
    fn name(&self) -> &'static str;

    /// Advance on a completed bar.
    fn on_bar(&mut self, bar: &Bar) -> TrendView;

    /// Latest view without advancing.
    fn view(&self) -> TrendView;

    /// Fixed-window order-flow ratio including the in-progress bar.
    fn flow_ratio(&self, partial: Option<&Bar>) -> f64;

    /// Source-specific veto on a direction (e.g. overbought oscillator).
    fn permits(&self, _direction: Direction) -> bool {
        true
    }

    fn snapshot(&self) -> SourceSnapshot;
}
