//! Bars, bar periods and the minute-to-period aggregator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candle. Used both for the 1-minute input feed and for the
/// aggregated period bars the indicators run on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// True range against the previous bar's close.
    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => (self.high - self.low)
                .max((self.high - pc).abs())
                .max((pc - self.low).abs()),
            None => self.high - self.low,
        }
    }
}

/// Bar period. Boundaries are wall-clock aligned inside the UTC day
/// (30m bars start at :00 and :30, 4h bars at 00:00, 04:00, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M5,
    M15,
    M20,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
}

const SECONDS_PER_DAY: i64 = 86_400;

impl Timeframe {
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M20 => 20,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H8 => 480,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes())
    }

    /// Start of the period containing `ts`.
    pub fn period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let day_start = secs - secs.rem_euclid(SECONDS_PER_DAY);
        let period_secs = self.minutes() * 60;
        let aligned = day_start + ((secs - day_start) / period_secs) * period_secs;
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// End of the period containing `ts`, i.e. the start of the next one.
    pub fn next_period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.period_start(ts) + self.duration()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M20 => "20m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H8 => "8h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "20m" => Ok(Timeframe::M20),
            "30m" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "2h" => Ok(Timeframe::H2),
            "4h" => Ok(Timeframe::H4),
            "6h" => Ok(Timeframe::H6),
            "8h" => Ok(Timeframe::H8),
            "12h" => Ok(Timeframe::H12),
            "1d" | "24h" => Ok(Timeframe::D1),
            other => Err(format!("unsupported timeframe '{}'", other)),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

/// Partial bar for the period currently being filled
#[derive(Debug, Clone, Copy)]
struct BarBuilder {
    period_start: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BarBuilder {
    fn new(period_start: DateTime<Utc>, tick: &Bar) -> Self {
        Self {
            period_start,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: tick.volume,
        }
    }

    fn add_tick(&mut self, tick: &Bar) {
        self.high = self.high.max(tick.high);
        self.low = self.low.min(tick.low);
        self.close = tick.close;
        self.volume += tick.volume;
    }

    fn to_bar(&self) -> Bar {
        Bar {
            timestamp: self.period_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Folds 1-minute ticks into bars of a fixed period
#[derive(Debug, Clone)]
pub struct BarAggregator {
    timeframe: Timeframe,
    current_bar: Option<BarBuilder>,
}

impl BarAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current_bar: None,
        }
    }

    /// Process a tick and return the completed bar if it opened a new period.
    /// The completed bar is stamped with its period start.
    pub fn update(&mut self, tick: &Bar) -> Option<Bar> {
        let period_start = self.timeframe.period_start(tick.timestamp);

        match &mut self.current_bar {
            Some(bar) => {
                if period_start > bar.period_start {
                    // New period - flush current bar and start a new one from this tick
                    let completed = bar.to_bar();
                    self.current_bar = Some(BarBuilder::new(period_start, tick));
                    Some(completed)
                } else {
                    bar.add_tick(tick);
                    None
                }
            }
            None => {
                // First tick
                self.current_bar = Some(BarBuilder::new(period_start, tick));
                None
            }
        }
    }

    /// The in-progress bar, if any tick has been seen.
    pub fn current(&self) -> Option<Bar> {
        self.current_bar.map(|b| b.to_bar())
    }
}
