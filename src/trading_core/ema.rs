//! Moving-average helpers: plain EMA/SMA, the SMA-seeded EMA, the smoothed
//! long-period trend filter and the higher-timeframe EMA alignment check.

use serde::{Deserialize, Serialize};

use super::bars::{Bar, BarAggregator, Timeframe};
use super::ring::RingBuffer;

/// Streaming EMA seeded with the first value it sees.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            alpha: 2.0 / (period.max(1) as f64 + 1.0),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(prev) => self.alpha * x + (1.0 - self.alpha) * prev,
            None => x,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Rolling simple mean over the last `period` values.
#[derive(Debug, Clone)]
pub struct Sma {
    window: RingBuffer<f64>,
    sum: f64,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            window: RingBuffer::new(period),
            sum: 0.0,
        }
    }

    /// Push a value; returns the mean once the window is full.
    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.sum += x;
        if let Some(old) = self.window.push(x) {
            self.sum -= old;
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.window.is_full() {
            Some(self.sum / self.window.len() as f64)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// EMA that publishes nothing until `period` values exist, then starts from
/// their simple mean.
#[derive(Debug, Clone)]
pub struct SeededEma {
    alpha: f64,
    seed: Sma,
    value: Option<f64>,
}

impl SeededEma {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            alpha: 2.0 / (period as f64 + 1.0),
            seed: Sma::new(period),
            value: None,
        }
    }

    pub fn update(&mut self, x: f64) -> Option<f64> {
        self.value = match self.value {
            Some(prev) => Some(self.alpha * x + (1.0 - self.alpha) * prev),
            None => self.seed.update(x),
        };
        self.value
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Long-period trend filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendFilterConfig {
    /// EMA period applied to completed-bar closes
    pub ema_period: usize,
    /// SMA length smoothing the EMA series
    pub smooth_period: usize,
    /// Number of smoothed values spanned by the slope
    pub slope_lookback: usize,
    /// Relative slope threshold for rising/falling
    pub slope_threshold: f64,
}

impl Default for TrendFilterConfig {
    fn default() -> Self {
        Self {
            ema_period: 120,
            smooth_period: 50,
            slope_lookback: 7,
            slope_threshold: 0.0001,
        }
    }
}

/// EMA of closes smoothed by an SMA of the EMA series.
///
/// The raw EMA is published until `smooth_period` EMA values exist so the
/// exit rule has a level from the first bar on.
#[derive(Debug, Clone)]
pub struct SmoothedEma {
    config: TrendFilterConfig,
    ema: Ema,
    smoother: Sma,
    history: RingBuffer<f64>,
}

impl SmoothedEma {
    pub fn new(config: TrendFilterConfig) -> Self {
        Self {
            ema: Ema::new(config.ema_period),
            smoother: Sma::new(config.smooth_period),
            history: RingBuffer::new(config.slope_lookback.max(2)),
            config,
        }
    }

    pub fn update(&mut self, close: f64) -> f64 {
        let raw = self.ema.update(close);
        let smoothed = self.smoother.update(raw).unwrap_or(raw);
        self.history.push(smoothed);
        smoothed
    }

    pub fn value(&self) -> Option<f64> {
        self.history.last()
    }

    /// Change across the lookback window, once it is full.
    pub fn slope(&self) -> Option<f64> {
        if !self.history.is_full() {
            return None;
        }
        Some(self.history.last()? - self.history.first()?)
    }

    pub fn is_rising(&self) -> bool {
        match (self.slope(), self.value()) {
            (Some(slope), Some(v)) => slope > v * self.config.slope_threshold,
            _ => false,
        }
    }

    pub fn is_falling(&self) -> bool {
        match (self.slope(), self.value()) {
            (Some(slope), Some(v)) => slope < -v * self.config.slope_threshold,
            _ => false,
        }
    }
}

/// Higher-timeframe EMA stack settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiEmaConfig {
    pub timeframe: Timeframe,
    pub fast: usize,
    pub mid: usize,
    pub slow: usize,
}

impl Default for MultiEmaConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H1,
            fast: 24,
            mid: 50,
            slow: 100,
        }
    }
}

/// Snapshot of the EMA stack after the last completed higher-timeframe bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmaStack {
    pub fast: f64,
    pub mid: f64,
    pub slow: f64,
    pub fast_rising: bool,
}

impl EmaStack {
    pub fn long_aligned(&self) -> bool {
        self.fast > self.mid && self.mid > self.slow && self.fast_rising
    }

    pub fn short_aligned(&self) -> bool {
        self.fast < self.mid && self.mid < self.slow && !self.fast_rising
    }
}

/// Three SMA-seeded EMAs over a higher-timeframe close, fed minute ticks
#[derive(Debug, Clone)]
pub struct MultiEmaCalculator {
    aggregator: BarAggregator,
    fast: SeededEma,
    mid: SeededEma,
    slow: SeededEma,
    stack: Option<EmaStack>,
}

impl MultiEmaCalculator {
    pub fn new(config: &MultiEmaConfig) -> Self {
        Self {
            aggregator: BarAggregator::new(config.timeframe),
            fast: SeededEma::new(config.fast),
            mid: SeededEma::new(config.mid),
            slow: SeededEma::new(config.slow),
            stack: None,
        }
    }

    pub fn update(&mut self, tick: &Bar) {
        if let Some(bar) = self.aggregator.update(tick) {
            self.on_bar(&bar);
        }
    }

    fn on_bar(&mut self, bar: &Bar) {
        let prev_fast = self.fast.value();
        let fast = self.fast.update(bar.close);
        let mid = self.mid.update(bar.close);
        let slow = self.slow.update(bar.close);

        self.stack = match (fast, mid, slow) {
            (Some(fast), Some(mid), Some(slow)) => Some(EmaStack {
                fast,
                mid,
                slow,
                fast_rising: prev_fast.is_some_and(|p| fast > p),
            }),
            _ => None,
        };
    }

    pub fn stack(&self) -> Option<EmaStack> {
        self.stack
    }

    pub fn long_aligned(&self) -> bool {
        self.stack.is_some_and(|s| s.long_aligned())
    }

    pub fn short_aligned(&self) -> bool {
        self.stack.is_some_and(|s| s.short_aligned())
    }
}
