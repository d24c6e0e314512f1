//! Volatility statistics used as bands and entry filters.

use serde::{Deserialize, Serialize};

use super::bars::{Bar, BarAggregator, Timeframe};
use super::ema::{Ema, SeededEma};
use super::ring::RingBuffer;

/// Average true range: rolling mean of true ranges over `period` bars.
#[derive(Debug, Clone)]
pub struct Atr {
    ranges: RingBuffer<f64>,
    sum: f64,
    prev_close: Option<f64>,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            ranges: RingBuffer::new(period),
            sum: 0.0,
            prev_close: None,
        }
    }

    /// Feed a completed bar; returns the ATR once `period` true ranges exist.
    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let tr = bar.true_range(self.prev_close);
        self.prev_close = Some(bar.close);
        self.sum += tr;
        if let Some(old) = self.ranges.push(tr) {
            self.sum -= old;
        }
        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.ranges.is_full() {
            Some(self.sum / self.ranges.len() as f64)
        } else {
            None
        }
    }
}

/// Short/long ATR ratio filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrRatioConfig {
    pub fast: usize,
    pub slow: usize,
    /// Entries pass while fast/slow ATR stays at or below this ratio
    pub max_ratio: f64,
}

impl Default for AtrRatioConfig {
    fn default() -> Self {
        Self {
            fast: 3,
            slow: 14,
            max_ratio: 1.3,
        }
    }
}

/// Compares recent true ranges against a longer baseline to refuse entries
/// into a volatility spike.
#[derive(Debug, Clone)]
pub struct AtrRatioFilter {
    config: AtrRatioConfig,
    ranges: RingBuffer<f64>,
    prev_close: Option<f64>,
}

impl AtrRatioFilter {
    pub fn new(config: AtrRatioConfig) -> Self {
        Self {
            ranges: RingBuffer::new(config.slow.max(config.fast)),
            prev_close: None,
            config,
        }
    }

    pub fn update(&mut self, bar: &Bar) {
        let tr = bar.true_range(self.prev_close);
        self.prev_close = Some(bar.close);
        if tr > 0.0 {
            self.ranges.push(tr);
        }
    }

    /// fast/slow mean true range, `None` before `fast` ranges exist.
    pub fn ratio(&self) -> Option<f64> {
        let n = self.ranges.len();
        if n < self.config.fast {
            return None;
        }
        let fast: f64 = self.ranges.iter().skip(n - self.config.fast).sum::<f64>() / self.config.fast as f64;
        let slow = self.ranges.mean().unwrap_or(0.0);
        if slow > 0.0 {
            Some(fast / slow)
        } else {
            Some(0.0)
        }
    }

    pub fn passes(&self) -> bool {
        self.ratio().is_some_and(|r| r <= self.config.max_ratio)
    }
}

/// Bollinger-width volatility oscillator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityConfig {
    pub timeframe: Timeframe,
    /// Basis EMA and stdev length
    pub length: usize,
    pub mult: f64,
    /// Smoothing applied to the width ratio
    pub ema_period: usize,
    /// Gate passes when ratio / ratio EMA is at least this
    pub threshold: f64,
    /// Gate also requires this basis change rate (0 disables)
    pub min_basis_change: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H4,
            length: 7,
            mult: 2.0,
            ema_period: 90,
            threshold: 0.6,
            min_basis_change: 0.0,
        }
    }
}

/// Latest volatility reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VolatilityReading {
    pub ratio: f64,
    pub ratio_ema: Option<f64>,
    pub ratio_vs_ema: f64,
    pub basis_change_rate: f64,
}

/// Bollinger band width relative to its own long EMA, computed on a
/// separate higher timeframe.
#[derive(Debug, Clone)]
pub struct VolatilityCalculator {
    config: VolatilityConfig,
    aggregator: BarAggregator,
    basis: SeededEma,
    closes: RingBuffer<f64>,
    ratio_ema: Ema,
    ratio_count: usize,
    basis_history: RingBuffer<f64>,
    reading: Option<VolatilityReading>,
}

impl VolatilityCalculator {
    pub fn new(config: VolatilityConfig) -> Self {
        Self {
            aggregator: BarAggregator::new(config.timeframe),
            basis: SeededEma::new(config.length),
            closes: RingBuffer::new(config.length),
            ratio_ema: Ema::new(config.ema_period),
            ratio_count: 0,
            basis_history: RingBuffer::new(3),
            reading: None,
            config,
        }
    }

    pub fn update(&mut self, tick: &Bar) {
        if let Some(bar) = self.aggregator.update(tick) {
            self.on_bar(&bar);
        }
    }

    fn on_bar(&mut self, bar: &Bar) {
        self.closes.push(bar.close);
        let Some(basis) = self.basis.update(bar.close) else {
            return;
        };

        let n = self.closes.len() as f64;
        let variance = self.closes.iter().map(|c| (c - basis).powi(2)).sum::<f64>() / n;
        let width = 2.0 * self.config.mult * variance.sqrt();
        let ratio = if basis > 0.0 { width / basis } else { 0.0 };

        let ema = self.ratio_ema.update(ratio);
        self.ratio_count += 1;
        let ratio_ema = (self.ratio_count >= self.config.ema_period).then_some(ema);
        let ratio_vs_ema = match ratio_ema {
            Some(e) if e > 0.0 => ratio / e,
            _ => 0.0,
        };

        self.basis_history.push(basis);
        let basis_change_rate = if self.basis_history.is_full() {
            let newest = self.basis_history.last().unwrap_or(basis);
            let oldest = self.basis_history.first().unwrap_or(basis);
            ((newest - oldest) / 3.0).abs()
        } else {
            0.0
        };

        self.reading = Some(VolatilityReading {
            ratio,
            ratio_ema,
            ratio_vs_ema,
            basis_change_rate,
        });
    }

    pub fn reading(&self) -> Option<VolatilityReading> {
        self.reading
    }

    pub fn is_sufficient(&self) -> bool {
        let Some(reading) = self.reading.filter(|r| r.ratio_ema.is_some()) else {
            return false;
        };
        reading.ratio_vs_ema >= self.config.threshold
            && reading.basis_change_rate >= self.config.min_basis_change
    }
}
