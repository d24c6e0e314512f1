//! Variable index dynamic average (VIDYA) trend indicator.
//!
//! Per completed bar:
//! 1. CMO over the last `momentum` close deltas scales the EMA alpha
//! 2. The VIDYA line is SMA-smoothed into the published trend line
//! 3. ATR bands around the trend line decide trend flips by crossing
//! 4. Strict pivots become support/resistance candidates
//! 5. Order flow is accumulated between trend crosses

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::ema::Sma;
use super::order_flow::{CrossResetFlow, DeltaVolumeWindow};
use super::ring::RingBuffer;
use super::trend_source::{Bands, Direction, Slope, SourceSnapshot, Trend, TrendSource, TrendView};
use super::volatility::Atr;

/// Number of smoothed values spanned by the slope
const SLOPE_WINDOW: usize = 5;
/// Slope must exceed this fraction of the trend line
const SLOPE_THRESHOLD: f64 = 0.0005;
/// Minimum CMO for the slope to count as directional
const SLOPE_MIN_CMO: f64 = 20.0;
/// Support/resistance levels kept
const MAX_LEVELS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VidyaConfig {
    /// Base EMA length
    pub length: usize,
    /// CMO lookback in close deltas
    pub momentum: usize,
    /// SMA length applied to the VIDYA line
    pub smooth_length: usize,
    /// ATR multiple for the bands
    pub band_distance: f64,
    pub atr_period: usize,
    pub pivot_left: usize,
    pub pivot_right: usize,
    /// Fixed window for the delta volume estimate
    pub delta_volume_period: usize,
    /// Lower bound on bars before the indicator reports ready
    pub min_warmup_bars: usize,
}

impl Default for VidyaConfig {
    fn default() -> Self {
        Self {
            length: 20,
            momentum: 9,
            smooth_length: 15,
            band_distance: 2.0,
            atr_period: 200,
            pivot_left: 3,
            pivot_right: 3,
            delta_volume_period: 14,
            min_warmup_bars: 200,
        }
    }
}

impl VidyaConfig {
    /// Bars required before the view can report ready.
    pub fn required_warmup(&self) -> usize {
        self.min_warmup_bars
            .max(self.atr_period)
            .max(self.length * 3)
    }
}

/// Published VIDYA state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VidyaSnapshot {
    pub ready: bool,
    pub bars: usize,
    pub vidya: Option<f64>,
    pub trend_line: Option<f64>,
    pub cmo: f64,
    pub alpha: f64,
    pub slope: f64,
    pub atr: Option<f64>,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub trend: Trend,
    pub supports: Vec<f64>,
    pub resistances: Vec<f64>,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

/// Absolute Chande momentum oscillator over consecutive closes, in [0, 100].
pub fn chande_momentum(closes: impl Iterator<Item = f64>) -> f64 {
    let mut up = 0.0;
    let mut down = 0.0;
    let mut prev: Option<f64> = None;
    for c in closes {
        if let Some(p) = prev {
            let d = c - p;
            if d > 0.0 {
                up += d;
            } else {
                down -= d;
            }
        }
        prev = Some(c);
    }
    let total = up + down;
    if total == 0.0 {
        0.0
    } else {
        (100.0 * (up - down) / total).abs()
    }
}

#[derive(Debug, Clone)]
pub struct VidyaIndicator {
    config: VidyaConfig,
    bars: usize,
    closes: RingBuffer<f64>,
    highs: RingBuffer<f64>,
    lows: RingBuffer<f64>,
    vidya: Option<f64>,
    smoother: Sma,
    smoothed_history: RingBuffer<f64>,
    atr: Atr,
    cmo: f64,
    alpha: f64,
    slope: f64,
    slope_dir: Slope,
    trend: Option<Trend>,
    trend_from_bands: bool,
    supports: RingBuffer<f64>,
    resistances: RingBuffer<f64>,
    flow: CrossResetFlow,
    delta_window: DeltaVolumeWindow,
    view: TrendView,
}

impl VidyaIndicator {
    pub fn new(config: VidyaConfig) -> Self {
        let pivot_span = config.pivot_left + config.pivot_right + 1;
        Self {
            bars: 0,
            closes: RingBuffer::new(config.momentum + 1),
            highs: RingBuffer::new(pivot_span),
            lows: RingBuffer::new(pivot_span),
            vidya: None,
            smoother: Sma::new(config.smooth_length),
            smoothed_history: RingBuffer::new(SLOPE_WINDOW),
            atr: Atr::new(config.atr_period),
            cmo: 0.0,
            alpha: 0.0,
            slope: 0.0,
            slope_dir: Slope::Flat,
            trend: None,
            trend_from_bands: false,
            supports: RingBuffer::new(MAX_LEVELS),
            resistances: RingBuffer::new(MAX_LEVELS),
            flow: CrossResetFlow::new(),
            delta_window: DeltaVolumeWindow::new(config.delta_volume_period),
            view: TrendView::default(),
            config,
        }
    }

    /// Smoothing factor applied on the last bar.
    pub fn trend_line(&self) -> Option<f64> {
        self.smoothed_history.last().or(self.vidya)
    }

    pub fn update(&mut self, bar: &Bar) -> TrendView {
        self.bars += 1;
        let prev_close = self.closes.last();
        self.closes.push(bar.close);
        self.highs.push(bar.high);
        self.lows.push(bar.low);
        let atr = self.atr.update(bar);
        self.delta_window.record_bar(bar);

        if !self.closes.is_full() {
            return self.view.clone();
        }

        // Step 1: momentum-scaled VIDYA
        self.cmo = chande_momentum(self.closes.iter());
        self.alpha = 2.0 / (self.config.length as f64 + 1.0) * (self.cmo / 100.0);
        let vidya = match self.vidya {
            Some(prev) => self.alpha * bar.close + (1.0 - self.alpha) * prev,
            None => bar.close,
        };
        self.vidya = Some(vidya);

        // Step 2: smoothed trend line and its slope
        let smoothed = match self.smoother.update(vidya) {
            Some(s) => {
                self.smoothed_history.push(s);
                s
            }
            None => vidya,
        };
        self.update_slope(smoothed);

        // Step 3: bands and trend
        let bands = atr.map(|a| Bands {
            upper: smoothed + a * self.config.band_distance,
            lower: smoothed - a * self.config.band_distance,
        });
        let previous_trend = self.trend;
        let trend = self.next_trend(bar.close, prev_close, smoothed, bands);
        self.trend = Some(trend);
        let trend_changed = previous_trend.is_some_and(|p| p != trend);
        let cross_up = trend_changed && trend == Trend::Up;
        let cross_down = trend_changed && trend == Trend::Down;

        // Step 4: pivots
        self.detect_pivots(bar.close);

        // Step 5: order flow since the last cross
        let flow = self.flow.update(bar, cross_up, cross_down);

        let ready = self.bars >= self.config.required_warmup()
            && bands.is_some()
            && self.smoother.value().is_some();

        self.view = TrendView {
            ready,
            trend,
            trend_changed,
            from_bands: self.trend_from_bands,
            bands,
            supports: self.supports.iter().collect(),
            resistances: self.resistances.iter().collect(),
            slope: self.slope_dir,
            order_flow: flow.delta(),
        };
        self.view.clone()
    }

    fn update_slope(&mut self, smoothed: f64) {
        if !self.smoothed_history.is_full() {
            return;
        }
        let (Some(newest), Some(oldest)) = (self.smoothed_history.last(), self.smoothed_history.first()) else {
            return;
        };
        self.slope = (newest - oldest) / SLOPE_WINDOW as f64;
        let threshold = smoothed * SLOPE_THRESHOLD;
        self.slope_dir = if self.slope > threshold && self.cmo > SLOPE_MIN_CMO {
            Slope::Rising
        } else if self.slope < -threshold && self.cmo > SLOPE_MIN_CMO {
            Slope::Falling
        } else {
            Slope::Flat
        };
    }

    fn next_trend(&mut self, close: f64, prev_close: Option<f64>, line: f64, bands: Option<Bands>) -> Trend {
        let Some(bands) = bands else {
            self.trend_from_bands = false;
            return if close > line {
                Trend::Up
            } else if close < line {
                Trend::Down
            } else {
                Trend::Neutral
            };
        };

        if let Some(pc) = prev_close {
            if pc <= bands.upper && close > bands.upper {
                self.trend_from_bands = true;
                return Trend::Up;
            }
            if pc >= bands.lower && close < bands.lower {
                self.trend_from_bands = true;
                return Trend::Down;
            }
        }

        if let Some(existing) = self.trend {
            return existing;
        }

        self.trend_from_bands = true;
        if close > bands.upper {
            Trend::Up
        } else if close < bands.lower {
            Trend::Down
        } else {
            Trend::Neutral
        }
    }

    fn detect_pivots(&mut self, close: f64) {
        if !self.highs.is_full() {
            return;
        }
        let center = self.config.pivot_left;
        let (Some(high), Some(low)) = (self.highs.get(center), self.lows.get(center)) else {
            return;
        };

        let is_pivot_high = self
            .highs
            .iter()
            .enumerate()
            .all(|(i, h)| i == center || h < high);
        let is_pivot_low = self
            .lows
            .iter()
            .enumerate()
            .all(|(i, l)| i == center || l > low);

        if is_pivot_low && low < close {
            self.supports.push(low);
        }
        if is_pivot_high && high > close {
            self.resistances.push(high);
        }
    }

    pub fn state(&self) -> VidyaSnapshot {
        let totals = self.flow.totals();
        VidyaSnapshot {
            ready: self.view.ready,
            bars: self.bars,
            vidya: self.vidya,
            trend_line: self.trend_line(),
            cmo: self.cmo,
            alpha: self.alpha,
            slope: self.slope,
            atr: self.atr.value(),
            upper_band: self.view.bands.map(|b| b.upper),
            lower_band: self.view.bands.map(|b| b.lower),
            trend: self.view.trend,
            supports: self.view.supports.clone(),
            resistances: self.view.resistances.clone(),
            buy_volume: totals.buy_volume,
            sell_volume: totals.sell_volume,
        }
    }
}

impl TrendSource for VidyaIndicator {
    fn name(&self) -> &'static str {
        "vidya"
    }

    fn on_bar(&mut self, bar: &Bar) -> TrendView {
        self.update(bar)
    }

    fn view(&self) -> TrendView {
        self.view.clone()
    }

    fn flow_ratio(&self, partial: Option<&Bar>) -> f64 {
        self.delta_window.estimate(partial).ratio()
    }

    fn permits(&self, _direction: Direction) -> bool {
        true
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot::Vidya(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::tests::ts;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn bar(i: i64, close: f64) -> Bar {
        Bar::new(
            ts(0, 0) + Duration::minutes(30 * i),
            close,
            close + 0.5,
            close - 0.5,
            close,
            10.0,
        )
    }

    fn small_config() -> VidyaConfig {
        VidyaConfig {
            length: 5,
            momentum: 3,
            smooth_length: 2,
            band_distance: 1.0,
            atr_period: 3,
            pivot_left: 1,
            pivot_right: 1,
            delta_volume_period: 4,
            min_warmup_bars: 0,
        }
    }

    #[test]
    fn test_cmo_bounds() {
        assert_eq!(chande_momentum([1.0, 1.0, 1.0].into_iter()), 0.0);
        assert_relative_eq!(chande_momentum([1.0, 2.0, 3.0].into_iter()), 100.0);
        assert_relative_eq!(chande_momentum([3.0, 2.0, 1.0].into_iter()), 100.0);
        assert_relative_eq!(chande_momentum([1.0, 3.0, 2.0].into_iter()), 100.0 / 3.0);
    }

    #[test]
    fn test_flat_prices_freeze_average() {
        let mut v = VidyaIndicator::new(small_config());
        for i in 0..20 {
            v.update(&bar(i, 100.0));
        }
        assert_eq!(v.state().alpha, 0.0);
        assert_eq!(v.state().vidya, Some(100.0));
        assert_eq!(v.view().trend, Trend::Neutral);
        assert!(v.state().ready);
    }

    #[test]
    fn test_not_ready_before_warmup() {
        let cfg = VidyaConfig {
            min_warmup_bars: 50,
            ..small_config()
        };
        let mut v = VidyaIndicator::new(cfg);
        for i in 0..49 {
            assert!(!v.update(&bar(i, 100.0 + i as f64)).ready);
        }
        assert!(v.update(&bar(49, 149.0)).ready);
    }

    #[test]
    fn test_band_cross_flips_trend_up() {
        let mut v = VidyaIndicator::new(small_config());
        for i in 0..10 {
            v.update(&bar(i, 100.0));
        }
        let view = v.update(&bar(10, 102.0));
        assert_eq!(view.trend, Trend::Up);
        assert!(view.trend_changed);
        assert!(view.from_bands);
        // The cross bar resets order flow
        assert_eq!(view.order_flow, 0.0);

        let view = v.update(&bar(11, 103.0));
        assert_eq!(view.trend, Trend::Up);
        assert!(!view.trend_changed);
    }

    #[test]
    fn test_alpha_never_exceeds_base() {
        let mut v = VidyaIndicator::new(small_config());
        let base = 2.0 / 6.0;
        for i in 0..60 {
            let p = 100.0 + ((i * 7) % 11) as f64 - 5.0;
            v.update(&bar(i, p));
            let alpha = v.state().alpha;
            assert!(alpha >= 0.0 && alpha <= base + 1e-12);
        }
    }

    #[test]
    fn test_pivot_low_becomes_support() {
        let cfg = VidyaConfig {
            momentum: 1,
            ..small_config()
        };
        let mut v = VidyaIndicator::new(cfg);
        v.update(&bar(0, 10.0));
        v.update(&bar(1, 8.0));
        let view = v.update(&bar(2, 10.0));
        assert_eq!(view.supports, vec![7.5]);
        assert!(view.resistances.is_empty());
    }

    #[test]
    fn test_levels_capped_at_three() {
        let cfg = VidyaConfig {
            momentum: 1,
            ..small_config()
        };
        let mut v = VidyaIndicator::new(cfg);
        let closes = [10.0, 8.0, 10.0, 7.0, 10.0, 6.0, 10.0, 5.0, 10.0];
        let mut view = TrendView::default();
        for (i, c) in closes.iter().enumerate() {
            view = v.update(&bar(i as i64, *c));
        }
        assert_eq!(view.supports, vec![6.5, 5.5, 4.5]);
    }
}
