//! Parabolic stop-and-reverse with a damped Bollinger midline and RSI.
//!
//! Alternative trend source: direction comes from the SAR, exits trail the
//! SAR while it agrees with the position (the Bollinger band otherwise), and
//! the regressive midline `damping * basisMA + (1 - damping) * basis` serves
//! as the pullback level.

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::ema::SeededEma;
use super::order_flow::{CrossResetFlow, DeltaVolumeWindow};
use super::ring::RingBuffer;
use super::trend_source::{Bands, Direction, Slope, SourceSnapshot, Trend, TrendSource, TrendView};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SarConfig {
    /// Bollinger basis / stdev length, also the RSI length
    pub length: usize,
    pub mult: f64,
    pub basis_ma_length: usize,
    /// Weight of the basis MA in the regressive midline
    pub damping: f64,
    pub af_start: f64,
    pub af_increment: f64,
    pub af_max: f64,
    /// Longs are refused above this RSI
    pub rsi_overbought: f64,
    /// Shorts are refused below this RSI
    pub rsi_oversold: f64,
    pub delta_volume_period: usize,
    pub min_warmup_bars: usize,
}

impl Default for SarConfig {
    fn default() -> Self {
        Self {
            length: 14,
            mult: 2.0,
            basis_ma_length: 14,
            damping: 0.9,
            af_start: 0.01,
            af_increment: 0.01,
            af_max: 0.04,
            rsi_overbought: 75.0,
            rsi_oversold: 25.0,
            delta_volume_period: 14,
            min_warmup_bars: 200,
        }
    }
}

impl SarConfig {
    pub fn required_warmup(&self) -> usize {
        self.min_warmup_bars
            .max(4 * self.length + 4 * self.basis_ma_length + 50)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SarState {
    sar: f64,
    ep: f64,
    af: f64,
    rising: bool,
}

/// Streaming parabolic SAR
#[derive(Debug, Clone)]
pub struct ParabolicSar {
    start: f64,
    increment: f64,
    max: f64,
    state: Option<SarState>,
    prev_lows: RingBuffer<f64>,
    prev_highs: RingBuffer<f64>,
}

impl ParabolicSar {
    pub fn new(start: f64, increment: f64, max: f64) -> Self {
        Self {
            start,
            increment,
            max,
            state: None,
            prev_lows: RingBuffer::new(2),
            prev_highs: RingBuffer::new(2),
        }
    }

    /// Returns `(sar, rising, reversed)` for this bar.
    pub fn update(&mut self, bar: &Bar) -> (f64, bool, bool) {
        let next = match self.state {
            None => {
                let rising = bar.close >= (bar.high + bar.low) / 2.0;
                let state = if rising {
                    SarState { sar: bar.low, ep: bar.high, af: self.start, rising }
                } else {
                    SarState { sar: bar.high, ep: bar.low, af: self.start, rising }
                };
                (state, false)
            }
            Some(prev) => self.step(prev, bar),
        };

        self.prev_lows.push(bar.low);
        self.prev_highs.push(bar.high);
        let (state, reversed) = next;
        self.state = Some(state);
        (state.sar, state.rising, reversed)
    }

    fn step(&self, prev: SarState, bar: &Bar) -> (SarState, bool) {
        let mut s = prev;
        s.sar = prev.sar + prev.af * (prev.ep - prev.sar);

        if s.rising {
            // Never above the prior two lows
            for low in self.prev_lows.iter() {
                s.sar = s.sar.min(low);
            }
            if bar.low <= s.sar {
                return (
                    SarState { sar: prev.ep, ep: bar.low, af: self.start, rising: false },
                    true,
                );
            }
            if bar.high > s.ep {
                s.ep = bar.high;
                s.af = (s.af + self.increment).min(self.max);
            }
        } else {
            for high in self.prev_highs.iter() {
                s.sar = s.sar.max(high);
            }
            if bar.high >= s.sar {
                return (
                    SarState { sar: prev.ep, ep: bar.high, af: self.start, rising: true },
                    true,
                );
            }
            if bar.low < s.ep {
                s.ep = bar.low;
                s.af = (s.af + self.increment).min(self.max);
            }
        }
        (s, false)
    }

    pub fn value(&self) -> Option<f64> {
        self.state.map(|s| s.sar)
    }

    pub fn is_rising(&self) -> Option<bool> {
        self.state.map(|s| s.rising)
    }

    pub fn acceleration(&self) -> Option<f64> {
        self.state.map(|s| s.af)
    }
}

/// Simple-average RSI over `period` close changes.
#[derive(Debug, Clone)]
pub struct Rsi {
    changes: RingBuffer<f64>,
    prev_close: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            changes: RingBuffer::new(period),
            prev_close: None,
        }
    }

    pub fn update(&mut self, close: f64) -> f64 {
        if let Some(prev) = self.prev_close {
            self.changes.push(close - prev);
        }
        self.prev_close = Some(close);
        self.value()
    }

    /// 50 until a full window of changes exists, 100 with no losses.
    pub fn value(&self) -> f64 {
        if !self.changes.is_full() {
            return 50.0;
        }
        let n = self.changes.len() as f64;
        let gain = self.changes.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
        let loss = self.changes.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;
        if loss == 0.0 {
            return 100.0;
        }
        100.0 - 100.0 / (1.0 + gain / loss)
    }
}

/// Published SAR state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SarSnapshot {
    pub ready: bool,
    pub bars: usize,
    pub sar: Option<f64>,
    pub rising: bool,
    pub acceleration: Option<f64>,
    pub basis: Option<f64>,
    pub basis_ma: Option<f64>,
    pub regressive: Option<f64>,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub rsi: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone)]
pub struct SarIndicator {
    config: SarConfig,
    bars: usize,
    sar: ParabolicSar,
    basis: SeededEma,
    basis_ma: SeededEma,
    closes: RingBuffer<f64>,
    rsi: Rsi,
    regressive: Option<f64>,
    bollinger: Option<Bands>,
    flow: CrossResetFlow,
    delta_window: DeltaVolumeWindow,
    view: TrendView,
}

impl SarIndicator {
    pub fn new(config: SarConfig) -> Self {
        Self {
            bars: 0,
            sar: ParabolicSar::new(config.af_start, config.af_increment, config.af_max),
            basis: SeededEma::new(config.length),
            basis_ma: SeededEma::new(config.basis_ma_length),
            closes: RingBuffer::new(config.length),
            rsi: Rsi::new(config.length),
            regressive: None,
            bollinger: None,
            flow: CrossResetFlow::new(),
            delta_window: DeltaVolumeWindow::new(config.delta_volume_period),
            view: TrendView::default(),
            config,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> TrendView {
        self.bars += 1;
        self.closes.push(bar.close);
        self.rsi.update(bar.close);
        self.delta_window.record_bar(bar);

        let (sar, rising, reversed) = self.sar.update(bar);

        // Bollinger basis, basis MA and the regressive midline
        let prev_regressive = self.regressive;
        if let Some(basis) = self.basis.update(bar.close) {
            let n = self.closes.len() as f64;
            let stdev = (self.closes.iter().map(|c| (c - basis).powi(2)).sum::<f64>() / n).sqrt();
            self.bollinger = Some(Bands {
                upper: basis + self.config.mult * stdev,
                lower: basis - self.config.mult * stdev,
            });
            if let Some(basis_ma) = self.basis_ma.update(basis) {
                self.regressive = Some(self.config.damping * basis_ma + (1.0 - self.config.damping) * basis);
            }
        }

        let trend = if rising { Trend::Up } else { Trend::Down };
        let flow = self.flow.update(bar, reversed && rising, reversed && !rising);

        // Exit level follows the SAR while it sits on the protective side
        let bands = self.bollinger.map(|bb| Bands {
            upper: if rising { bb.upper } else { sar },
            lower: if rising { sar } else { bb.lower },
        });

        let slope = match (self.regressive, prev_regressive) {
            (Some(now), Some(before)) if now > before => Slope::Rising,
            (Some(now), Some(before)) if now < before => Slope::Falling,
            _ => Slope::Flat,
        };

        let (supports, resistances) = match self.regressive {
            Some(r) if r < bar.close => (vec![r], Vec::new()),
            Some(r) if r > bar.close => (Vec::new(), vec![r]),
            _ => (Vec::new(), Vec::new()),
        };

        let ready = self.bars >= self.config.required_warmup() && self.regressive.is_some();

        self.view = TrendView {
            ready,
            trend,
            trend_changed: reversed,
            from_bands: true,
            bands,
            supports,
            resistances,
            slope,
            order_flow: flow.delta(),
        };
        self.view.clone()
    }

    pub fn state(&self) -> SarSnapshot {
        SarSnapshot {
            ready: self.view.ready,
            bars: self.bars,
            sar: self.sar.value(),
            rising: self.sar.is_rising().unwrap_or(false),
            acceleration: self.sar.acceleration(),
            basis: self.basis.value(),
            basis_ma: self.basis_ma.value(),
            regressive: self.regressive,
            upper: self.bollinger.map(|b| b.upper),
            lower: self.bollinger.map(|b| b.lower),
            rsi: self.rsi.value(),
            trend: self.view.trend,
        }
    }
}

impl TrendSource for SarIndicator {
    fn name(&self) -> &'static str {
        "sar"
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

    fn permits(&self, direction: Direction) -> bool {
        let rsi = self.rsi.value();
        match direction {
            Direction::Long => rsi <= self.config.rsi_overbought,
            Direction::Short => rsi >= self.config.rsi_oversold,
        }
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot::Sar(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::tests::ts;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn make_ohlc_bars(data: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
        data.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| {
                Bar::new(ts(0, 0) + Duration::minutes(30 * i as i64), open, high, low, close, 100.0)
            })
            .collect()
    }

    fn small_config() -> SarConfig {
        SarConfig {
            length: 3,
            basis_ma_length: 3,
            min_warmup_bars: 0,
            ..Default::default()
        }
    }

    #[test]
    fn test_sar_below_price_in_uptrend() {
        let data: Vec<_> = (0..10)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                (base, base + 2.0, base - 1.0, base + 1.5)
            })
            .collect();
        let mut psar = ParabolicSar::new(0.02, 0.02, 0.2);
        for bar in make_ohlc_bars(&data) {
            let (sar, rising, reversed) = psar.update(&bar);
            assert!(rising);
            assert!(!reversed);
            assert!(sar <= bar.low);
        }
    }

    #[test]
    fn test_sar_reverses_on_breakdown() {
        let data = [
            (100.0, 105.0, 98.0, 103.0),
            (103.0, 108.0, 101.0, 107.0),
            (107.0, 112.0, 105.0, 111.0),
            (111.0, 115.0, 109.0, 114.0),
            (114.0, 114.5, 95.0, 96.0),
        ];
        let mut psar = ParabolicSar::new(0.02, 0.02, 0.2);
        let bars = make_ohlc_bars(&data);
        for bar in &bars[..4] {
            assert!(psar.update(bar).1);
        }
        let (sar, rising, reversed) = psar.update(&bars[4]);
        assert!(reversed);
        assert!(!rising);
        // Reversal puts the SAR at the prior extreme point
        assert_eq!(sar, 115.0);
        assert_eq!(psar.acceleration(), Some(0.02));
    }

    #[test]
    fn test_acceleration_capped() {
        let data: Vec<_> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 3.0;
                (base, base + 2.0, base - 1.0, base + 1.5)
            })
            .collect();
        let mut psar = ParabolicSar::new(0.01, 0.01, 0.04);
        for bar in make_ohlc_bars(&data) {
            psar.update(&bar);
        }
        assert_relative_eq!(psar.acceleration().unwrap(), 0.04);
    }

    #[test]
    fn test_rsi_neutral_until_full() {
        let mut rsi = Rsi::new(3);
        assert_eq!(rsi.update(10.0), 50.0);
        assert_eq!(rsi.update(11.0), 50.0);
        assert_eq!(rsi.update(12.0), 50.0);
        assert_eq!(rsi.update(13.0), 100.0);
        // changes: +1, +1, -2 -> gain 2/3, loss 2/3
        assert_relative_eq!(rsi.update(11.0), 50.0);
    }

    #[test]
    fn test_rsi_vetoes_overbought_long() {
        let mut sar = SarIndicator::new(small_config());
        for bar in make_ohlc_bars(&(0..20).map(|i| {
            let p = 100.0 + i as f64;
            (p, p + 0.5, p - 0.5, p + 0.4)
        }).collect::<Vec<_>>()) {
            sar.update(&bar);
        }
        assert!(sar.state().rsi > 75.0);
        assert!(!sar.permits(Direction::Long));
        assert!(sar.permits(Direction::Short));
    }

    #[test]
    fn test_regressive_midline_as_support() {
        let mut sar = SarIndicator::new(small_config());
        let data: Vec<_> = (0..80)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.5;
                (p, p + 0.4, p - 0.4, p + 0.2)
            })
            .collect();
        let mut view = TrendView::default();
        for bar in make_ohlc_bars(&data) {
            view = sar.update(&bar);
        }
        assert!(view.ready);
        assert_eq!(view.trend, Trend::Up);
        assert_eq!(view.supports.len(), 1);
        assert!(view.resistances.is_empty());
        assert_eq!(view.slope, Slope::Rising);
        let state = sar.state();
        let expected = 0.9 * state.basis_ma.unwrap() + 0.1 * state.basis.unwrap();
        assert_relative_eq!(state.regressive.unwrap(), expected);
        // Long exit trails the SAR
        assert_eq!(view.bands.unwrap().lower, state.sar.unwrap());
    }
}
