//! Buy/sell volume attribution.
//!
//! Two views are kept:
//! - [`CrossResetFlow`] accumulates close-to-close volume and restarts
//!   whenever the trend-cross flags change. It feeds the order-flow entry gate.
//! - [`DeltaVolumeWindow`] splits a fixed window of completed bars by candle
//!   colour and extrapolates the in-progress bar. It drives take-profit
//!   deferral.

use serde::Serialize;

use super::bars::Bar;
use super::ring::RingBuffer;

/// Volume split since the last trend cross
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FlowTotals {
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl FlowTotals {
    pub fn delta(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossResetFlow {
    totals: FlowTotals,
    prev_close: Option<f64>,
    prev_flags: (bool, bool),
}

impl CrossResetFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a completed bar along with this bar's cross-up / cross-down flags.
    pub fn update(&mut self, bar: &Bar, cross_up: bool, cross_down: bool) -> FlowTotals {
        let flags = (cross_up, cross_down);
        if flags != self.prev_flags {
            self.totals = FlowTotals::default();
        } else if let Some(prev) = self.prev_close {
            if bar.volume > 0.0 {
                if bar.close > prev {
                    self.totals.buy_volume += bar.volume;
                } else if bar.close < prev {
                    self.totals.sell_volume += bar.volume;
                }
            }
        }
        self.prev_flags = flags;
        self.prev_close = Some(bar.close);
        self.totals
    }

    pub fn totals(&self) -> FlowTotals {
        self.totals
    }
}

/// Fixed window buy/sell imbalance over the last `period` bars
#[derive(Debug, Clone)]
pub struct DeltaVolumeWindow {
    period: usize,
    buys: RingBuffer<f64>,
    sells: RingBuffer<f64>,
}

/// Imbalance estimate; `percent` spans [-200, 200]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeltaVolume {
    pub delta: f64,
    pub percent: f64,
}

impl DeltaVolume {
    /// Percent expressed as a fraction, e.g. 0.3 for +30%.
    pub fn ratio(&self) -> f64 {
        self.percent / 100.0
    }
}

impl DeltaVolumeWindow {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            buys: RingBuffer::new(period),
            sells: RingBuffer::new(period),
        }
    }

    /// Record a completed bar. Dojis count as neither side; empty bars are skipped.
    pub fn record_bar(&mut self, bar: &Bar) {
        if bar.volume <= 0.0 {
            return;
        }
        let (buy, sell) = if bar.close > bar.open {
            (bar.volume, 0.0)
        } else if bar.close < bar.open {
            (0.0, bar.volume)
        } else {
            (0.0, 0.0)
        };
        self.buys.push(buy);
        self.sells.push(sell);
    }

    /// Imbalance over the last `period - 1` completed bars plus the
    /// in-progress bar, whose volume is split by the historical buy share.
    pub fn estimate(&self, partial: Option<&Bar>) -> DeltaVolume {
        let n = self.buys.len();
        let take = (self.period - 1).min(n);
        let buy_hist: f64 = self.buys.iter().skip(n - take).sum();
        let sell_hist: f64 = self.sells.iter().skip(n - take).sum();

        let mut buy = buy_hist;
        let mut sell = sell_hist;
        let hist_total = buy_hist + sell_hist;
        if let Some(bar) = partial {
            if bar.volume > 0.0 && hist_total > 0.0 {
                let buy_share = buy_hist / hist_total;
                buy += bar.volume * buy_share;
                sell += bar.volume * (1.0 - buy_share);
            }
        }

        let avg = (buy + sell) / 2.0;
        if avg > 0.0 {
            DeltaVolume {
                delta: buy - sell,
                percent: (buy - sell) / avg * 100.0,
            }
        } else {
            DeltaVolume::default()
        }
    }
}
