#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use trend_signals::trend_source::{Bands, Slope};
use trend_signals::vidya::VidyaSnapshot;
use trend_signals::{
    Bar, Direction, SourceSnapshot, StrategyConfig, Timeframe, Trend, TrendSource, TrendView, VidyaConfig,
};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, h, m, 0).unwrap()
}

/// One-minute tick with a narrow range around `price`
pub fn tick_at(ts: DateTime<Utc>, price: f64) -> Bar {
    Bar::new(ts, price, price + 0.05, price - 0.05, price, 1.0)
}

/// Minute ticks for consecutive bars, every tick of bar `k` priced at `prices[k]`
pub fn ticks_for_bars(prices: &[f64], timeframe: Timeframe) -> Vec<Bar> {
    let per_bar = timeframe.minutes();
    let mut ticks = Vec::new();
    for (k, &price) in prices.iter().enumerate() {
        for i in 0..per_bar {
            let ts = start() + Duration::minutes(k as i64 * per_bar + i);
            ticks.push(tick_at(ts, price));
        }
    }
    ticks
}

/// Minute ticks following a random walk of `steps` from 100
pub fn random_walk(steps: &[(f64, f64)]) -> Vec<Bar> {
    let mut price = 100.0;
    steps
        .iter()
        .enumerate()
        .map(|(i, &(step, volume))| {
            let open = price;
            price = (price + step).max(1.0);
            let ts = start() + Duration::minutes(i as i64);
            Bar::new(ts, open, open.max(price) + 0.02, open.min(price) - 0.02, price, volume)
        })
        .collect()
}

/// Fast-warming VIDYA settings
pub fn quick_vidya() -> VidyaConfig {
    VidyaConfig {
        length: 4,
        momentum: 3,
        smooth_length: 2,
        band_distance: 1.0,
        atr_period: 3,
        pivot_left: 2,
        pivot_right: 2,
        delta_volume_period: 5,
        min_warmup_bars: 0,
    }
}

pub fn quick_config(timeframe: Timeframe) -> StrategyConfig {
    StrategyConfig {
        timeframe,
        vidya: quick_vidya(),
        ..Default::default()
    }
}

/// Trend source whose view is set directly
#[derive(Default)]
pub struct ScriptedSource {
    pub view: TrendView,
}

impl ScriptedSource {
    pub fn trending(trend: Trend, lower: f64, upper: f64) -> Self {
        Self {
            view: TrendView {
                ready: true,
                trend,
                trend_changed: true,
                from_bands: true,
                bands: Some(Bands { upper, lower }),
                supports: vec![],
                resistances: vec![],
                slope: Slope::Flat,
                order_flow: 0.0,
            },
        }
    }
}

impl TrendSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn on_bar(&mut self, _bar: &Bar) -> TrendView {
        self.view.clone()
    }

    fn view(&self) -> TrendView {
        self.view.clone()
    }

    fn flow_ratio(&self, _partial: Option<&Bar>) -> f64 {
        0.0
    }

    fn permits(&self, _direction: Direction) -> bool {
        true
    }

    fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot::Vidya(VidyaSnapshot::default())
    }
}
