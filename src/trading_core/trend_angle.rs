//! Regression angle of an EMA midline, gated by fit quality.
//!
//! The midline window is normalized to percent change from its first value
//! before fitting, so the angle is comparable across price levels.

use serde::{Deserialize, Serialize};

use super::ema::Ema;
use super::ring::RingBuffer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendAngleConfig {
    /// Enables the independent angle entry
    pub enabled: bool,
    pub midline_period: usize,
    pub window_size: usize,
    /// Degrees
    pub angle_threshold: f64,
    pub r_squared_threshold: f64,
}

impl Default for TrendAngleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            midline_period: 14,
            window_size: 10,
            angle_threshold: 0.04,
            r_squared_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum AngleTrend {
    Up,
    Down,
    #[default]
    Ranging,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AngleReading {
    pub angle: f64,
    /// Percent per bar
    pub slope: f64,
    pub r_squared: f64,
    pub trend: AngleTrend,
    pub ready: bool,
}

/// OLS fit of `values` against their index.
/// Returns `(slope, r_squared)`; R² is 0 for a constant series.
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / nf;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sxy += dx * (y - mean_y);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let fitted = slope * i as f64 + intercept;
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot != 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };
    (slope, r_squared)
}

#[derive(Debug, Clone)]
pub struct TrendAngleClassifier {
    config: TrendAngleConfig,
    midline: Ema,
    window: RingBuffer<f64>,
    reading: AngleReading,
}

impl TrendAngleClassifier {
    pub fn new(config: TrendAngleConfig) -> Self {
        Self {
            midline: Ema::new(config.midline_period),
            window: RingBuffer::new(config.window_size.max(2)),
            reading: AngleReading::default(),
            config,
        }
    }

    pub fn reading(&self) -> AngleReading {
        self.reading
    }

    /// Feed a completed bar close.
    pub fn update(&mut self, close: f64) -> AngleReading {
        let mid = self.midline.update(close);
        self.window.push(mid);
        if !self.window.is_full() {
            self.reading = AngleReading::default();
            return self.reading;
        }

        let base = self.window.first().unwrap_or(mid);
        if base == 0.0 {
            self.reading = AngleReading { ready: true, ..Default::default() };
            return self.reading;
        }

        let pct: Vec<f64> = self.window.iter().map(|m| (m - base) / base * 100.0).collect();
        let (slope, r_squared) = linear_fit(&pct);
        let angle = (slope / 100.0).atan().to_degrees();

        let trend = if r_squared < self.config.r_squared_threshold {
            AngleTrend::Ranging
        } else if angle > self.config.angle_threshold {
            AngleTrend::Up
        } else if angle < -self.config.angle_threshold {
            AngleTrend::Down
        } else {
            AngleTrend::Ranging
        };

        self.reading = AngleReading {
            angle,
            slope,
            r_squared,
            trend,
            ready: true,
        };
        self.reading
    }
}
