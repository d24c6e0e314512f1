//! Strategy configuration: one immutable struct, validated once at startup.

use serde::{Deserialize, Serialize};

use super::bars::Timeframe;
use super::ema::{MultiEmaConfig, TrendFilterConfig};
use super::sar::SarConfig;
use super::trend_angle::TrendAngleConfig;
use super::vidya::VidyaConfig;
use super::volatility::{AtrRatioConfig, VolatilityConfig};

/// Upper bound on `entry.lock_periods`
pub const MAX_LOCK_PERIODS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config value {field} = {value}: {reason}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("inconsistent config {field}: {reason}")]
    Inconsistent {
        field: &'static str,
        reason: String,
    },
}

/// How a qualified trend entry is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    /// Wait for price to pull back to the nearest support/resistance level
    #[default]
    Pullback,
    /// Open at the reference price as soon as the gates pass
    Immediate,
}

/// Entry conditions. Every enabled gate must pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryGates {
    /// Trend must come from a band crossing
    pub trend_breakthrough: bool,
    /// Trend must have changed on this bar
    pub direction_change: bool,
    /// Trend line slope must agree with the direction
    pub indicator_slope: bool,
    /// Order flow since the last cross must agree (>= 0 long, <= 0 short)
    pub order_flow: bool,
    /// Long-period trend filter slope must agree
    pub trend_filter_slope: bool,
    /// Recent ATR must not be spiking
    pub atr_ratio: bool,
    /// Higher-timeframe volatility must be sufficient
    pub volatility: bool,
    /// Higher-timeframe EMA stack must be aligned
    pub ema_alignment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub mode: EntryMode,
    pub gates: EntryGates,
    /// Periods entries stay locked after a losing exit, current one included
    pub lock_periods: u32,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            mode: EntryMode::Pullback,
            gates: EntryGates::default(),
            lock_periods: 5,
        }
    }
}

/// Full strategy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Bar period the indicators run on
    pub timeframe: Timeframe,
    pub initial_capital: f64,
    /// Share of cash committed per entry (100 = all cash)
    pub position_size_pct: f64,
    /// Fee charged on each side as a fraction of notional
    pub fee_rate: f64,
    /// Fixed take profit distance in percent (0 falls back to 1.5%)
    pub take_profit_pct: f64,
    /// Hard stop distance in percent (0 disables the max-loss level)
    pub max_loss_pct: f64,
    /// Flow ratio above which a take-profit touch is deferred
    pub flow_trigger: f64,
    /// Flow ratio a deferred take profit waits for
    pub flow_target: f64,
    /// Tighten the stop to the exit band on every completed bar
    pub trail_stop_to_band: bool,
    pub entry: EntryConfig,
    pub vidya: VidyaConfig,
    pub sar: SarConfig,
    pub trend_angle: TrendAngleConfig,
    pub trend_filter: TrendFilterConfig,
    pub volatility: VolatilityConfig,
    pub multi_ema: MultiEmaConfig,
    pub atr_ratio: AtrRatioConfig,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M30,
            initial_capital: 100_000.0,
            position_size_pct: 30.0,
            fee_rate: 0.0002,
            take_profit_pct: 1.4,
            max_loss_pct: 2.5,
            flow_trigger: 0.3,
            flow_target: 1.01,
            trail_stop_to_band: true,
            entry: EntryConfig::default(),
            vidya: VidyaConfig::default(),
            sar: SarConfig::default(),
            trend_angle: TrendAngleConfig::default(),
            trend_filter: TrendFilterConfig::default(),
            volatility: VolatilityConfig::default(),
            multi_ema: MultiEmaConfig::default(),
            atr_ratio: AtrRatioConfig::default(),
        }
    }
}

fn check(field: &'static str, value: f64, ok: bool, reason: &'static str) -> Result<(), ConfigError> {
    if ok && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value, reason })
    }
}

fn check_period(field: &'static str, value: usize) -> Result<(), ConfigError> {
    check(field, value as f64, value >= 1, "must be at least 1")
}

impl StrategyConfig {
    /// Range-check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("initial_capital", self.initial_capital, self.initial_capital > 0.0, "must be positive")?;
        check(
            "position_size_pct",
            self.position_size_pct,
            self.position_size_pct > 0.0 && self.position_size_pct <= 100.0,
            "must be in (0, 100]",
        )?;
        check("fee_rate", self.fee_rate, (0.0..0.1).contains(&self.fee_rate), "must be in [0, 0.1)")?;
        check(
            "take_profit_pct",
            self.take_profit_pct,
            (0.0..100.0).contains(&self.take_profit_pct),
            "must be in [0, 100)",
        )?;
        check(
            "max_loss_pct",
            self.max_loss_pct,
            (0.0..100.0).contains(&self.max_loss_pct),
            "must be in [0, 100)",
        )?;
        check("flow_trigger", self.flow_trigger, self.flow_trigger >= 0.0, "must not be negative")?;
        if self.flow_target <= self.flow_trigger {
            return Err(ConfigError::Inconsistent {
                field: "flow_target",
                reason: format!(
                    "target {} must exceed trigger {}",
                    self.flow_target, self.flow_trigger
                ),
            });
        }
        check(
            "entry.lock_periods",
            self.entry.lock_periods as f64,
            (1..=MAX_LOCK_PERIODS).contains(&self.entry.lock_periods),
            "must be in [1, 10000]",
        )?;

        let v = &self.vidya;
        check_period("vidya.length", v.length)?;
        check_period("vidya.momentum", v.momentum)?;
        check_period("vidya.smooth_length", v.smooth_length)?;
        check_period("vidya.atr_period", v.atr_period)?;
        check_period("vidya.delta_volume_period", v.delta_volume_period)?;
        check("vidya.band_distance", v.band_distance, v.band_distance > 0.0, "must be positive")?;

        let s = &self.sar;
        check_period("sar.length", s.length)?;
        check_period("sar.basis_ma_length", s.basis_ma_length)?;
        check_period("sar.delta_volume_period", s.delta_volume_period)?;
        check("sar.mult", s.mult, s.mult > 0.0, "must be positive")?;
        check("sar.damping", s.damping, (0.0..=1.0).contains(&s.damping), "must be in [0, 1]")?;
        check("sar.af_start", s.af_start, s.af_start > 0.0, "must be positive")?;
        check("sar.af_increment", s.af_increment, s.af_increment >= 0.0, "must not be negative")?;
        check("sar.af_max", s.af_max, s.af_max >= s.af_start, "must be at least af_start")?;
        check(
            "sar.rsi_overbought",
            s.rsi_overbought,
            s.rsi_overbought > s.rsi_oversold && s.rsi_overbought <= 100.0,
            "must be above rsi_oversold and at most 100",
        )?;
        check("sar.rsi_oversold", s.rsi_oversold, s.rsi_oversold >= 0.0, "must not be negative")?;

        let a = &self.trend_angle;
        check_period("trend_angle.midline_period", a.midline_period)?;
        check("trend_angle.window_size", a.window_size as f64, a.window_size >= 2, "must be at least 2")?;
        check("trend_angle.angle_threshold", a.angle_threshold, a.angle_threshold >= 0.0, "must not be negative")?;
        check(
            "trend_angle.r_squared_threshold",
            a.r_squared_threshold,
            (0.0..=1.0).contains(&a.r_squared_threshold),
            "must be in [0, 1]",
        )?;

        let f = &self.trend_filter;
        check_period("trend_filter.ema_period", f.ema_period)?;
        check_period("trend_filter.smooth_period", f.smooth_period)?;
        check(
            "trend_filter.slope_lookback",
            f.slope_lookback as f64,
            f.slope_lookback >= 2,
            "must be at least 2",
        )?;

        let vol = &self.volatility;
        check_period("volatility.length", vol.length)?;
        check_period("volatility.ema_period", vol.ema_period)?;
        check("volatility.mult", vol.mult, vol.mult > 0.0, "must be positive")?;

        let m = &self.multi_ema;
        check_period("multi_ema.fast", m.fast)?;
        check("multi_ema.mid", m.mid as f64, m.mid > m.fast, "must exceed fast")?;
        check("multi_ema.slow", m.slow as f64, m.slow > m.mid, "must exceed mid")?;

        let r = &self.atr_ratio;
        check_period("atr_ratio.fast", r.fast)?;
        check("atr_ratio.slow", r.slow as f64, r.slow >= r.fast, "must be at least fast")?;
        check("atr_ratio.max_ratio", r.max_ratio, r.max_ratio > 0.0, "must be positive")?;

        Ok(())
    }

    /// Take profit distance as a fraction, with the 1.5% fallback.
    pub fn take_profit_fraction(&self) -> f64 {
        if self.take_profit_pct > 0.0 {
            self.take_profit_pct / 100.0
        } else {
            0.015
        }
    }
}
