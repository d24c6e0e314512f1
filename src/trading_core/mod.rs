//! Trading Core - trend following logic shared by replay and live feeds
//!
//! This module contains the core strategy components:
//! - Bar aggregation from 1-minute ticks
//! - VIDYA and parabolic SAR trend sources
//! - Trend-angle classification
//! - Volatility, ATR-ratio and EMA filters
//! - Position state machine emitting typed trade signals

pub mod bars;
pub mod config;
pub mod ema;
pub mod observer;
pub mod order_flow;
pub mod ring;
pub mod sar;
pub mod signals;
pub mod stats;
pub mod trader;
pub mod trend_angle;
pub mod trend_source;
pub mod vidya;
pub mod volatility;

// Re-export commonly used types
pub use bars::{Bar, BarAggregator, Timeframe};
pub use config::{ConfigError, EntryConfig, EntryGates, EntryMode, StrategyConfig};
pub use observer::{NullObserver, RecordingObserver, TraderObserver, TracingObserver};
pub use sar::{SarConfig, SarIndicator};
pub use signals::{CloseReason, EntrySignal, EntryTrigger, ExitSignal, LockState, Position, StopUpdate, TradeSignal};
pub use stats::TradingSummary;
pub use trader::{IndicatorSnapshot, PendingEntry, SarTrader, TickOutcome, TrendTrader, VidyaTrader};
pub use trend_angle::{AngleReading, AngleTrend, TrendAngleConfig};
pub use trend_source::{Direction, SourceSnapshot, Trend, TrendSource, TrendView};
pub use vidya::{VidyaConfig, VidyaIndicator};
