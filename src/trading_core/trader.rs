//! Core Trading Logic
//!
//! Broker-agnostic position state machine used by both replay and live
//! feeds. It consumes 1-minute ticks, drives one [`TrendSource`] on
//! completed bars and returns the resulting [`TradeSignal`]s.
//!
//! Lifecycle: `Flat -> (PendingEntry) -> Open -> Flat`.
//! - Entries are evaluated at bar boundaries, plus once on the tick after a
//!   profitable exit.
//! - Pending pullback targets and exits are evaluated on every tick.
//! - A losing exit locks entries until the end of its period plus
//!   `lock_periods - 1` further periods.
//!
//! Time only comes from tick timestamps, so replays are deterministic.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::bars::{Bar, BarAggregator};
use super::config::{ConfigError, EntryMode, StrategyConfig};
use super::ema::{EmaStack, MultiEmaCalculator, SmoothedEma};
use super::observer::{TraderObserver, TracingObserver};
use super::sar::SarIndicator;
use super::signals::{
    CloseReason, EntrySignal, EntryTrigger, ExitSignal, LockState, Position, StopUpdate, TradeSignal,
};
use super::stats::{TradeStats, TradingSummary};
use super::trend_angle::{AngleReading, AngleTrend, TrendAngleClassifier};
use super::trend_source::{Direction, SourceSnapshot, TrendSource, TrendView};
use super::vidya::VidyaIndicator;
use super::volatility::{AtrRatioFilter, VolatilityCalculator, VolatilityReading};

/// Long stops sit this far below the exit band at entry (shorts above)
const BAND_STOP_BUFFER: f64 = 0.01;
/// Percentage stop used when no max-loss is configured
const DEFAULT_STOP_FRACTION: f64 = 0.02;

/// Entry waiting for price to reach a support/resistance level
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PendingEntry {
    pub direction: Direction,
    pub price: f64,
    pub armed_at: DateTime<Utc>,
}

/// Indicator and state machine state after a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub source: SourceSnapshot,
    pub trend_filter: Option<f64>,
    pub angle: AngleReading,
    pub volatility: Option<VolatilityReading>,
    pub ema_stack: Option<EmaStack>,
    pub atr_ratio: Option<f64>,
    pub flow_ratio: f64,
    pub position: Option<Position>,
    pub pending_entry: Option<PendingEntry>,
    pub lock: LockState,
}

/// Result of one `update` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutcome {
    pub signals: Vec<TradeSignal>,
    pub is_new_bar: bool,
    pub snapshot: IndicatorSnapshot,
}

pub type VidyaTrader<O = TracingObserver> = TrendTrader<VidyaIndicator, O>;
pub type SarTrader<O = TracingObserver> = TrendTrader<SarIndicator, O>;

/// Generic trend-following position state machine
pub struct TrendTrader<S: TrendSource, O: TraderObserver = TracingObserver> {
    config: StrategyConfig,
    source: S,
    observer: O,
    aggregator: BarAggregator,
    trend_filter: SmoothedEma,
    atr_ratio: AtrRatioFilter,
    volatility: VolatilityCalculator,
    multi_ema: MultiEmaCalculator,
    angle: TrendAngleClassifier,
    view: TrendView,

    last_tick: Option<DateTime<Utc>>,
    position: Option<Position>,
    pending: Option<PendingEntry>,
    /// Take profit touched with strong flow, waiting for the stronger target
    tp_deferred: bool,
    lock: LockState,

    cash: f64,
    stats: TradeStats,
    signals_emitted: u32,
}

impl<O: TraderObserver> TrendTrader<VidyaIndicator, O> {
    /// VIDYA-driven trader from a config, validating it first.
    pub fn vidya(config: StrategyConfig, observer: O) -> Result<Self, ConfigError> {
        let source = VidyaIndicator::new(config.vidya.clone());
        Self::try_new(config, source, observer)
    }
}

impl<O: TraderObserver> TrendTrader<SarIndicator, O> {
    /// SAR-driven trader from a config, validating it first.
    pub fn sar(config: StrategyConfig, observer: O) -> Result<Self, ConfigError> {
        let source = SarIndicator::new(config.sar.clone());
        Self::try_new(config, source, observer)
    }
}

impl<S: TrendSource, O: TraderObserver> TrendTrader<S, O> {
    /// Build from an already validated config.
    pub fn new(config: StrategyConfig, source: S, observer: O) -> Self {
        Self {
            aggregator: BarAggregator::new(config.timeframe),
            trend_filter: SmoothedEma::new(config.trend_filter.clone()),
            atr_ratio: AtrRatioFilter::new(config.atr_ratio.clone()),
            volatility: VolatilityCalculator::new(config.volatility.clone()),
            multi_ema: MultiEmaCalculator::new(&config.multi_ema),
            angle: TrendAngleClassifier::new(config.trend_angle.clone()),
            view: TrendView::default(),
            last_tick: None,
            position: None,
            pending: None,
            tp_deferred: false,
            lock: LockState::default(),
            cash: config.initial_capital,
            stats: TradeStats::new(config.initial_capital),
            signals_emitted: 0,
            source,
            observer,
            config,
        }
    }

    pub fn try_new(config: StrategyConfig, source: S, observer: O) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config, source, observer))
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn pending_entry(&self) -> Option<PendingEntry> {
        self.pending
    }

    pub fn lock_state(&self) -> LockState {
        self.lock
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Cash plus the cost basis of the open position.
    pub fn equity(&self) -> f64 {
        self.cash + self.position.as_ref().map_or(0.0, |p| p.invested_amount)
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none() && self.pending.is_none()
    }

    /// Feed a historical batch. Equivalent to calling [`update`](Self::update)
    /// on each tick in order; the emitted signals are returned together.
    pub fn warm_up(&mut self, ticks: &[Bar]) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        for tick in ticks {
            signals.extend(self.update(tick).signals);
        }
        signals
    }

    /// Process one 1-minute tick.
    pub fn update(&mut self, tick: &Bar) -> TickOutcome {
        if let Some(last) = self.last_tick {
            if tick.timestamp < last {
                self.observer.on_tick_rejected(tick.timestamp, last);
                return TickOutcome {
                    signals: Vec::new(),
                    is_new_bar: false,
                    snapshot: self.snapshot(last),
                };
            }
        }
        self.last_tick = Some(tick.timestamp);

        if self.lock.locked_until.is_some() && !self.lock.is_locked(tick.timestamp) {
            self.lock.refresh(tick.timestamp);
            self.observer.on_unlocked(tick.timestamp);
        }
        let fast_check = self.lock.take_fast_reentry();

        let mut signals = Vec::new();

        // Step 1: higher-timeframe filters see every tick
        self.volatility.update(tick);
        self.multi_ema.update(tick);

        // Step 2: bar boundary work
        let completed = self.aggregator.update(tick);
        let is_new_bar = completed.is_some();
        if let Some(bar) = completed {
            self.process_bar(&bar, tick, &mut signals);
        }
        if fast_check && !is_new_bar {
            self.evaluate_entries(tick, &mut signals);
        }

        // Step 3: tick-level exits and pending entry confirmation
        if self.position.is_some() {
            self.check_exits(tick, &mut signals);
        } else if self.pending.is_some() {
            self.check_pending(tick, &mut signals);
        }

        self.signals_emitted += signals.len() as u32;
        TickOutcome {
            signals,
            is_new_bar,
            snapshot: self.snapshot(tick.timestamp),
        }
    }

    fn process_bar(&mut self, bar: &Bar, tick: &Bar, signals: &mut Vec<TradeSignal>) {
        self.atr_ratio.update(bar);
        self.angle.update(bar.close);
        self.trend_filter.update(bar.close);
        self.view = self.source.on_bar(bar);

        if self.position.is_some() {
            self.trail_stop(tick.timestamp, signals);
        } else {
            self.evaluate_entries(tick, signals);
        }
    }

    fn trail_stop(&mut self, now: DateTime<Utc>, signals: &mut Vec<TradeSignal>) {
        if !self.config.trail_stop_to_band || !self.view.ready {
            return;
        }
        let Some(bands) = self.view.bands else {
            return;
        };
        let Some(pos) = self.position.as_mut() else {
            return;
        };
        let level = bands.exit_level(pos.direction);
        if !pos.tightens_stop(level) {
            return;
        }
        let update = StopUpdate {
            timestamp: now,
            direction: pos.direction,
            previous: pos.stop_loss,
            stop_loss: level,
        };
        pos.stop_loss = level;
        self.observer.on_stop_update(&update);
        signals.push(TradeSignal::UpdateStopLoss(update));
    }

    /// Entry evaluation while flat: angle entry first, then the trend entry.
    fn evaluate_entries(&mut self, tick: &Bar, signals: &mut Vec<TradeSignal>) {
        if self.position.is_some() {
            return;
        }
        if self.lock.is_locked(tick.timestamp) {
            self.pending = None;
            return;
        }
        if !self.view.ready {
            return;
        }
        let reference = tick.open;

        if self.config.trend_angle.enabled {
            let reading = self.angle.reading();
            let direction = match reading.trend {
                AngleTrend::Up if reading.ready => Some(Direction::Long),
                AngleTrend::Down if reading.ready => Some(Direction::Short),
                _ => None,
            };
            if let Some(direction) = direction {
                let reason = format!(
                    "angle {:+.3} deg | r2 {:.3} | ref {:.2}",
                    reading.angle, reading.r_squared, reference
                );
                self.open_position(direction, reference, EntryTrigger::Angle, tick.timestamp, reason, signals);
                return;
            }
        }

        let Some(direction) = self.view.trend.direction() else {
            self.clear_pending(tick.timestamp);
            return;
        };

        if let Some(gate) = self.gate_failure(direction) {
            self.observer.on_entry_rejected(direction, gate);
            self.clear_pending(tick.timestamp);
            return;
        }

        match self.config.entry.mode {
            EntryMode::Immediate => {
                let reason = format!(
                    "{} trend {} | ref {:.2} | flow {:+.0}",
                    self.source.name(),
                    direction,
                    reference,
                    self.view.order_flow
                );
                self.open_position(direction, reference, EntryTrigger::Trend, tick.timestamp, reason, signals);
            }
            EntryMode::Pullback => match self.pullback_level(direction, reference) {
                Some(price) => {
                    self.pending = Some(PendingEntry {
                        direction,
                        price,
                        armed_at: tick.timestamp,
                    });
                    self.observer.on_target_armed(direction, price, tick.timestamp);
                }
                None => self.clear_pending(tick.timestamp),
            },
        }
    }

    fn clear_pending(&mut self, now: DateTime<Utc>) {
        if self.pending.take().is_some() {
            self.observer.on_target_cleared(now);
        }
    }

    /// Nearest support below (long) or resistance above (short) the reference.
    fn pullback_level(&self, direction: Direction, reference: f64) -> Option<f64> {
        match direction {
            Direction::Long => self
                .view
                .supports
                .iter()
                .copied()
                .filter(|&s| s < reference)
                .reduce(f64::max),
            Direction::Short => self
                .view
                .resistances
                .iter()
                .copied()
                .filter(|&r| r > reference)
                .reduce(f64::min),
        }
    }

    /// Name of the first enabled gate that refuses `direction`.
    fn gate_failure(&self, direction: Direction) -> Option<&'static str> {
        let gates = &self.config.entry.gates;
        let long = direction == Direction::Long;

        if gates.trend_breakthrough && !self.view.from_bands {
            return Some("trend_breakthrough");
        }
        if gates.direction_change && !self.view.trend_changed {
            return Some("direction_change");
        }
        if gates.indicator_slope && !self.view.slope.supports(direction) {
            return Some("indicator_slope");
        }
        if gates.order_flow {
            let flow = self.view.order_flow;
            if (long && flow < 0.0) || (!long && flow > 0.0) {
                return Some("order_flow");
            }
        }
        if gates.trend_filter_slope {
            let agrees = if long {
                self.trend_filter.is_rising()
            } else {
                self.trend_filter.is_falling()
            };
            if !agrees {
                return Some("trend_filter_slope");
            }
        }
        if gates.atr_ratio && !self.atr_ratio.passes() {
            return Some("atr_ratio");
        }
        if gates.volatility && !self.volatility.is_sufficient() {
            return Some("volatility");
        }
        if gates.ema_alignment {
            let aligned = if long {
                self.multi_ema.long_aligned()
            } else {
                self.multi_ema.short_aligned()
            };
            if !aligned {
                return Some("ema_alignment");
            }
        }
        if !self.source.permits(direction) {
            return Some(self.source.name());
        }
        None
    }

    fn check_pending(&mut self, tick: &Bar, signals: &mut Vec<TradeSignal>) {
        let Some(pending) = self.pending else {
            return;
        };
        if self.lock.is_locked(tick.timestamp) {
            self.clear_pending(tick.timestamp);
            return;
        }
        let reached = match pending.direction {
            Direction::Long => tick.low <= pending.price,
            Direction::Short => tick.high >= pending.price,
        };
        if !reached {
            return;
        }
        let reason = format!(
            "{} pullback to {:.2} (set {})",
            self.source.name(),
            pending.price,
            pending.armed_at
        );
        self.open_position(
            pending.direction,
            pending.price,
            EntryTrigger::Pullback,
            tick.timestamp,
            reason,
            signals,
        );
    }

    fn open_position(
        &mut self,
        direction: Direction,
        price: f64,
        trigger: EntryTrigger,
        now: DateTime<Utc>,
        reason: String,
        signals: &mut Vec<TradeSignal>,
    ) {
        if self.position.is_some() || price <= 0.0 || !price.is_finite() {
            return;
        }

        let invested = if self.config.position_size_pct >= 100.0 {
            self.cash
        } else {
            self.cash * self.config.position_size_pct / 100.0
        };
        let fee = invested * self.config.fee_rate;
        let net_invested = invested - fee;
        let shares = (net_invested / price * 10_000.0).round() / 10_000.0;
        if invested <= 0.0 || shares <= 0.0 {
            return;
        }

        let stop_loss = self.initial_stop(direction, price, trigger);
        let tp = self.config.take_profit_fraction();
        let take_profit = price * (1.0 + direction.sign() * tp);
        let max_loss = (self.config.max_loss_pct > 0.0)
            .then(|| price * (1.0 - direction.sign() * self.config.max_loss_pct / 100.0));

        let position = Position {
            direction,
            entry_price: price,
            shares,
            invested_amount: net_invested,
            stop_loss,
            take_profit,
            max_loss,
            opened_at: now,
        };
        debug_assert!(position.levels_consistent());

        self.cash -= invested;
        self.position = Some(position);
        self.pending = None;
        self.tp_deferred = false;

        let entry = EntrySignal {
            timestamp: now,
            price,
            stop_loss,
            take_profit,
            max_loss,
            invested_amount: net_invested,
            shares,
            trigger,
            reason,
        };
        self.observer.on_entry(direction, &entry);
        signals.push(TradeSignal::open(direction, entry));
    }

    fn initial_stop(&self, direction: Direction, price: f64, trigger: EntryTrigger) -> f64 {
        let pct_stop = if self.config.max_loss_pct > 0.0 {
            price * (1.0 - direction.sign() * self.config.max_loss_pct / 100.0)
        } else {
            price * (1.0 - direction.sign() * DEFAULT_STOP_FRACTION)
        };
        if trigger == EntryTrigger::Angle {
            return pct_stop;
        }
        match (direction, self.view.bands) {
            (Direction::Long, Some(b)) if b.lower < price => b.lower * (1.0 - BAND_STOP_BUFFER),
            (Direction::Short, Some(b)) if b.upper > price => b.upper * (1.0 + BAND_STOP_BUFFER),
            _ => pct_stop,
        }
    }

    /// Exits in priority order: take profit (with flow deferral), band,
    /// max loss, trend filter.
    fn check_exits(&mut self, tick: &Bar, signals: &mut Vec<TradeSignal>) {
        let Some(pos) = self.position.clone() else {
            return;
        };
        let dir = pos.direction;
        let long = dir == Direction::Long;

        // 1. Take profit, possibly deferred on strong continuation flow
        let partial = self.aggregator.current();
        let favorable_flow = self.source.flow_ratio(partial.as_ref()) * dir.sign();
        let touched = if long {
            tick.high >= pos.take_profit
        } else {
            tick.low <= pos.take_profit
        };

        if self.tp_deferred {
            let holds = if long {
                tick.close >= pos.take_profit
            } else {
                tick.close <= pos.take_profit
            };
            if touched && holds && favorable_flow >= self.config.flow_target {
                let detail = format!(
                    "flow {:+.2}% reached {:+.2}% above {:.2}",
                    favorable_flow * 100.0,
                    self.config.flow_target * 100.0,
                    pos.take_profit
                );
                self.close_position(tick.close, CloseReason::FlowTakeProfit, tick.timestamp, detail, signals);
                return;
            }
            if !holds {
                let fill = if touched { pos.take_profit } else { tick.open };
                let detail = format!("back through {:.2} while deferred", pos.take_profit);
                self.close_position(fill, CloseReason::TakeProfitReversal, tick.timestamp, detail, signals);
                return;
            }
            return;
        }

        if touched {
            if favorable_flow > self.config.flow_trigger {
                self.tp_deferred = true;
                self.observer
                    .on_take_profit_deferred(dir, favorable_flow, self.config.flow_target);
            } else {
                let detail = format!("level {:.2} | flow {:+.2}%", pos.take_profit, favorable_flow * 100.0);
                self.close_position(pos.take_profit, CloseReason::TakeProfit, tick.timestamp, detail, signals);
            }
            return;
        }

        // 2. Exit band (falls back to the stop before bands exist)
        let band_level = match self.view.bands {
            Some(b) if self.view.ready => b.exit_level(dir),
            _ => pos.stop_loss,
        };
        if let Some(fill) = crossed(tick, dir, band_level) {
            let detail = format!("band {:.2}", band_level);
            self.close_position(fill, CloseReason::BandStop, tick.timestamp, detail, signals);
            return;
        }

        // 3. Hard max loss
        if let Some(level) = pos.max_loss {
            if let Some(fill) = crossed(tick, dir, level) {
                let detail = format!("max loss {:.2}", level);
                self.close_position(fill, CloseReason::MaxLoss, tick.timestamp, detail, signals);
                return;
            }
        }

        // 4. Trend filter, only once the loss exceeds the take-profit distance
        if let Some(level) = self.trend_filter.value() {
            if crossed(tick, dir, level).is_some() {
                let pnl = pos.gross_pnl(level);
                let loss_pct = if pos.invested_amount > 0.0 {
                    -pnl / pos.invested_amount * 100.0
                } else {
                    0.0
                };
                if pnl < 0.0 && loss_pct > self.config.take_profit_pct {
                    let detail = format!("trend filter {:.2} | loss {:.2}%", level, loss_pct);
                    self.close_position(level, CloseReason::TrendFilter, tick.timestamp, detail, signals);
                }
            }
        }
    }

    fn close_position(
        &mut self,
        price: f64,
        reason: CloseReason,
        now: DateTime<Utc>,
        detail: String,
        signals: &mut Vec<TradeSignal>,
    ) {
        let Some(pos) = self.position.take() else {
            return;
        };

        let gross = pos.gross_pnl(price);
        let fee = (pos.invested_amount + gross) * self.config.fee_rate;
        let profit_loss = gross - fee;
        self.cash += pos.invested_amount + profit_loss;
        self.pending = None;
        self.tp_deferred = false;

        let exit = ExitSignal {
            timestamp: now,
            price,
            reason,
            profit_loss,
            invested_amount: pos.invested_amount,
            shares: pos.shares,
            detail,
        };
        self.stats.record(&exit, self.cash);
        self.observer.on_exit(pos.direction, &exit);

        if profit_loss > 0.0 {
            self.lock.unlock_after_profit();
        } else {
            let until = self
                .lock
                .lock_after_loss(now, self.config.timeframe, self.config.entry.lock_periods);
            self.observer.on_locked(until);
        }

        signals.push(TradeSignal::close(pos.direction, exit));
    }

    fn snapshot(&self, now: DateTime<Utc>) -> IndicatorSnapshot {
        let partial = self.aggregator.current();
        IndicatorSnapshot {
            timestamp: now,
            source: self.source.snapshot(),
            trend_filter: self.trend_filter.value(),
            angle: self.angle.reading(),
            volatility: self.volatility.reading(),
            ema_stack: self.multi_ema.stack(),
            atr_ratio: self.atr_ratio.ratio(),
            flow_ratio: self.source.flow_ratio(partial.as_ref()),
            position: self.position.clone(),
            pending_entry: self.pending,
            lock: self.lock,
        }
    }

    pub fn summary(&self) -> TradingSummary {
        self.stats.summary(self.equity(), self.signals_emitted)
    }
}

/// Fill price when `tick` trades through `level` against `direction`,
/// taking the open on a gap.
fn crossed(tick: &Bar, direction: Direction, level: f64) -> Option<f64> {
    match direction {
        Direction::Long if tick.low <= level => Some(tick.open.min(level)),
        Direction::Short if tick.high >= level => Some(tick.open.max(level)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::bars::tests::ts;
    use crate::trading_core::bars::Timeframe;
    use crate::trading_core::config::EntryGates;
    use crate::trading_core::observer::NullObserver;
    use crate::trading_core::sar::SarSnapshot;
    use crate::trading_core::trend_source::{Bands, Slope, Trend};
    use approx::assert_relative_eq;
    use chrono::Duration;

    /// Source whose view is scripted by the test
    #[derive(Default)]
    struct ScriptedSource {
        view: TrendView,
        flow: f64,
        veto: bool,
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
            self.flow
        }

        fn permits(&self, _direction: Direction) -> bool {
            !self.veto
        }

        fn snapshot(&self) -> SourceSnapshot {
            SourceSnapshot::Sar(SarSnapshot::default())
        }
    }

    fn up_view(supports: Vec<f64>) -> TrendView {
        TrendView {
            ready: true,
            trend: Trend::Up,
            trend_changed: true,
            from_bands: true,
            bands: Some(Bands { upper: 110.0, lower: 95.0 }),
            supports,
            resistances: vec![],
            slope: Slope::Rising,
            order_flow: 10.0,
        }
    }

    fn config(mode: EntryMode) -> StrategyConfig {
        StrategyConfig {
            timeframe: Timeframe::M30,
            initial_capital: 10_000.0,
            position_size_pct: 100.0,
            fee_rate: 0.0,
            take_profit_pct: 2.0,
            max_loss_pct: 3.0,
            entry: crate::trading_core::config::EntryConfig {
                mode,
                gates: EntryGates::default(),
                lock_periods: 5,
            },
            ..Default::default()
        }
    }

    fn tick(minutes: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(ts(10, 0) + Duration::minutes(minutes), open, high, low, close, 1.0)
    }

    fn flat_tick(minutes: i64, price: f64) -> Bar {
        tick(minutes, price, price, price, price)
    }

    fn trader(mode: EntryMode, view: TrendView) -> TrendTrader<ScriptedSource, NullObserver> {
        let source = ScriptedSource { view, ..Default::default() };
        TrendTrader::try_new(config(mode), source, NullObserver).unwrap()
    }

    /// Feed ticks 0..30 at `price`, then the boundary tick at 30 opening at `price`
    fn run_to_boundary(t: &mut TrendTrader<ScriptedSource, NullObserver>, price: f64) -> TickOutcome {
        for m in 0..30 {
            assert!(t.update(&flat_tick(m, price)).signals.is_empty());
        }
        t.update(&flat_tick(30, price))
    }

    #[test]
    fn test_immediate_entry_at_boundary_open() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        let out = run_to_boundary(&mut t, 100.0);
        assert!(out.is_new_bar);
        assert_eq!(out.signals.len(), 1);
        let TradeSignal::OpenLong(entry) = &out.signals[0] else {
            panic!("expected OpenLong, got {:?}", out.signals[0]);
        };
        assert_eq!(entry.price, 100.0);
        // Band 95 is below entry: stop = 95 * 0.99
        assert_relative_eq!(entry.stop_loss, 94.05, epsilon = 1e-9);
        assert_relative_eq!(entry.take_profit, 102.0, epsilon = 1e-9);
        assert_relative_eq!(entry.max_loss.unwrap(), 97.0, epsilon = 1e-9);
        assert_relative_eq!(entry.shares, 100.0);
        assert!(t.position().unwrap().levels_consistent());
    }

    #[test]
    fn test_second_open_refused_while_open() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        run_to_boundary(&mut t, 100.0);
        for m in 31..60 {
            t.update(&flat_tick(m, 100.5));
        }
        let out = t.update(&flat_tick(60, 100.5));
        assert!(out.signals.iter().all(|s| !s.is_entry()));
        assert_eq!(t.position().unwrap().entry_price, 100.0);
    }

    #[test]
    fn test_pullback_waits_for_support() {
        let mut t = trader(EntryMode::Pullback, up_view(vec![97.0, 98.5, 101.0]));
        let out = run_to_boundary(&mut t, 100.0);
        assert!(out.signals.is_empty());
        // Highest support below the reference price
        assert_eq!(t.pending_entry().unwrap().price, 98.5);

        assert!(t.update(&tick(31, 100.0, 100.2, 99.0, 99.5)).signals.is_empty());
        let out = t.update(&tick(32, 99.5, 99.6, 98.4, 98.9));
        let TradeSignal::OpenLong(entry) = &out.signals[0] else {
            panic!("expected OpenLong");
        };
        assert_eq!(entry.price, 98.5);
        assert_eq!(entry.trigger, EntryTrigger::Pullback);
        assert!(t.pending_entry().is_none());
    }

    #[test]
    fn test_take_profit_without_flow() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        run_to_boundary(&mut t, 100.0);
        let out = t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));
        let TradeSignal::CloseLong(exit) = &out.signals[0] else {
            panic!("expected CloseLong");
        };
        assert_eq!(exit.reason, CloseReason::TakeProfit);
        assert_relative_eq!(exit.price, 102.0, epsilon = 1e-9);
        assert_relative_eq!(exit.profit_loss, 200.0, epsilon = 1e-9);
        assert!(t.lock_state().fast_reentry_allowed);
        assert_relative_eq!(t.cash(), 10_200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_deferred_take_profit_confirms_on_flow_target() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.source.flow = 0.5;
        run_to_boundary(&mut t, 100.0);

        // Touch with strong flow defers
        assert!(t.update(&tick(31, 101.0, 102.5, 100.8, 102.2)).signals.is_empty());
        assert!(t.tp_deferred);
        // Still above the level but flow short of target: keep waiting
        assert!(t.update(&tick(32, 102.2, 102.8, 102.1, 102.6)).signals.is_empty());

        t.source.flow = 1.2;
        let out = t.update(&tick(33, 102.6, 103.4, 102.5, 103.1));
        let TradeSignal::CloseLong(exit) = &out.signals[0] else {
            panic!("expected CloseLong");
        };
        assert_eq!(exit.reason, CloseReason::FlowTakeProfit);
        assert_relative_eq!(exit.price, 103.1);
    }

    #[test]
    fn test_deferred_take_profit_reversal_fills_at_level() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.source.flow = 0.5;
        run_to_boundary(&mut t, 100.0);
        t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));

        let out = t.update(&tick(32, 102.2, 102.3, 101.5, 101.6));
        let TradeSignal::CloseLong(exit) = &out.signals[0] else {
            panic!("expected CloseLong");
        };
        assert_eq!(exit.reason, CloseReason::TakeProfitReversal);
        assert_relative_eq!(exit.price, 102.0, epsilon = 1e-9);
        assert!(exit.profit_loss > 0.0);
    }

    #[test]
    fn test_deferral_reversal_on_gap_fills_at_open() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.source.flow = 0.5;
        run_to_boundary(&mut t, 100.0);
        t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));

        let out = t.update(&tick(32, 101.5, 101.8, 101.0, 101.2));
        let exit = out.signals[0].exit().unwrap();
        assert_eq!(exit.reason, CloseReason::TakeProfitReversal);
        assert_relative_eq!(exit.price, 101.5);
    }

    #[test]
    fn test_band_stop_then_lockout() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        run_to_boundary(&mut t, 100.0);

        // Band at 95 is checked before the max-loss level at 97
        let out = t.update(&tick(31, 99.0, 99.0, 94.0, 94.5));
        let exit = out.signals[0].exit().unwrap();
        assert_eq!(exit.reason, CloseReason::BandStop);
        assert_relative_eq!(exit.price, 95.0);
        // Exit at 10:31 -> period ends 11:00, plus 4 periods
        let until = t.lock_state().locked_until.unwrap();
        assert_eq!(until, ts(13, 0));

        // Boundaries inside the lock produce nothing
        let mut m = 32;
        while ts(10, 0) + Duration::minutes(m) < until {
            let out = t.update(&flat_tick(m, 100.0));
            assert!(out.signals.iter().all(|s| !s.is_entry()), "entry at minute {}", m);
            m += 1;
        }
        // The boundary at the unlock instant may enter
        let out = t.update(&flat_tick(m, 100.0));
        assert!(out.signals[0].is_entry());
    }

    #[test]
    fn test_max_loss_when_band_is_far() {
        let mut view = up_view(vec![]);
        view.bands = Some(Bands { upper: 130.0, lower: 80.0 });
        let mut t = trader(EntryMode::Immediate, view);
        run_to_boundary(&mut t, 100.0);
        let out = t.update(&tick(31, 99.0, 99.0, 96.5, 96.8));
        let exit = out.signals[0].exit().unwrap();
        assert_eq!(exit.reason, CloseReason::MaxLoss);
        assert_relative_eq!(exit.price, 97.0, epsilon = 1e-9);
        assert!(exit.profit_loss < 0.0);
    }

    #[test]
    fn test_gap_through_stop_fills_at_open() {
        let mut view = up_view(vec![]);
        view.bands = Some(Bands { upper: 130.0, lower: 80.0 });
        let mut t = trader(EntryMode::Immediate, view);
        run_to_boundary(&mut t, 100.0);
        let out = t.update(&tick(31, 96.0, 96.2, 95.5, 96.0));
        assert_relative_eq!(out.signals[0].price(), 96.0);
    }

    #[test]
    fn test_fast_reentry_once_after_profit() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        run_to_boundary(&mut t, 100.0);
        t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));
        assert!(t.position().is_none());

        // Next tick re-checks the gates off-boundary and re-enters
        let out = t.update(&flat_tick(32, 102.0));
        assert!(out.signals[0].is_entry());
        assert!(!t.lock_state().fast_reentry_allowed);
    }

    #[test]
    fn test_fast_reentry_not_repeated() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.config.entry.gates.direction_change = true;
        run_to_boundary(&mut t, 100.0);
        t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));

        // Gate now refuses, which spends the single re-check
        t.view.trend_changed = false;
        assert!(t.update(&flat_tick(32, 102.0)).signals.is_empty());
        // Gate passes again, but off-boundary ticks no longer check
        t.view.trend_changed = true;
        assert!(t.update(&flat_tick(33, 102.0)).signals.is_empty());
    }

    #[test]
    fn test_gates_and_veto() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.source.veto = true;
        assert!(run_to_boundary(&mut t, 100.0).signals.is_empty());

        let mut view = up_view(vec![]);
        view.order_flow = -5.0;
        let mut t = trader(EntryMode::Immediate, view);
        t.config.entry.gates.order_flow = true;
        assert!(run_to_boundary(&mut t, 100.0).signals.is_empty());

        let mut view = up_view(vec![]);
        view.slope = Slope::Falling;
        let mut t = trader(EntryMode::Immediate, view);
        t.config.entry.gates.indicator_slope = true;
        assert!(run_to_boundary(&mut t, 100.0).signals.is_empty());
    }

    #[test]
    fn test_not_ready_never_enters() {
        let mut view = up_view(vec![]);
        view.ready = false;
        let mut t = trader(EntryMode::Immediate, view);
        assert!(run_to_boundary(&mut t, 100.0).signals.is_empty());
    }

    #[test]
    fn test_out_of_order_tick_ignored() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        t.update(&flat_tick(5, 100.0));
        let out = t.update(&flat_tick(3, 100.0));
        assert!(out.signals.is_empty());
        assert!(!out.is_new_bar);
        assert_eq!(out.snapshot.timestamp, ts(10, 5));
    }

    #[test]
    fn test_short_side_levels() {
        let view = TrendView {
            trend: Trend::Down,
            ..up_view(vec![])
        };
        let mut t = trader(EntryMode::Immediate, view);
        let out = run_to_boundary(&mut t, 100.0);
        let TradeSignal::OpenShort(entry) = &out.signals[0] else {
            panic!("expected OpenShort");
        };
        assert_relative_eq!(entry.stop_loss, 111.1, epsilon = 1e-9);
        assert_relative_eq!(entry.take_profit, 98.0, epsilon = 1e-9);
        assert!(t.position().unwrap().levels_consistent());

        let out = t.update(&tick(31, 99.0, 99.2, 97.5, 97.8));
        let exit = out.signals[0].exit().unwrap();
        assert_eq!(exit.reason, CloseReason::TakeProfit);
        assert!(matches!(out.signals[0], TradeSignal::CloseShort(_)));
        assert_relative_eq!(exit.profit_loss, 200.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stop_trails_band() {
        let mut t = trader(EntryMode::Immediate, up_view(vec![]));
        run_to_boundary(&mut t, 100.0);
        t.source.view.bands = Some(Bands { upper: 110.0, lower: 96.0 });
        for m in 31..60 {
            t.update(&flat_tick(m, 100.5));
        }
        let out = t.update(&flat_tick(60, 100.5));
        let TradeSignal::UpdateStopLoss(update) = &out.signals[0] else {
            panic!("expected UpdateStopLoss");
        };
        assert_relative_eq!(update.previous, 94.05, epsilon = 1e-9);
        assert_eq!(update.stop_loss, 96.0);
        assert_eq!(t.position().unwrap().stop_loss, 96.0);
    }

    #[test]
    fn test_fees_reduce_pnl() {
        let mut cfg = config(EntryMode::Immediate);
        cfg.fee_rate = 0.001;
        let source = ScriptedSource { view: up_view(vec![]), ..Default::default() };
        let mut t = TrendTrader::try_new(cfg, source, NullObserver).unwrap();
        let out = run_to_boundary(&mut t, 100.0);
        let TradeSignal::OpenLong(entry) = &out.signals[0] else {
            panic!("expected OpenLong");
        };
        assert_relative_eq!(entry.invested_amount, 9_990.0);
        assert_relative_eq!(entry.shares, 99.9);

        let out = t.update(&tick(31, 101.0, 102.5, 100.8, 102.2));
        let exit = out.signals[0].exit().unwrap();
        // gross 199.8, fee (9990 + 199.8) * 0.001
        assert_relative_eq!(exit.profit_loss, 199.8 - 10.1898, epsilon = 1e-9);
    }
}
