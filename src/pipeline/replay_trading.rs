//! Replay Trading Module
//!
//! Feeds historical 1-minute candles through the same `TrendTrader` used by
//! live feeds, one tick at a time.

use anyhow::{Context, Result};
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use trend_signals::{
    Bar, PendingEntry, StrategyConfig, Timeframe, TradeSignal, TraderObserver, TradingSummary, TracingObserver,
    TrendSource, TrendTrader,
};

/// Which trend source drives the trader
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Vidya,
    Sar,
}

/// Trader state after the last candle
#[derive(Debug, Clone, PartialEq)]
pub struct EndState {
    pub source: &'static str,
    pub timeframe: Timeframe,
    pub cash: f64,
    pub flat: bool,
    pub pending: Option<PendingEntry>,
}

/// Signals and summary from one pass over the data
pub struct ReplayResult {
    pub summary: TradingSummary,
    pub signals: Vec<TradeSignal>,
    pub warmup_signals: usize,
    pub end: EndState,
}

/// Warm up on the first `warmup_bars` candles, then replay the rest.
pub fn run_strategy<O: TraderObserver>(
    strategy: Strategy,
    config: StrategyConfig,
    bars: &[Bar],
    warmup_bars: usize,
    observer: O,
) -> Result<ReplayResult> {
    match strategy {
        Strategy::Vidya => {
            let trader = TrendTrader::vidya(config, observer).context("Invalid strategy config")?;
            Ok(drive(trader, bars, warmup_bars))
        }
        Strategy::Sar => {
            let trader = TrendTrader::sar(config, observer).context("Invalid strategy config")?;
            Ok(drive(trader, bars, warmup_bars))
        }
    }
}

fn drive<S: TrendSource, O: TraderObserver>(
    mut trader: TrendTrader<S, O>,
    bars: &[Bar],
    warmup_bars: usize,
) -> ReplayResult {
    let split = warmup_bars.min(bars.len());
    let (history, live) = bars.split_at(split);

    let warmup_signals = trader.warm_up(history).len();

    let mut signals = Vec::new();
    for bar in live {
        signals.extend(trader.update(bar).signals);
    }

    ReplayResult {
        summary: trader.summary(),
        signals,
        warmup_signals,
        end: EndState {
            source: trader.source().name(),
            timeframe: trader.config().timeframe,
            cash: trader.cash(),
            flat: trader.is_flat(),
            pending: trader.pending_entry(),
        },
    }
}

/// Run a replay, optionally writing each signal as one JSON line
pub fn run_replay(
    bars: &[Bar],
    config: StrategyConfig,
    strategy: Strategy,
    warmup_bars: usize,
    signals_out: Option<&Path>,
) -> Result<TradingSummary> {
    info!("=== REPLAY TRADING ===");
    info!("Strategy: {:?} on {} bars", strategy, config.timeframe);
    info!("Starting balance: ${:.2}", config.initial_capital);
    info!(
        "Take profit: {:.2}% | Max loss: {:.2}% | Lock periods: {}",
        config.take_profit_pct, config.max_loss_pct, config.entry.lock_periods
    );

    if bars.is_empty() {
        anyhow::bail!("No candles to replay");
    }

    let result = run_strategy(strategy, config, bars, warmup_bars, TracingObserver)?;

    if result.warmup_signals > 0 {
        info!("Discarded {} signals emitted during warm-up", result.warmup_signals);
    }

    if let Some(path) = signals_out {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        for signal in &result.signals {
            serde_json::to_writer(&mut writer, signal)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        info!("Wrote {} signals to {:?}", result.signals.len(), path);
    }

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for signal in &result.signals {
        *by_kind.entry(signal.kind()).or_default() += 1;
    }

    let end = &result.end;
    if !end.flat {
        info!("Run ended with an open position or pending entry (cash ${:.2})", end.cash);
    }
    if let Some(pending) = end.pending {
        info!("Pending {} entry at {:.2} armed {}", pending.direction, pending.price, pending.armed_at);
    }

    let summary = result.summary;
    let replayed = bars.len().saturating_sub(warmup_bars);

    println!("\n═══════════════════════════════════════════════════════════");
    println!("              REPLAY TRADING RESULTS                        ");
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Source:            {} on {}", end.source, end.timeframe);
    println!("Bars Replayed:     {} (+{} warm-up)", replayed, bars.len() - replayed);
    println!("Signals:           {}", result.signals.len());
    for (kind, count) in &by_kind {
        println!("  {:<16} {}", kind, count);
    }
    println!("Total Trades:      {}", summary.total_trades);
    println!("Wins:              {} ({:.1}%)", summary.wins, summary.win_rate);
    println!("Losses:            {}", summary.losses);
    println!("Breakevens:        {}", summary.breakevens);
    println!();
    println!("Profit Factor:     {:.2}", summary.profit_factor);
    println!("Sharpe Ratio:      {:.2}", summary.sharpe_ratio);
    println!("Avg Win:           ${:.2}", summary.avg_win);
    println!("Avg Loss:          ${:.2}", summary.avg_loss);
    println!();
    println!("Total P&L:         ${:+.2}", summary.net_pnl);
    println!("Final Balance:     ${:.2}", summary.final_balance);
    println!(
        "Max Drawdown:      ${:.2} ({:.2}%)",
        summary.max_drawdown, summary.max_drawdown_pct
    );

    println!("\n═══════════════════════════════════════════════════════════\n");

    Ok(summary)
}
