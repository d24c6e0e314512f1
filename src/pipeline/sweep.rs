//! Parameter Sweep Module
//!
//! Runs parallel parameter sweeps using Rayon. Candles are loaded once and
//! every combination gets its own independent trader.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use trend_signals::{Bar, NullObserver, StrategyConfig, TradingSummary};

use super::replay_trading::{run_strategy, Strategy};

/// Parameter configuration for sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepParams {
    pub take_profit_pct: f64,
    pub max_loss_pct: f64,
    pub lock_periods: u32,
}

impl SweepParams {
    fn apply(&self, base: &StrategyConfig) -> StrategyConfig {
        let mut config = base.clone();
        config.take_profit_pct = self.take_profit_pct;
        config.max_loss_pct = self.max_loss_pct;
        config.entry.lock_periods = self.lock_periods;
        config
    }
}

/// Results from a single backtest run
#[derive(Debug, Clone)]
pub struct SweepResult {
    pub params: SweepParams,
    pub summary: TradingSummary,
}

/// One CSV output row
#[derive(Debug, Serialize)]
struct SweepRow {
    rank: usize,
    take_profit_pct: f64,
    max_loss_pct: f64,
    lock_periods: u32,
    total_trades: u32,
    wins: u32,
    losses: u32,
    win_rate: f64,
    profit_factor: f64,
    sharpe_ratio: f64,
    net_pnl: f64,
    max_drawdown: f64,
    final_balance: f64,
}

/// Generate all parameter combinations
pub fn generate_combinations(
    take_profit_values: &[f64],
    max_loss_values: &[f64],
    lock_period_values: &[u32],
) -> Vec<SweepParams> {
    let mut combinations = Vec::new();

    for &take_profit_pct in take_profit_values {
        for &max_loss_pct in max_loss_values {
            for &lock_periods in lock_period_values {
                combinations.push(SweepParams {
                    take_profit_pct,
                    max_loss_pct,
                    lock_periods,
                });
            }
        }
    }

    combinations
}

/// Sort by net P&L, best first
pub fn rank_results(results: &mut [SweepResult]) {
    results.sort_by(|a, b| b.summary.net_pnl.total_cmp(&a.summary.net_pnl));
}

/// Run parameter sweep in parallel
pub fn run_sweep(
    bars: &[Bar],
    base_config: &StrategyConfig,
    strategy: Strategy,
    warmup_bars: usize,
    combinations: Vec<SweepParams>,
    output_file: &Path,
) -> Result<Vec<SweepResult>> {
    if bars.is_empty() {
        anyhow::bail!("No candles to sweep over");
    }

    // Reject bad combinations before spending time on the others
    for params in &combinations {
        params
            .apply(base_config)
            .validate()
            .with_context(|| format!("Invalid combination {:?}", params))?;
    }

    let total = combinations.len();
    println!("\nRunning {} parameter combinations in parallel...", total);

    let completed = AtomicUsize::new(0);
    let start = std::time::Instant::now();

    let results: Result<Vec<SweepResult>> = combinations
        .par_iter()
        .map(|params| {
            let config = params.apply(base_config);
            let result = run_strategy(strategy, config, bars, warmup_bars, NullObserver)?;

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if done % 10 == 0 || done == total {
                let elapsed = start.elapsed().as_secs_f64();
                let rate = done as f64 / elapsed;
                let eta = (total - done) as f64 / rate;
                eprint!("\r[{}/{}] {:.1}/s, ETA: {:.0}s       ", done, total, rate, eta);
            }

            Ok(SweepResult {
                params: params.clone(),
                summary: result.summary,
            })
        })
        .collect();
    let mut results = results?;

    eprintln!();

    rank_results(&mut results);

    let mut writer = csv::Writer::from_path(output_file)
        .with_context(|| format!("Failed to create {:?}", output_file))?;
    for (i, result) in results.iter().enumerate() {
        let p = &result.params;
        let s = &result.summary;
        writer.serialize(SweepRow {
            rank: i + 1,
            take_profit_pct: p.take_profit_pct,
            max_loss_pct: p.max_loss_pct,
            lock_periods: p.lock_periods,
            total_trades: s.total_trades,
            wins: s.wins,
            losses: s.losses,
            win_rate: s.win_rate,
            profit_factor: s.profit_factor,
            sharpe_ratio: s.sharpe_ratio,
            net_pnl: s.net_pnl,
            max_drawdown: s.max_drawdown,
            final_balance: s.final_balance,
        })?;
    }
    writer.flush()?;

    println!("\nResults written to {:?}", output_file);

    println!("\n=== SWEEP SUMMARY ===");
    println!("Total combinations: {}", total);
    println!(
        "Profitable: {}",
        results.iter().filter(|r| r.summary.net_pnl > 0.0).count()
    );

    println!("\nTop 10 by Net P&L:");
    for (i, r) in results.iter().take(10).enumerate() {
        let p = &r.params;
        let s = &r.summary;
        println!(
            "  {}. P&L={:+.2} PF={:.2} Sharpe={:.2} Trades={} WR={:.1}%",
            i + 1,
            s.net_pnl,
            s.profit_factor,
            s.sharpe_ratio,
            s.total_trades,
            s.win_rate
        );
        println!(
            "     tp={}% ml={}% lock={}",
            p.take_profit_pct, p.max_loss_pct, p.lock_periods
        );
    }

    let elapsed = start.elapsed();
    println!(
        "\nCompleted in {:.1}s ({:.1} tests/second)",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );

    Ok(results)
}
