//! Closed-trade bookkeeping and the session summary.

use serde::Serialize;

use super::signals::ExitSignal;

/// Running statistics over closed trades
#[derive(Debug, Clone, Default)]
pub struct TradeStats {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub peak_balance: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    // Welford accumulators over per-trade P&L
    pnl_mean: f64,
    pnl_m2: f64,
}

impl TradeStats {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            peak_balance: starting_balance,
            ..Default::default()
        }
    }

    /// Record a closed trade and the cash balance after it.
    pub fn record(&mut self, exit: &ExitSignal, balance: f64) {
        let pnl = exit.profit_loss;
        self.total_trades += 1;

        let delta = pnl - self.pnl_mean;
        self.pnl_mean += delta / self.total_trades as f64;
        self.pnl_m2 += delta * (pnl - self.pnl_mean);

        if pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += pnl;
        } else if pnl < 0.0 {
            self.losses += 1;
            self.gross_loss += pnl.abs();
        } else {
            self.breakevens += 1;
        }

        if balance > self.peak_balance {
            self.peak_balance = balance;
        }
        let drawdown = self.peak_balance - balance;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            if self.peak_balance > 0.0 {
                self.max_drawdown_pct = drawdown / self.peak_balance * 100.0;
            }
        }
    }

    pub fn summary(&self, final_balance: f64, signals_emitted: u32) -> TradingSummary {
        let total = self.total_trades;
        let win_rate = if total > 0 {
            self.wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let net_pnl = self.gross_profit - self.gross_loss;

        let profit_factor = if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if self.wins > 0 {
            self.gross_profit / self.wins as f64
        } else {
            0.0
        };
        let avg_loss = if self.losses > 0 {
            -(self.gross_loss / self.losses as f64)
        } else {
            0.0
        };

        // Per-trade Sharpe, annualized
        let sharpe_ratio = if total > 1 {
            let std_dev = (self.pnl_m2 / total as f64).sqrt();
            if std_dev > 0.0 {
                self.pnl_mean / std_dev * 252.0_f64.sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };

        TradingSummary {
            total_trades: total,
            wins: self.wins,
            losses: self.losses,
            breakevens: self.breakevens,
            win_rate,
            profit_factor,
            net_pnl,
            avg_win,
            avg_loss,
            max_drawdown: self.max_drawdown,
            max_drawdown_pct: self.max_drawdown_pct,
            final_balance,
            sharpe_ratio,
            signals_emitted,
        }
    }
}

/// Summary of trading results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub breakevens: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub net_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub final_balance: f64,
    pub sharpe_ratio: f64,
    pub signals_emitted: u32,
}
