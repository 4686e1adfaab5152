//! Summary statistics over a finished run's ledger and equity curve.

use std::collections::BTreeMap;

use super::backtest::BacktestResult;
use super::position::{ExitReason, TradeRecord};
use super::position_manager::EquityPoint;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    pub win_rate: f64,
    pub final_balance: f64,
    pub total_return: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_hold_hours: f64,
    pub adds_used: usize,
    pub exits_by_reason: BTreeMap<ExitReason, usize>,
}

impl Summary {
    pub fn compute(result: &BacktestResult) -> Self {
        let trades = &result.trades;
        let initial_capital = result.initial_capital;
        let final_balance = result.final_balance();

        let total_return = if initial_capital > 0.0 {
            (final_balance - initial_capital) / initial_capital
        } else {
            0.0
        };

        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_hold_minutes = 0i64;
        let mut adds_used = 0usize;
        let mut exits_by_reason = BTreeMap::new();

        for trade in trades {
            let pnl = trade.realized_pnl;
            if trade.is_win() {
                wins += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if trade.is_loss() {
                losses += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                breakeven += 1;
            }
            if trade.add_position_used {
                adds_used += 1;
            }
            *exits_by_reason.entry(trade.exit_reason).or_insert(0) += 1;
            total_hold_minutes += trade.hold_duration.num_minutes();
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if wins > 0 { total_wins / wins as f64 } else { 0.0 };
        let avg_loss = if losses > 0 {
            total_losses / losses as f64
        } else {
            0.0
        };

        let avg_hold_hours = if total_trades > 0 {
            total_hold_minutes as f64 / 60.0 / total_trades as f64
        } else {
            0.0
        };

        Summary {
            total_trades,
            wins,
            losses,
            breakeven,
            win_rate,
            final_balance,
            total_return,
            profit_factor,
            max_drawdown: compute_drawdown(&result.equity_curve),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_hold_hours,
            adds_used,
            exits_by_reason,
        }
    }

    pub fn exits(&self, reason: ExitReason) -> usize {
        self.exits_by_reason.get(&reason).copied().unwrap_or(0)
    }
}

/// Balance implied by the ledger alone.
pub fn replay_ledger(initial_capital: f64, trades: &[TradeRecord]) -> f64 {
    initial_capital + trades.iter().map(|t| t.realized_pnl).sum::<f64>()
}

/// Largest peak-to-trough fall of the curve as a fraction of the peak.
pub fn compute_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let Some(first) = equity_curve.first() else {
        return 0.0;
    };

    let mut peak = first.equity;
    let mut max_dd = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - point.equity) / peak);
        }
    }
    max_dd
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentResult {
    pub instrument: String,
    pub total_trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

impl InstrumentResult {
    /// Per-instrument breakdown, sorted by instrument id.
    pub fn compute_per_instrument(trades: &[TradeRecord]) -> Vec<InstrumentResult> {
        let mut by_instrument: BTreeMap<&str, (usize, usize, f64)> = BTreeMap::new();
        for trade in trades {
            let entry = by_instrument.entry(&trade.instrument).or_insert((0, 0, 0.0));
            entry.0 += 1;
            if trade.is_win() {
                entry.1 += 1;
            }
            entry.2 += trade.realized_pnl;
        }
        by_instrument
            .into_iter()
            .map(|(instrument, (total, wins, pnl))| InstrumentResult {
                instrument: instrument.to_string(),
                total_trades: total,
                wins,
                win_rate: wins as f64 / total as f64,
                total_pnl: pnl,
            })
            .collect()
    }
}
