//! Open position state and closed trade records.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signed, un-levered move of `price` relative to `reference`.
/// Positive is favourable for `side`.
pub fn favorable_move(side: Side, reference: f64, price: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    match side {
        Side::Long => (price - reference) / reference,
        Side::Short => (reference - price) / reference,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    Forced,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Timeout => "timeout",
            ExitReason::Forced => "forced",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    /// Quote-currency margin posted at entry.
    pub margin: f64,
    pub leverage: f64,
    pub has_added: bool,
    pub add_price: Option<f64>,
    pub add_margin: f64,
    pub average_entry_price: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub add_trigger_pct: f64,
    pub signal_entry_pct_chg: f64,
    /// Worst un-levered move seen against the reference price (<= 0).
    pub max_adverse_excursion: f64,
}

impl Position {
    pub fn total_margin(&self) -> f64 {
        self.margin + self.add_margin
    }

    pub fn notional(&self) -> f64 {
        self.total_margin() * self.leverage
    }

    /// Reference price for thresholds: entry before an add, average after.
    pub fn reference_price(&self) -> f64 {
        if self.has_added {
            self.average_entry_price
        } else {
            self.entry_price
        }
    }

    pub fn move_pct(&self, price: f64) -> f64 {
        favorable_move(self.side, self.reference_price(), price)
    }

    /// Levered P&L against the average entry, floored at the posted margin.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        let raw = favorable_move(self.side, self.average_entry_price, price)
            * self.leverage
            * self.total_margin();
        raw.max(-self.total_margin())
    }

    pub fn held_for(&self, now: NaiveDateTime) -> Duration {
        now - self.entry_time
    }
}

/// Immutable snapshot written when a position closes.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub instrument: String,
    pub side: Side,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub average_entry_price: f64,
    pub add_position_used: bool,
    pub exit_time: NaiveDateTime,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub margin: f64,
    pub realized_pnl: f64,
    /// Realized P&L as a fraction of posted margin.
    pub realized_pnl_pct: f64,
    pub leverage: f64,
    pub hold_duration: Duration,
    pub max_adverse_excursion: f64,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.realized_pnl < 0.0
    }
}
