//! Per-tick exit decisions for open positions.
//!
//! A position is `Open` until its single add is consumed and `Added`
//! afterwards. Thresholds are measured against the entry price while
//! `Open` and against the average entry price once `Added`.
//!
//! Precedence on a tick: take-profit, then stop-loss (`Added` only), then
//! timeout, then the add trigger (`Open` only). A second adverse breach
//! after an add is always a stop-loss, never another add.

use chrono::{Duration, NaiveDateTime};

use super::position::{ExitReason, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Open,
    Added,
}

impl PositionState {
    pub fn of(position: &Position) -> Self {
        if position.has_added {
            PositionState::Added
        } else {
            PositionState::Open
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    Add,
    Close(ExitReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvaluator {
    /// Maximum holding time; `None` disables the timeout.
    pub max_hold: Option<Duration>,
}

impl ExitEvaluator {
    pub fn new(max_hold: Option<Duration>) -> Self {
        Self { max_hold }
    }

    pub fn evaluate(&self, position: &Position, price: f64, now: NaiveDateTime) -> ExitDecision {
        let state = PositionState::of(position);
        let mv = position.move_pct(price);

        if position.take_profit_pct > 0.0 && mv >= position.take_profit_pct {
            return ExitDecision::Close(ExitReason::TakeProfit);
        }

        if state == PositionState::Added
            && position.stop_loss_pct < 0.0
            && mv <= position.stop_loss_pct
        {
            return ExitDecision::Close(ExitReason::StopLoss);
        }

        if self.timed_out(position, now) {
            return ExitDecision::Close(ExitReason::Timeout);
        }

        if state == PositionState::Open
            && position.add_trigger_pct < 0.0
            && mv <= position.add_trigger_pct
        {
            return ExitDecision::Add;
        }

        ExitDecision::Hold
    }

    fn timed_out(&self, position: &Position, now: NaiveDateTime) -> bool {
        self.max_hold
            .is_some_and(|limit| position.held_for(now) >= limit)
    }
}
