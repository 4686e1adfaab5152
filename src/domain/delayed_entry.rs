//! Delayed entry: a scanned candidate waits for momentum to fade on the
//! sub-period timeframe before it becomes a position.
//!
//! For a short (fading a gainer) momentum has weakened when the newest
//! sub-bar fails to print a higher high than the previous monitored
//! sub-bar, or when the close has pulled back from the local high by at
//! least `entry_delay_pct`. Longs mirror this on lows. The local extreme
//! starts at the signal bar's close.
//!
//! The higher-high test compares monitored sub-bars with each other, so the
//! first monitored bar can only confirm on the pull-back test.
//!
//! The window counts monitored sub-bars from 1. The predicate is checked on
//! every bar up to and including bar `periods`; only if it is still false
//! after bar `periods` does the [`ExpiryPolicy`] apply.

use std::fmt;
use std::str::FromStr;

use super::kline::Bar;
use super::position::Side;
use super::risk_params::RiskParams;
use super::scanner::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Enter at the close of the last bar in the window.
    Enter,
    /// Drop the signal.
    Discard,
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExpiryPolicy::Enter => "enter",
            ExpiryPolicy::Discard => "discard",
        })
    }
}

impl FromStr for ExpiryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enter" => Ok(ExpiryPolicy::Enter),
            "discard" => Ok(ExpiryPolicy::Discard),
            other => Err(format!("unknown expiry policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    pub enabled: bool,
    pub periods: usize,
    pub expiry: ExpiryPolicy,
}

impl Default for DelayConfig {
    fn default() -> Self {
        DelayConfig {
            enabled: false,
            periods: 4,
            expiry: ExpiryPolicy::Discard,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingOutcome {
    Waiting,
    /// Enter at `price`; `expired` when the window ran out first.
    Enter {
        price: f64,
        expired: bool,
    },
    Discard,
}

/// Pure momentum-weakening check for one sub-bar.
pub fn momentum_weakened(
    side: Side,
    bar: &Bar,
    previous: Option<&Bar>,
    local_extreme: f64,
    pullback_pct: f64,
) -> bool {
    let stalled = match (side, previous) {
        (Side::Short, Some(prev)) => bar.high <= prev.high,
        (Side::Long, Some(prev)) => bar.low >= prev.low,
        (_, None) => false,
    };
    if stalled {
        return true;
    }
    if pullback_pct <= 0.0 || local_extreme <= 0.0 {
        return false;
    }
    match side {
        Side::Short => (local_extreme - bar.close) / local_extreme >= pullback_pct,
        Side::Long => (bar.close - local_extreme) / local_extreme >= pullback_pct,
    }
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub candidate: Candidate,
    pub risk: RiskParams,
    window: usize,
    observed: usize,
    local_extreme: f64,
    previous: Option<Bar>,
}

impl PendingEntry {
    pub fn new(candidate: Candidate, risk: RiskParams, window: usize) -> Self {
        let local_extreme = candidate.bar.close;
        Self {
            candidate,
            risk,
            window,
            observed: 0,
            local_extreme,
            previous: None,
        }
    }

    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Feed the next sub-bar of the candidate's instrument.
    pub fn observe(&mut self, bar: &Bar, expiry: ExpiryPolicy) -> PendingOutcome {
        self.observed += 1;
        let side = self.candidate.side;
        self.local_extreme = match side {
            Side::Short => self.local_extreme.max(bar.high),
            Side::Long => self.local_extreme.min(bar.low),
        };

        let weakened = momentum_weakened(
            side,
            bar,
            self.previous.as_ref(),
            self.local_extreme,
            self.risk.entry_delay_pct,
        );
        self.previous = Some(bar.clone());

        if weakened {
            return PendingOutcome::Enter {
                price: bar.close,
                expired: false,
            };
        }
        if self.observed >= self.window {
            return match expiry {
                ExpiryPolicy::Enter => PendingOutcome::Enter {
                    price: bar.close,
                    expired: true,
                },
                ExpiryPolicy::Discard => PendingOutcome::Discard,
            };
        }
        PendingOutcome::Waiting
    }
}
