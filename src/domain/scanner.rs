//! Entry candidate scanning over one period's bars.
//!
//! The scanner fades the period's largest mover: gainers are shorted and
//! losers are bought, restricted by the configured [`Direction`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::kline::Bar;
use super::position::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ShortOnly,
    LongOnly,
    SignalDriven,
}

impl Direction {
    /// Side to trade for a move of `pct_chg`, or `None` if this mode
    /// ignores moves in that direction.
    pub fn side_for(&self, pct_chg: f64) -> Option<Side> {
        match self {
            Direction::ShortOnly if pct_chg > 0.0 => Some(Side::Short),
            Direction::LongOnly if pct_chg < 0.0 => Some(Side::Long),
            Direction::SignalDriven if pct_chg > 0.0 => Some(Side::Short),
            Direction::SignalDriven if pct_chg < 0.0 => Some(Side::Long),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::ShortOnly => "short_only",
            Direction::LongOnly => "long_only",
            Direction::SignalDriven => "signal_driven",
        })
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "short_only" | "short" => Ok(Direction::ShortOnly),
            "long_only" | "long" => Ok(Direction::LongOnly),
            "signal_driven" | "signal" | "both" => Ok(Direction::SignalDriven),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub instrument: String,
    pub side: Side,
    pub pct_chg: f64,
    /// The period bar that produced the signal.
    pub bar: Bar,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryScanner {
    pub direction: Direction,
}

impl EntryScanner {
    pub fn new(direction: Direction) -> Self {
        Self { direction }
    }

    /// Pick at most one candidate from `period_bars`.
    ///
    /// Instruments in `open_instruments` and moves with
    /// `|pct_chg| < min_pct_chg` are skipped. The largest absolute move
    /// wins; exact ties go to the lexicographically lowest instrument.
    pub fn scan(
        &self,
        period_bars: &BTreeMap<String, Bar>,
        open_instruments: &BTreeSet<String>,
        min_pct_chg: f64,
    ) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;

        // BTreeMap iterates in instrument order, so a strict `>` keeps the
        // lowest id on ties.
        for (instrument, bar) in period_bars {
            if open_instruments.contains(instrument) {
                continue;
            }
            let pct_chg = bar.pct_change();
            if !pct_chg.is_finite() || pct_chg.abs() < min_pct_chg {
                continue;
            }
            let Some(side) = self.direction.side_for(pct_chg) else {
                continue;
            };
            let better = match &best {
                None => true,
                Some(current) => pct_chg.abs() > current.pct_chg.abs(),
            };
            if better {
                best = Some(Candidate {
                    instrument: instrument.clone(),
                    side,
                    pct_chg,
                    bar: bar.clone(),
                });
            }
        }

        best
    }
}
