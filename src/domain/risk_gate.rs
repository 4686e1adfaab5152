//! Optional veto on new entries from signals that price bars alone don't
//! capture.
//!
//! Gates run inside the simulation loop and therefore only ever read data
//! that was loaded before the run started.

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

use super::kline::Bar;
use super::scanner::Candidate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Approve,
    Veto(String),
}

impl GateVerdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateVerdict::Approve)
    }
}

/// What a gate may look at besides the candidate itself.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub time: NaiveDateTime,
    /// Period bars of the candidate's instrument strictly before the signal bar.
    pub history: &'a [Bar],
}

pub trait RiskGate: Send + Sync {
    fn name(&self) -> &str;

    fn approve(&self, instrument: &str, candidate: &Candidate, ctx: &GateContext<'_>)
    -> GateVerdict;
}

/// Vetoes entries whose signal close sits too far from the trailing average
/// close, i.e. moves that are already extended.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailingAverageGate {
    pub lookback: usize,
    pub max_extension: f64,
}

impl RiskGate for TrailingAverageGate {
    fn name(&self) -> &str {
        "trailing_average"
    }

    fn approve(
        &self,
        instrument: &str,
        candidate: &Candidate,
        ctx: &GateContext<'_>,
    ) -> GateVerdict {
        if self.lookback == 0 || ctx.history.len() < self.lookback {
            return GateVerdict::Approve;
        }
        let window = &ctx.history[ctx.history.len() - self.lookback..];
        let average = window.iter().map(|b| b.close).sum::<f64>() / self.lookback as f64;
        if average <= 0.0 {
            return GateVerdict::Approve;
        }
        let extension = (candidate.bar.close / average - 1.0).abs();
        if extension > self.max_extension {
            GateVerdict::Veto(format!(
                "{instrument} close {:.6} is {:.1}% from its {}-period average",
                candidate.bar.close,
                extension * 100.0,
                self.lookback
            ))
        } else {
            GateVerdict::Approve
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PremiumObservation {
    pub instrument: String,
    pub time: NaiveDateTime,
    pub premium: f64,
}

/// Replays a recorded premium index. The latest observation at or before
/// the candidate time is used; instruments without one are approved.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPremiumGate {
    observations: BTreeMap<String, Vec<(NaiveDateTime, f64)>>,
    pub max_abs_premium: f64,
}

impl RecordedPremiumGate {
    pub fn new(observations: Vec<PremiumObservation>, max_abs_premium: f64) -> Self {
        let mut by_instrument: BTreeMap<String, Vec<(NaiveDateTime, f64)>> = BTreeMap::new();
        for obs in observations {
            by_instrument
                .entry(obs.instrument)
                .or_default()
                .push((obs.time, obs.premium));
        }
        for series in by_instrument.values_mut() {
            series.sort_by_key(|(t, _)| *t);
        }
        Self {
            observations: by_instrument,
            max_abs_premium,
        }
    }

    pub fn premium_at(&self, instrument: &str, time: NaiveDateTime) -> Option<f64> {
        let series = self.observations.get(instrument)?;
        let idx = series.partition_point(|(t, _)| *t <= time);
        idx.checked_sub(1).map(|i| series[i].1)
    }
}

impl RiskGate for RecordedPremiumGate {
    fn name(&self) -> &str {
        "recorded_premium"
    }

    fn approve(
        &self,
        instrument: &str,
        _candidate: &Candidate,
        ctx: &GateContext<'_>,
    ) -> GateVerdict {
        match self.premium_at(instrument, ctx.time) {
            Some(p) if p.abs() > self.max_abs_premium => GateVerdict::Veto(format!(
                "{instrument} premium {p:.6} exceeds {:.6}",
                self.max_abs_premium
            )),
            _ => GateVerdict::Approve,
        }
    }
}
