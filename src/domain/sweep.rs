//! Parallel parameter sweep.
//!
//! Builds the cartesian product of the configured axes, runs every
//! combination as an independent [`Backtest`] over the same loaded
//! [`MarketData`] using rayon, and returns the results best first.

use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::backtest::{Backtest, BacktestConfig};
use super::error::KlinetraderError;
use super::metrics::Summary;
use super::series::MarketData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SweepParam {
    PositionSize,
    MinPctChg,
    AddPositionSize,
    MaxHoldPeriods,
    DelayPeriods,
}

impl SweepParam {
    pub const ALL: [SweepParam; 5] = [
        SweepParam::PositionSize,
        SweepParam::MinPctChg,
        SweepParam::AddPositionSize,
        SweepParam::MaxHoldPeriods,
        SweepParam::DelayPeriods,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepParam::PositionSize => "position_size",
            SweepParam::MinPctChg => "min_pct_chg",
            SweepParam::AddPositionSize => "add_position_size",
            SweepParam::MaxHoldPeriods => "max_hold_periods",
            SweepParam::DelayPeriods => "delay_periods",
        }
    }

    /// Integer parameters are truncated toward zero and clamped to their range.
    fn apply(&self, cfg: &mut BacktestConfig, value: f64) {
        match self {
            SweepParam::PositionSize => cfg.position_size = value,
            SweepParam::MinPctChg => cfg.min_pct_chg = value,
            SweepParam::AddPositionSize => cfg.add_position_size = value,
            SweepParam::MaxHoldPeriods => {
                cfg.max_hold_periods = value.clamp(0.0, i32::MAX as f64) as u32
            }
            SweepParam::DelayPeriods => {
                let periods = value.max(0.0) as usize;
                cfg.delay.periods = periods;
                cfg.delay.enabled = periods > 0;
            }
        }
    }
}

impl fmt::Display for SweepParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepParam {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "position_size" => Ok(SweepParam::PositionSize),
            "min_pct_chg" => Ok(SweepParam::MinPctChg),
            "add_position_size" => Ok(SweepParam::AddPositionSize),
            "max_hold_periods" => Ok(SweepParam::MaxHoldPeriods),
            "delay_periods" => Ok(SweepParam::DelayPeriods),
            other => Err(format!("unknown sweep parameter '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepAxis {
    pub param: SweepParam,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct SweepResult {
    pub config_id: String,
    pub overrides: Vec<(SweepParam, f64)>,
    pub summary: Summary,
}

fn generate_combinations(axes: &[SweepAxis]) -> Vec<Vec<(SweepParam, f64)>> {
    let Some((first, rest)) = axes.split_first() else {
        return vec![vec![]];
    };
    let sub = generate_combinations(rest);
    let mut result = Vec::with_capacity(first.values.len() * sub.len());
    for &value in &first.values {
        for combo in &sub {
            let mut next = Vec::with_capacity(combo.len() + 1);
            next.push((first.param, value));
            next.extend(combo.iter().copied());
            result.push(next);
        }
    }
    result
}

pub fn apply_overrides(base: &BacktestConfig, overrides: &[(SweepParam, f64)]) -> BacktestConfig {
    let mut cfg = base.clone();
    for (param, value) in overrides {
        param.apply(&mut cfg, *value);
    }
    cfg
}

/// Run every combination; the first failing run aborts the sweep.
///
/// Results are ordered by total return, highest first, then by config id
/// so equal returns keep a stable order.
pub fn run_sweep(
    base: &BacktestConfig,
    axes: &[SweepAxis],
    data: &MarketData,
) -> Result<Vec<SweepResult>, KlinetraderError> {
    let combos = generate_combinations(axes);
    info!(combinations = combos.len(), axes = axes.len(), "starting sweep");

    let mut results = combos
        .par_iter()
        .enumerate()
        .map(|(i, overrides)| {
            let cfg = apply_overrides(base, overrides);
            let result = Backtest::new(cfg).run(data)?;
            Ok(SweepResult {
                config_id: format!("sweep_{i:04}"),
                overrides: overrides.clone(),
                summary: Summary::compute(&result),
            })
        })
        .collect::<Result<Vec<_>, KlinetraderError>>()?;

    results.sort_by(|a, b| {
        b.summary
            .total_return
            .total_cmp(&a.summary.total_return)
            .then_with(|| a.config_id.cmp(&b.config_id))
    });
    Ok(results)
}
