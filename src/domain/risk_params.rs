//! Tiered risk-parameter selection keyed on the entry-day move.
//!
//! A [`RiskTable`] holds N ascending tier lower bounds and N+1 parameter
//! sets. The move magnitude `|entry_pct_chg|` picks the last tier whose
//! lower bound it reaches; anything below the first bound (including NaN)
//! lands in tier 0.

/// Per-position thresholds. Percentages are un-levered fractions of the
/// reference price: `take_profit_pct` is positive, `stop_loss_pct` and
/// `add_trigger_pct` are negative (adverse).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskParams {
    pub leverage: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub add_trigger_pct: f64,
    /// Pull-back fraction that confirms a delayed entry.
    pub entry_delay_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskTable {
    bounds: Vec<f64>,
    tiers: Vec<RiskParams>,
}

impl RiskTable {
    /// Builds a table; `tiers.len()` must be `bounds.len() + 1` and bounds
    /// must be finite and strictly ascending.
    pub fn new(bounds: Vec<f64>, tiers: Vec<RiskParams>) -> Result<Self, String> {
        if tiers.len() != bounds.len() + 1 {
            return Err(format!(
                "expected {} tier parameter sets for {} bounds, got {}",
                bounds.len() + 1,
                bounds.len(),
                tiers.len()
            ));
        }
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err("tier bounds must be finite".to_string());
        }
        if bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err("tier bounds must be strictly ascending".to_string());
        }
        Ok(Self { bounds, tiers })
    }

    /// Single-tier table that applies `params` to every move.
    pub fn flat(params: RiskParams) -> Self {
        Self {
            bounds: Vec::new(),
            tiers: vec![params],
        }
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn tier_index(&self, entry_pct_chg: f64) -> usize {
        let magnitude = entry_pct_chg.abs();
        self.bounds.iter().take_while(|&&b| magnitude >= b).count()
    }

    pub fn select(&self, entry_pct_chg: f64) -> RiskParams {
        self.tiers[self.tier_index(entry_pct_chg)]
    }
}

impl Default for RiskTable {
    /// Three tiers: moves under 20%, 20–40%, and 40% and above.
    fn default() -> Self {
        Self {
            bounds: vec![0.20, 0.40],
            tiers: vec![
                RiskParams {
                    leverage: 10.0,
                    take_profit_pct: 0.10,
                    stop_loss_pct: -0.10,
                    add_trigger_pct: -0.08,
                    entry_delay_pct: 0.02,
                },
                RiskParams {
                    leverage: 5.0,
                    take_profit_pct: 0.15,
                    stop_loss_pct: -0.15,
                    add_trigger_pct: -0.12,
                    entry_delay_pct: 0.03,
                },
                RiskParams {
                    leverage: 3.0,
                    take_profit_pct: 0.20,
                    stop_loss_pct: -0.20,
                    add_trigger_pct: -0.18,
                    entry_delay_pct: 0.05,
                },
            ],
        }
    }
}
