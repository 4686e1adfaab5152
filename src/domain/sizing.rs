//! Position sizing: the fraction of current cash posted as margin for a new
//! entry.

use super::kline::Bar;

/// Step function over the signal bar's quote volume.
///
/// `bands` are ascending lower bounds; a bar whose quote volume reaches
/// band `i` (inclusive) uses `multipliers[i + 1]`, anything below the first
/// band uses `multipliers[0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeTiers {
    bands: Vec<f64>,
    multipliers: Vec<f64>,
}

impl VolumeTiers {
    pub fn new(bands: Vec<f64>, multipliers: Vec<f64>) -> Result<Self, String> {
        if multipliers.len() != bands.len() + 1 {
            return Err(format!(
                "expected {} multipliers for {} volume bands, got {}",
                bands.len() + 1,
                bands.len(),
                multipliers.len()
            ));
        }
        if bands.iter().any(|b| !b.is_finite() || *b < 0.0) {
            return Err("volume bands must be finite and non-negative".to_string());
        }
        if bands.windows(2).any(|w| w[0] >= w[1]) {
            return Err("volume bands must be strictly ascending".to_string());
        }
        if multipliers.iter().any(|m| !m.is_finite() || *m <= 0.0) {
            return Err("volume multipliers must be positive".to_string());
        }
        Ok(Self { bands, multipliers })
    }

    pub fn multiplier(&self, quote_volume: f64) -> f64 {
        let idx = self.bands.iter().take_while(|&&b| quote_volume >= b).count();
        self.multipliers[idx]
    }
}

impl Default for VolumeTiers {
    fn default() -> Self {
        Self {
            bands: vec![1_000_000.0, 10_000_000.0, 100_000_000.0],
            multipliers: vec![0.5, 0.8, 1.0, 1.2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SizingPolicy {
    #[default]
    Fixed,
    VolumeTiered(VolumeTiers),
}

impl SizingPolicy {
    /// Size ratio for an entry signalled by `signal_bar`, capped at 1.0.
    pub fn size_ratio(&self, base_ratio: f64, signal_bar: &Bar) -> f64 {
        let ratio = match self {
            SizingPolicy::Fixed => base_ratio,
            SizingPolicy::VolumeTiered(tiers) => {
                base_ratio * tiers.multiplier(signal_bar.quote_volume())
            }
        };
        ratio.min(1.0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SizingPolicy::Fixed => "fixed",
            SizingPolicy::VolumeTiered(_) => "volume_tiered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bar_with_quote_volume(qv: f64) -> Bar {
        Bar {
            instrument: "DOGEUSDT".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: qv,
        }
    }

    #[test]
    fn fixed_uses_base_ratio() {
        let policy = SizingPolicy::Fixed;
        assert_relative_eq!(policy.size_ratio(0.1, &bar_with_quote_volume(5.0)), 0.1);
    }

    #[test]
    fn band_boundaries_are_inclusive() {
        let tiers = VolumeTiers::default();
        assert_relative_eq!(tiers.multiplier(0.0), 0.5);
        assert_relative_eq!(tiers.multiplier(999_999.99), 0.5);
        assert_relative_eq!(tiers.multiplier(1_000_000.0), 0.8);
        assert_relative_eq!(tiers.multiplier(9_999_999.0), 0.8);
        assert_relative_eq!(tiers.multiplier(10_000_000.0), 1.0);
        assert_relative_eq!(tiers.multiplier(100_000_000.0), 1.2);
        assert_relative_eq!(tiers.multiplier(f64::INFINITY), 1.2);
    }

    #[test]
    fn volume_tiered_scales_base_ratio() {
        let policy = SizingPolicy::VolumeTiered(VolumeTiers::default());
        assert_relative_eq!(
            policy.size_ratio(0.1, &bar_with_quote_volume(500.0)),
            0.05,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            policy.size_ratio(0.1, &bar_with_quote_volume(2e8)),
            0.12,
            epsilon = 1e-12
        );
    }

    #[test]
    fn ratio_is_capped_at_one() {
        let policy = SizingPolicy::VolumeTiered(VolumeTiers::default());
        assert_relative_eq!(policy.size_ratio(0.95, &bar_with_quote_volume(2e8)), 1.0);
    }

    #[test]
    fn rejects_malformed_tiers() {
        assert!(VolumeTiers::new(vec![1.0, 2.0], vec![1.0, 1.0]).is_err());
        assert!(VolumeTiers::new(vec![2.0, 1.0], vec![1.0, 1.0, 1.0]).is_err());
        assert!(VolumeTiers::new(vec![1.0], vec![1.0, 0.0]).is_err());
        assert!(VolumeTiers::new(vec![1.0], vec![0.5, 1.2]).is_ok());
    }
}
