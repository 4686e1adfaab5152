//! Configuration validation.
//!
//! Validates all config fields before a run, and provides the parsing
//! helpers the CLI uses to turn a validated config into domain values.

use crate::domain::error::KlinetraderError;
use crate::domain::kline::Timeframe;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::str::FromStr;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    validate_backtest_section(config)?;
    validate_entry_section(config)?;
    validate_delay_section(config)?;
    validate_risk_section(config)?;
    validate_sizing_section(config)?;
    validate_gate_section(config)?;
    validate_data_section(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> KlinetraderError {
    KlinetraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parse a required `YYYY-MM-DD` date.
pub fn parse_date(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<NaiveDate, KlinetraderError> {
    match config.get_string(section, key) {
        None => Err(KlinetraderError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))
        }),
    }
}

/// Parse an optional value through `FromStr`, falling back to `default`.
pub fn parse_enum<T>(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: T,
) -> Result<T, KlinetraderError>
where
    T: FromStr<Err = String>,
{
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => s.parse().map_err(|e: String| invalid(section, key, e)),
        _ => Ok(default),
    }
}

/// Parse an optional comma-separated list of numbers.
pub fn parse_list(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<Vec<f64>>, KlinetraderError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.split(',')
        .map(|token| {
            token
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid(section, key, format!("'{}' is not a number", token.trim())))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn validate_backtest_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    let capital = config.get_double("backtest", "initial_capital", 10_000.0);
    if !(capital > 0.0 && capital.is_finite()) {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }

    let start_date = parse_date(config, "backtest", "start_date")?;
    let end_date = parse_date(config, "backtest", "end_date")?;
    if start_date > end_date {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must not be after end_date",
        ));
    }

    let timeframe = parse_enum(config, "backtest", "timeframe", Timeframe::D1)?;
    if let Some(s) = config.get_string("backtest", "sub_timeframe") {
        if !s.trim().is_empty() {
            let sub: Timeframe = s
                .parse()
                .map_err(|e: String| invalid("backtest", "sub_timeframe", e))?;
            if sub.duration() >= timeframe.duration() {
                return Err(invalid(
                    "backtest",
                    "sub_timeframe",
                    "sub_timeframe must be finer than timeframe",
                ));
            }
            if timeframe.duration().num_seconds() % sub.duration().num_seconds() != 0 {
                return Err(invalid(
                    "backtest",
                    "sub_timeframe",
                    "sub_timeframe must divide timeframe evenly",
                ));
            }
        }
    }

    if !(0..=i32::MAX as i64).contains(&config.get_int("backtest", "max_hold_periods", 5)) {
        return Err(invalid(
            "backtest",
            "max_hold_periods",
            "max_hold_periods must be between 0 and 2147483647",
        ));
    }
    parse_enum(
        config,
        "backtest",
        "gap_policy",
        crate::domain::backtest::GapPolicy::default(),
    )?;
    Ok(())
}

fn validate_entry_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    parse_enum(
        config,
        "entry",
        "direction",
        crate::domain::scanner::Direction::ShortOnly,
    )?;

    let min = config.get_double("entry", "min_pct_chg", 0.1);
    if !(min >= 0.0 && min.is_finite()) {
        return Err(invalid("entry", "min_pct_chg", "min_pct_chg must be non-negative"));
    }

    let size = config.get_double("entry", "position_size", 0.1);
    if !(size > 0.0 && size <= 1.0) {
        return Err(invalid(
            "entry",
            "position_size",
            "position_size must be between 0 and 1",
        ));
    }

    let add = config.get_double("entry", "add_position_size", 1.0);
    if !(add > 0.0 && add.is_finite()) {
        return Err(invalid(
            "entry",
            "add_position_size",
            "add_position_size must be positive",
        ));
    }
    Ok(())
}

fn validate_delay_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    let enabled = config.get_bool("delay", "enabled", false);
    let periods = config.get_int("delay", "periods", 4);
    if enabled && periods < 1 {
        return Err(invalid("delay", "periods", "periods must be at least 1"));
    }
    parse_enum(
        config,
        "delay",
        "expiry",
        crate::domain::delayed_entry::ExpiryPolicy::Discard,
    )?;
    Ok(())
}

const RISK_KEYS: [&str; 5] = [
    "leverage",
    "take_profit",
    "stop_loss",
    "add_trigger",
    "entry_delay",
];

fn validate_risk_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    let bounds = parse_list(config, "risk", "tier_bounds")?;
    let mut lists = Vec::with_capacity(RISK_KEYS.len());
    for key in RISK_KEYS {
        lists.push((key, parse_list(config, "risk", key)?));
    }

    let any_set = bounds.is_some() || lists.iter().any(|(_, l)| l.is_some());
    if !any_set {
        return Ok(());
    }

    let tiers = bounds.as_ref().map_or(0, Vec::len) + 1;
    for (key, list) in &lists {
        match list {
            None => {
                return Err(KlinetraderError::ConfigMissing {
                    section: "risk".to_string(),
                    key: key.to_string(),
                });
            }
            Some(values) if values.len() != tiers => {
                return Err(invalid(
                    "risk",
                    key,
                    format!("expected {tiers} values, got {}", values.len()),
                ));
            }
            Some(_) => {}
        }
    }

    let values = |key: &str| {
        lists
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, l)| l.clone())
            .unwrap_or_default()
    };
    if values("leverage").iter().any(|v| !(*v > 0.0)) {
        return Err(invalid("risk", "leverage", "leverage must be positive"));
    }
    if values("take_profit").iter().any(|v| !(*v > 0.0)) {
        return Err(invalid("risk", "take_profit", "take_profit must be positive"));
    }
    if values("stop_loss").iter().any(|v| !(*v < 0.0)) {
        return Err(invalid("risk", "stop_loss", "stop_loss must be negative"));
    }
    if values("add_trigger").iter().any(|v| !(*v < 0.0)) {
        return Err(invalid("risk", "add_trigger", "add_trigger must be negative"));
    }
    if values("entry_delay").iter().any(|v| !(*v >= 0.0)) {
        return Err(invalid("risk", "entry_delay", "entry_delay must be non-negative"));
    }
    if let Some(b) = &bounds {
        if b.iter().any(|v| !(*v >= 0.0)) || b.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(
                "risk",
                "tier_bounds",
                "tier_bounds must be non-negative and strictly ascending",
            ));
        }
    }
    Ok(())
}

fn validate_sizing_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    match config.get_mode("sizing", "mode", "fixed").as_str() {
        "fixed" => Ok(()),
        "volume_tiered" => {
            let bands = parse_list(config, "sizing", "volume_bands")?;
            let multipliers = parse_list(config, "sizing", "volume_multipliers")?;
            match (bands, multipliers) {
                (None, None) => Ok(()),
                (Some(b), Some(m)) => crate::domain::sizing::VolumeTiers::new(b, m)
                    .map(|_| ())
                    .map_err(|e| invalid("sizing", "volume_bands", e)),
                (None, Some(_)) => Err(KlinetraderError::ConfigMissing {
                    section: "sizing".to_string(),
                    key: "volume_bands".to_string(),
                }),
                (Some(_), None) => Err(KlinetraderError::ConfigMissing {
                    section: "sizing".to_string(),
                    key: "volume_multipliers".to_string(),
                }),
            }
        }
        other => Err(invalid("sizing", "mode", format!("unknown sizing mode '{other}'"))),
    }
}

fn validate_gate_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    match config.get_mode("gate", "mode", "none").as_str() {
        "none" => Ok(()),
        "trailing_average" => {
            if config.get_int("gate", "lookback", 20) < 1 {
                return Err(invalid("gate", "lookback", "lookback must be at least 1"));
            }
            if !(config.get_double("gate", "max_extension", 0.5) > 0.0) {
                return Err(invalid("gate", "max_extension", "max_extension must be positive"));
            }
            Ok(())
        }
        "recorded_premium" => {
            if !(config.get_double("gate", "max_abs_premium", 0.01) > 0.0) {
                return Err(invalid(
                    "gate",
                    "max_abs_premium",
                    "max_abs_premium must be positive",
                ));
            }
            if config.has_key("gate", "premium_file") {
                Ok(())
            } else {
                Err(KlinetraderError::ConfigMissing {
                    section: "gate".to_string(),
                    key: "premium_file".to_string(),
                })
            }
        }
        other => Err(invalid("gate", "mode", format!("unknown gate mode '{other}'"))),
    }
}

fn validate_data_section(config: &dyn ConfigPort) -> Result<(), KlinetraderError> {
    match config.get_mode("data", "source", "csv").as_str() {
        "csv" | "sqlite" => {}
        other => {
            return Err(invalid(
                "data",
                "source",
                format!("unknown data source '{other}'"),
            ));
        }
    }
    if !config.has_key("data", "path") {
        return Err(KlinetraderError::ConfigMissing {
            section: "data".to_string(),
            key: "path".to_string(),
        });
    }
    if config.get_int("data", "min_bars", 1) < 1 {
        return Err(invalid("data", "min_bars", "min_bars must be at least 1"));
    }
    Ok(())
}
