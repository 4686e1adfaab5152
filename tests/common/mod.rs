#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use klinetrader::domain::backtest::BacktestConfig;
use klinetrader::domain::error::KlinetraderError;
pub use klinetrader::domain::kline::{Bar, Timeframe};
use klinetrader::domain::risk_params::{RiskParams, RiskTable};
use klinetrader::domain::series::MarketData;
use klinetrader::ports::data_port::PriceSeriesProvider;
use std::collections::HashMap;

pub struct MockProvider {
    pub data: HashMap<(String, Timeframe), Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, instrument: &str, timeframe: Timeframe, bars: Vec<Bar>) -> Self {
        self.data.insert((instrument.to_string(), timeframe), bars);
        self
    }

    pub fn with_error(mut self, instrument: &str, reason: &str) -> Self {
        self.errors.insert(instrument.to_string(), reason.to_string());
        self
    }
}

impl PriceSeriesProvider for MockProvider {
    fn get_bars(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, KlinetraderError> {
        if let Some(reason) = self.errors.get(instrument) {
            return Err(KlinetraderError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(&(instrument.to_string(), timeframe))
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp.date() >= start && b.timestamp.date() <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_instruments(&self, timeframe: Timeframe) -> Result<Vec<String>, KlinetraderError> {
        let mut ids: Vec<String> = self
            .data
            .keys()
            .filter(|(_, tf)| *tf == timeframe)
            .map(|(id, _)| id.clone())
            .chain(self.errors.keys().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn get_data_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, KlinetraderError> {
        if let Some(reason) = self.errors.get(instrument) {
            return Err(KlinetraderError::Database {
                reason: reason.clone(),
            });
        }
        match self.data.get(&(instrument.to_string(), timeframe)) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.timestamp).min().unwrap();
                let max = bars.iter().map(|b| b.timestamp).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Midnight of 2024-01-01 plus `n` days.
pub fn day(n: i64) -> NaiveDateTime {
    date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap() + Duration::days(n)
}

/// Bar whose high/low are the open/close envelope.
pub fn make_bar(instrument: &str, timestamp: NaiveDateTime, open: f64, close: f64) -> Bar {
    Bar {
        instrument: instrument.to_string(),
        timestamp,
        open,
        high: open.max(close),
        low: open.min(close),
        close,
        volume: 1_000.0,
    }
}

/// Daily bars from a list of closes; each bar opens at the previous close
/// (the first at its own close).
pub fn daily_path(instrument: &str, closes: &[f64]) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(0.0);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let bar = make_bar(instrument, day(i as i64), prev, close);
            prev = close;
            bar
        })
        .collect()
}

pub fn flat_risk(leverage: f64, take_profit: f64, stop_loss: f64, add_trigger: f64) -> RiskTable {
    RiskTable::flat(RiskParams {
        leverage,
        take_profit_pct: take_profit,
        stop_loss_pct: stop_loss,
        add_trigger_pct: add_trigger,
        entry_delay_pct: 0.02,
    })
}

pub fn sample_config() -> BacktestConfig {
    BacktestConfig {
        start_date: date(2024, 1, 1),
        end_date: date(2024, 12, 31),
        initial_capital: 10_000.0,
        position_size: 0.1,
        max_hold_periods: 0,
        risk: flat_risk(10.0, 0.10, -0.18, -0.18),
        ..BacktestConfig::default()
    }
}

pub fn market(series: &[(&str, Vec<Bar>)]) -> MarketData {
    let mut data = MarketData::new(Timeframe::D1, None);
    for (id, bars) in series {
        data.insert(id, bars.clone(), Vec::new()).unwrap();
    }
    data
}
