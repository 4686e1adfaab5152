//! CSV file data adapter.
//!
//! One file per instrument and timeframe, `{instrument}_{timeframe}.csv`,
//! with a header row and columns `timestamp,open,high,low,close,volume`.
//! Timestamps may be `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`, a bare
//! `YYYY-MM-DD` (midnight) or integer epoch milliseconds.

use crate::domain::error::KlinetraderError;
use crate::domain::kline::{Bar, Timeframe};
use crate::domain::risk_gate::PremiumObservation;
use crate::ports::data_port::PriceSeriesProvider;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, instrument: &str, timeframe: Timeframe) -> PathBuf {
        self.base_path
            .join(format!("{}_{}.csv", instrument, timeframe.as_str()))
    }

    fn read_all(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, KlinetraderError> {
        let path = self.csv_path(instrument, timeframe);
        let content = fs::read_to_string(&path).map_err(|e| KlinetraderError::Database {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| KlinetraderError::Database {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let raw_ts = field(&record, 0, "timestamp")?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| KlinetraderError::Database {
                reason: format!("invalid timestamp '{}' in {}", raw_ts, path.display()),
            })?;
            bars.push(Bar {
                instrument: instrument.to_string(),
                timestamp,
                open: number(&record, 1, "open")?,
                high: number(&record, 2, "high")?,
                low: number(&record, 3, "low")?,
                close: number(&record, 4, "close")?,
                volume: number(&record, 5, "volume")?,
            });
        }
        // file order kept; series validation rejects out-of-order rows
        Ok(bars)
    }
}

fn field<'r>(
    record: &'r csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<&'r str, KlinetraderError> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| KlinetraderError::Database {
            reason: format!("missing {name} column"),
        })
}

fn number(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64, KlinetraderError> {
    field(record, idx, name)?
        .parse()
        .map_err(|e| KlinetraderError::Database {
            reason: format!("invalid {name} value: {e}"),
        })
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Read a recorded premium index, columns `instrument,timestamp,premium`.
pub fn load_premiums(path: &Path) -> Result<Vec<PremiumObservation>, KlinetraderError> {
    let content = fs::read_to_string(path).map_err(|e| KlinetraderError::Database {
        reason: format!("failed to read {}: {}", path.display(), e),
    })?;
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    let mut observations = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| KlinetraderError::Database {
            reason: format!("CSV parse error in {}: {}", path.display(), e),
        })?;
        let raw_ts = field(&record, 1, "timestamp")?;
        let time = parse_timestamp(raw_ts).ok_or_else(|| KlinetraderError::Database {
            reason: format!("invalid timestamp '{}' in {}", raw_ts, path.display()),
        })?;
        observations.push(PremiumObservation {
            instrument: field(&record, 0, "instrument")?.to_uppercase(),
            time,
            premium: number(&record, 2, "premium")?,
        });
    }
    Ok(observations)
}

impl PriceSeriesProvider for CsvAdapter {
    fn get_bars(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, KlinetraderError> {
        let mut bars = self.read_all(instrument, timeframe)?;
        bars.retain(|b| b.timestamp.date() >= start && b.timestamp.date() <= end);
        Ok(bars)
    }

    fn list_instruments(&self, timeframe: Timeframe) -> Result<Vec<String>, KlinetraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| KlinetraderError::Database {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let suffix = format!("_{}.csv", timeframe.as_str());
        let mut instruments = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KlinetraderError::Database {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(id) = name_str.strip_suffix(&suffix) {
                instruments.push(id.to_string());
            }
        }

        instruments.sort();
        Ok(instruments)
    }

    fn get_data_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, KlinetraderError> {
        if !self.csv_path(instrument, timeframe).exists() {
            return Ok(None);
        }
        let bars = self.read_all(instrument, timeframe)?;
        let first = bars.iter().map(|b| b.timestamp).min();
        let last = bars.iter().map(|b| b.timestamp).max();
        Ok(first.zip(last).map(|(f, l)| (f, l, bars.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "timestamp,open,high,low,close,volume\n\
            2024-01-15 00:00:00,100.0,110.0,90.0,105.0,50000.5\n\
            2024-01-15 04:00:00,105.0,115.0,100.0,110.0,60000\n\
            2024-01-16 00:00:00,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("BTCUSDT_4h.csv"), csv_content).unwrap();
        fs::write(
            path.join("ETHUSDT_4h.csv"),
            "timestamp,open,high,low,close,volume\n",
        )
        .unwrap();
        fs::write(
            path.join("SOLUSDT_1d.csv"),
            "timestamp,open,high,low,close,volume\n1705276800000,1,2,0.5,1.5,10\n",
        )
        .unwrap();

        (dir, path)
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn get_bars_returns_correct_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter
            .get_bars("BTCUSDT", Timeframe::H4, date(15), date(16))
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[1].timestamp, date(15).and_hms_opt(4, 0, 0).unwrap());
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.5);
        assert_eq!(bars[0].instrument, "BTCUSDT");
    }

    #[test]
    fn get_bars_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter
            .get_bars("BTCUSDT", Timeframe::H4, date(16), date(16))
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 115.0);
    }

    #[test]
    fn get_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let result = adapter.get_bars("XYZUSDT", Timeframe::H4, date(1), date(31));
        assert!(matches!(result, Err(KlinetraderError::Database { .. })));
    }

    #[test]
    fn epoch_millisecond_timestamps_are_read() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter
            .get_bars("SOLUSDT", Timeframe::D1, date(1), date(31))
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, date(15).and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn list_instruments_by_timeframe() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert_eq!(
            adapter.list_instruments(Timeframe::H4).unwrap(),
            vec!["BTCUSDT", "ETHUSDT"]
        );
        assert_eq!(adapter.list_instruments(Timeframe::D1).unwrap(), vec!["SOLUSDT"]);
        assert!(adapter.list_instruments(Timeframe::M1).unwrap().is_empty());
    }

    #[test]
    fn data_range_reports_span_and_count() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let (first, last, count) = adapter
            .get_data_range("BTCUSDT", Timeframe::H4)
            .unwrap()
            .unwrap();
        assert_eq!(first, date(15).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(last, date(16).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(count, 3);
        assert_eq!(adapter.get_data_range("ETHUSDT", Timeframe::H4).unwrap(), None);
        assert_eq!(adapter.get_data_range("XYZUSDT", Timeframe::H4).unwrap(), None);
    }

    #[test]
    fn parse_timestamp_formats() {
        let midnight = date(15).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15"), Some(midnight));
        assert_eq!(parse_timestamp("2024-01-15T00:00:00"), Some(midnight));
        assert_eq!(parse_timestamp("1705276800000"), Some(midnight));
        assert_eq!(parse_timestamp("15/01/2024"), None);
    }

    #[test]
    fn load_premiums_reads_observations() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("premium.csv");
        fs::write(
            &file,
            "instrument,timestamp,premium\nbtcusdt,2024-01-15 08:00:00,0.0004\nETHUSDT,2024-01-15,-0.02\n",
        )
        .unwrap();
        let obs = load_premiums(&file).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].instrument, "BTCUSDT");
        assert_eq!(obs[1].premium, -0.02);
    }
}
