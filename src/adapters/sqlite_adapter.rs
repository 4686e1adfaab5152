//! SQLite kline store.

use crate::domain::error::KlinetraderError;
use crate::domain::kline::{Bar, Timeframe};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PriceSeriesProvider;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> KlinetraderError {
    KlinetraderError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> KlinetraderError {
    KlinetraderError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn parse_ts(raw: &str) -> Result<NaiveDateTime, rusqlite::Error> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            raw.len(),
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

impl SqliteAdapter {
    /// Open the database named by `[data] path`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, KlinetraderError> {
        let db_path =
            config
                .get_string("data", "path")
                .ok_or_else(|| KlinetraderError::ConfigMissing {
                    section: "data".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("data", "pool_size", 4).max(1) as u32;
        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, KlinetraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), KlinetraderError> {
        let conn = self.pool.get().map_err(db_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS klines (
                instrument TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                ts TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                PRIMARY KEY (instrument, timeframe, ts)
            );
            CREATE INDEX IF NOT EXISTS idx_klines_timeframe ON klines(timeframe, instrument);",
        )
        .map_err(query_err)?;
        Ok(())
    }

    /// Insert or replace bars of one timeframe in a single transaction.
    pub fn insert_bars(&self, timeframe: Timeframe, bars: &[Bar]) -> Result<(), KlinetraderError> {
        let mut conn = self.pool.get().map_err(db_err)?;
        let tx = conn.transaction().map_err(query_err)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO klines
                     (instrument, timeframe, ts, open, high, low, close, volume)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(query_err)?;
            for bar in bars {
                stmt.execute(params![
                    bar.instrument,
                    timeframe.as_str(),
                    bar.timestamp.format(TS_FORMAT).to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])
                .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        Ok(())
    }
}

impl PriceSeriesProvider for SqliteAdapter {
    fn get_bars(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, KlinetraderError> {
        let conn = self.pool.get().map_err(db_err)?;
        let start_str = start.format("%Y-%m-%d 00:00:00").to_string();
        let end_str = end.format("%Y-%m-%d 23:59:59").to_string();

        let mut stmt = conn
            .prepare(
                "SELECT instrument, ts, open, high, low, close, volume
                 FROM klines
                 WHERE instrument = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4
                 ORDER BY ts ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![instrument, timeframe.as_str(), start_str, end_str],
                |row| {
                    let ts: String = row.get(1)?;
                    Ok(Bar {
                        instrument: row.get(0)?,
                        timestamp: parse_ts(&ts)?,
                        open: row.get(2)?,
                        high: row.get(3)?,
                        low: row.get(4)?,
                        close: row.get(5)?,
                        volume: row.get(6)?,
                    })
                },
            )
            .map_err(query_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(query_err)
    }

    fn list_instruments(&self, timeframe: Timeframe) -> Result<Vec<String>, KlinetraderError> {
        let conn = self.pool.get().map_err(db_err)?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT instrument FROM klines WHERE timeframe = ?1 ORDER BY instrument")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![timeframe.as_str()], |row| row.get(0))
            .map_err(query_err)?;
        rows.collect::<Result<Vec<String>, _>>().map_err(query_err)
    }

    fn get_data_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, KlinetraderError> {
        let conn = self.pool.get().map_err(db_err)?;
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                "SELECT MIN(ts), MAX(ts), COUNT(*) FROM klines WHERE instrument = ?1 AND timeframe = ?2",
                params![instrument, timeframe.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min_str), Some(max_str), count) if count > 0 => {
                let min = parse_ts(&min_str).map_err(query_err)?;
                let max = parse_ts(&max_str).map_err(query_err)?;
                Ok(Some((min, max, count as usize)))
            }
            _ => Ok(None),
        }
    }
}
