//! Price data access port.

use crate::domain::error::KlinetraderError;
use crate::domain::kline::{Bar, Timeframe};
use chrono::{NaiveDate, NaiveDateTime};

/// Source of historical K-lines for one or more timeframes.
///
/// `get_bars` returns bars whose date falls in `[start, end]`, ascending by
/// timestamp. An instrument with no bars yields an empty vector, not an
/// error.
pub trait PriceSeriesProvider: Send + Sync {
    fn get_bars(
        &self,
        instrument: &str,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, KlinetraderError>;

    fn list_instruments(&self, timeframe: Timeframe) -> Result<Vec<String>, KlinetraderError>;

    /// First timestamp, last timestamp and bar count, if any bars exist.
    fn get_data_range(
        &self,
        instrument: &str,
        timeframe: Timeframe,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, KlinetraderError>;
}
