//! Validated per-instrument bar series and the unified simulation timeline.
//!
//! Every series is checked once at load: timestamps strictly increasing,
//! prices finite, `high >= low`. Gaps larger than one timeframe step are
//! allowed but recorded, never interpolated.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use super::error::KlinetraderError;
use super::kline::{Bar, Timeframe};
use super::risk_gate::PremiumObservation;
use crate::ports::data_port::PriceSeriesProvider;

/// A hole in a loaded series: `missing` steps between `after` and `before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesGap {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub after: NaiveDateTime,
    pub before: NaiveDateTime,
    pub missing: i64,
}

/// Check ordering and sanity of one series, returning its gaps.
pub fn validate_series(
    instrument: &str,
    timeframe: Timeframe,
    bars: &[Bar],
) -> Result<Vec<SeriesGap>, KlinetraderError> {
    let invalid = |reason: String| KlinetraderError::InvalidSeries {
        instrument: instrument.to_string(),
        timeframe: timeframe.to_string(),
        reason,
    };

    for bar in bars {
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) || !bar.volume.is_finite() {
            return Err(invalid(format!("non-finite value at {}", bar.timestamp)));
        }
        if bar.high < bar.low {
            return Err(invalid(format!("high below low at {}", bar.timestamp)));
        }
    }

    let step = timeframe.duration();
    let mut gaps = Vec::new();
    for pair in bars.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.timestamp == prev.timestamp {
            return Err(invalid(format!("duplicate timestamp {}", next.timestamp)));
        }
        if next.timestamp < prev.timestamp {
            return Err(invalid(format!(
                "timestamp {} follows {}",
                next.timestamp, prev.timestamp
            )));
        }
        let diff = next.timestamp - prev.timestamp;
        if diff > step {
            gaps.push(SeriesGap {
                instrument: instrument.to_string(),
                timeframe,
                after: prev.timestamp,
                before: next.timestamp,
                missing: diff.num_seconds() / step.num_seconds() - 1,
            });
        }
    }
    Ok(gaps)
}

#[derive(Debug, Clone)]
pub struct InstrumentSeries {
    pub instrument: String,
    /// Bars of the signal timeframe.
    pub bars: Vec<Bar>,
    /// Bars of the tick timeframe; same as `bars` when no sub-timeframe is set.
    pub ticks: Vec<Bar>,
    index: HashMap<NaiveDateTime, usize>,
}

impl InstrumentSeries {
    fn new(instrument: String, bars: Vec<Bar>, ticks: Vec<Bar>) -> Self {
        let index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.timestamp, i))
            .collect();
        Self {
            instrument,
            bars,
            ticks,
            index,
        }
    }

    pub fn bar_at(&self, ts: NaiveDateTime) -> Option<&Bar> {
        self.index.get(&ts).map(|&i| &self.bars[i])
    }

    /// Signal-timeframe bars strictly before `ts`.
    pub fn history_before(&self, ts: NaiveDateTime) -> &[Bar] {
        let idx = self.bars.partition_point(|b| b.timestamp < ts);
        &self.bars[..idx]
    }

    /// Close of the latest tick bar that has closed by `ts`.
    pub fn last_close_at_or_before(&self, ts: NaiveDateTime, tick_span: Duration) -> Option<f64> {
        let idx = self.ticks.partition_point(|b| b.timestamp + tick_span <= ts);
        idx.checked_sub(1).map(|i| self.ticks[i].close)
    }
}

/// Tick bars of one period, keyed by tick timestamp then instrument.
pub type PeriodTicks<'a> = BTreeMap<NaiveDateTime, BTreeMap<&'a str, &'a Bar>>;

/// Everything a run reads, loaded up front.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub timeframe: Timeframe,
    pub sub_timeframe: Option<Timeframe>,
    series: BTreeMap<String, InstrumentSeries>,
    pub premiums: Vec<PremiumObservation>,
    pub gaps: Vec<SeriesGap>,
}

impl MarketData {
    pub fn new(timeframe: Timeframe, sub_timeframe: Option<Timeframe>) -> Self {
        Self {
            timeframe,
            sub_timeframe,
            series: BTreeMap::new(),
            premiums: Vec::new(),
            gaps: Vec::new(),
        }
    }

    /// Timeframe whose bars drive exit evaluation and delayed entries.
    pub fn tick_timeframe(&self) -> Timeframe {
        self.sub_timeframe.unwrap_or(self.timeframe)
    }

    /// Add one instrument. `sub_bars` is ignored when no sub-timeframe is set.
    pub fn insert(
        &mut self,
        instrument: &str,
        bars: Vec<Bar>,
        sub_bars: Vec<Bar>,
    ) -> Result<(), KlinetraderError> {
        if bars.is_empty() {
            return Err(KlinetraderError::NoData {
                instrument: instrument.to_string(),
                timeframe: self.timeframe.to_string(),
            });
        }
        let mut gaps = validate_series(instrument, self.timeframe, &bars)?;
        let ticks = match self.sub_timeframe {
            Some(sub) => {
                if sub_bars.is_empty() {
                    return Err(KlinetraderError::NoData {
                        instrument: instrument.to_string(),
                        timeframe: sub.to_string(),
                    });
                }
                gaps.extend(validate_series(instrument, sub, &sub_bars)?);
                sub_bars
            }
            None => bars.clone(),
        };

        for gap in &gaps {
            warn!(
                instrument,
                timeframe = %gap.timeframe,
                after = %gap.after,
                before = %gap.before,
                missing = gap.missing,
                "gap in series"
            );
        }
        self.gaps.extend(gaps);
        self.series.insert(
            instrument.to_string(),
            InstrumentSeries::new(instrument.to_string(), bars, ticks),
        );
        Ok(())
    }

    pub fn with_premiums(mut self, premiums: Vec<PremiumObservation>) -> Self {
        self.premiums = premiums;
        self
    }

    /// Pull and validate every instrument from `provider`.
    pub fn load(
        provider: &dyn PriceSeriesProvider,
        instruments: &[String],
        timeframe: Timeframe,
        sub_timeframe: Option<Timeframe>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Self, KlinetraderError> {
        let mut data = MarketData::new(timeframe, sub_timeframe);
        for instrument in instruments {
            let bars = provider.get_bars(instrument, timeframe, start, end)?;
            let sub_bars = match sub_timeframe {
                Some(sub) => provider.get_bars(instrument, sub, start, end)?,
                None => Vec::new(),
            };
            debug!(
                instrument = instrument.as_str(),
                bars = bars.len(),
                sub_bars = sub_bars.len(),
                "loaded series"
            );
            data.insert(instrument, bars, sub_bars)?;
        }
        Ok(data)
    }

    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn instrument_count(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, instrument: &str) -> Option<&InstrumentSeries> {
        self.series.get(instrument)
    }

    /// Sorted, de-duplicated signal-bar timestamps across all instruments
    /// whose date falls in `[start, end]`.
    pub fn timeline(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDateTime> {
        let unique: BTreeSet<NaiveDateTime> = self
            .series
            .values()
            .flat_map(|s| s.bars.iter().map(|b| b.timestamp))
            .filter(|ts| ts.date() >= start && ts.date() <= end)
            .collect();
        unique.into_iter().collect()
    }

    /// Bars of every instrument that has one at `period`.
    pub fn period_bars(&self, period: NaiveDateTime) -> BTreeMap<String, Bar> {
        self.series
            .iter()
            .filter_map(|(id, s)| s.bar_at(period).map(|b| (id.clone(), b.clone())))
            .collect()
    }

    /// Group tick bars by the timeline period they fall into.
    ///
    /// A tick belongs to the latest period starting at or before it, provided
    /// it starts before that period ends. Ticks outside every period are
    /// dropped.
    pub fn tick_schedule(
        &self,
        timeline: &[NaiveDateTime],
    ) -> BTreeMap<NaiveDateTime, PeriodTicks<'_>> {
        let span = self.timeframe.duration();
        let mut schedule: BTreeMap<NaiveDateTime, PeriodTicks<'_>> = BTreeMap::new();
        for (id, series) in &self.series {
            for tick in &series.ticks {
                let idx = timeline.partition_point(|p| *p <= tick.timestamp);
                let Some(period) = idx.checked_sub(1).map(|i| timeline[i]) else {
                    continue;
                };
                if tick.timestamp >= period + span {
                    continue;
                }
                schedule
                    .entry(period)
                    .or_default()
                    .entry(tick.timestamp)
                    .or_default()
                    .insert(id.as_str(), tick);
            }
        }
        schedule
    }

    /// Close of the instrument's latest tick bar whose close time is at or
    /// before `ts`. Bars still open at `ts` are not considered.
    pub fn last_close_at_or_before(&self, instrument: &str, ts: NaiveDateTime) -> Option<f64> {
        let tick_span = self.tick_timeframe().duration();
        self.series
            .get(instrument)
            .and_then(|s| s.last_close_at_or_before(ts, tick_span))
    }
}
