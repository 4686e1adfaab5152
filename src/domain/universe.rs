//! Instrument universe: parsing instrument lists from configuration and
//! loading the ones that have usable data.

use crate::domain::error::KlinetraderError;
use crate::domain::kline::Timeframe;
use crate::domain::series::MarketData;
use crate::ports::data_port::PriceSeriesProvider;
use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct Universe {
    pub instruments: Vec<String>,
    pub timeframe: Timeframe,
}

impl Universe {
    pub fn count(&self) -> usize {
        self.instruments.len()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UniverseError {
    #[error("empty token in instrument list")]
    EmptyToken,

    #[error("duplicate instrument: {0}")]
    DuplicateInstrument(String),
}

pub fn parse_instruments(input: &str) -> Result<Vec<String>, UniverseError> {
    let mut instruments = Vec::new();
    let mut seen = HashSet::new();

    for token in input.split(',') {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(UniverseError::EmptyToken);
        }
        let id = trimmed.to_uppercase();
        if !seen.insert(id.clone()) {
            return Err(UniverseError::DuplicateInstrument(id));
        }
        instruments.push(id);
    }

    Ok(instruments)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedInstrument {
    pub instrument: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoData,
    ProviderError(String),
    InsufficientBars { bars: usize },
}

#[derive(Debug)]
pub struct LoadedUniverse {
    pub universe: Universe,
    pub data: MarketData,
    pub skipped: Vec<SkippedInstrument>,
}

/// Fetch every instrument and keep those with at least `min_bars` signal
/// bars (and sub-timeframe bars, when set).
///
/// Instruments that fail to fetch or have too few bars are skipped and
/// reported; a series that fails validation is fatal. Fails with `NoData`
/// when nothing survives.
pub fn load_universe(
    provider: &dyn PriceSeriesProvider,
    instruments: Vec<String>,
    timeframe: Timeframe,
    sub_timeframe: Option<Timeframe>,
    start: NaiveDate,
    end: NaiveDate,
    min_bars: usize,
) -> Result<LoadedUniverse, KlinetraderError> {
    let mut data = MarketData::new(timeframe, sub_timeframe);
    let mut kept = Vec::new();
    let mut skipped = Vec::new();
    let total = instruments.len();

    for instrument in instruments {
        let fetched = provider.get_bars(&instrument, timeframe, start, end).and_then(|bars| {
            let sub_bars = match sub_timeframe {
                Some(sub) => provider.get_bars(&instrument, sub, start, end)?,
                None => Vec::new(),
            };
            Ok((bars, sub_bars))
        });
        let (bars, sub_bars) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                warn!(instrument = instrument.as_str(), error = %e, "skipping instrument");
                skipped.push(SkippedInstrument {
                    instrument,
                    reason: SkipReason::ProviderError(e.to_string()),
                });
                continue;
            }
        };

        if bars.is_empty() || (sub_timeframe.is_some() && sub_bars.is_empty()) {
            warn!(instrument = instrument.as_str(), %timeframe, "skipping instrument, no data");
            skipped.push(SkippedInstrument {
                instrument,
                reason: SkipReason::NoData,
            });
            continue;
        }

        if bars.len() < min_bars {
            warn!(
                instrument = instrument.as_str(),
                bars = bars.len(),
                minimum = min_bars,
                "skipping instrument, too few bars"
            );
            skipped.push(SkippedInstrument {
                instrument,
                reason: SkipReason::InsufficientBars { bars: bars.len() },
            });
            continue;
        }

        data.insert(&instrument, bars, sub_bars)?;
        kept.push(instrument);
    }

    if kept.is_empty() {
        return Err(KlinetraderError::NoData {
            instrument: "all".to_string(),
            timeframe: timeframe.to_string(),
        });
    }

    info!(
        loaded = kept.len(),
        requested = total,
        %timeframe,
        "universe loaded"
    );

    Ok(LoadedUniverse {
        universe: Universe {
            instruments: kept,
            timeframe,
        },
        data,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_instruments_basic() {
        let result = parse_instruments("BTCUSDT,ETHUSDT,SOLUSDT").unwrap();
        assert_eq!(result, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_parse_instruments_with_whitespace_and_case() {
        let result = parse_instruments("  btcusdt , EthUsdt ,SOLUSDT  ").unwrap();
        assert_eq!(result, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_parse_instruments_single() {
        assert_eq!(parse_instruments("DOGEUSDT").unwrap(), vec!["DOGEUSDT"]);
    }

    #[test]
    fn test_parse_instruments_empty_token() {
        let result = parse_instruments("BTCUSDT,,ETHUSDT");
        assert!(matches!(result, Err(UniverseError::EmptyToken)));
    }

    #[test]
    fn test_parse_instruments_duplicate() {
        let result = parse_instruments("BTCUSDT,ETHUSDT,btcusdt");
        assert!(matches!(result, Err(UniverseError::DuplicateInstrument(s)) if s == "BTCUSDT"));
    }

    #[test]
    fn test_universe_count() {
        let universe = Universe {
            instruments: vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            timeframe: Timeframe::H4,
        };
        assert_eq!(universe.count(), 2);
    }
}
