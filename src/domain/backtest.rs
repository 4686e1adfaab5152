//! Backtest engine and event loop.
//!
//! [`Backtest`] walks the unified timeline one signal period at a time:
//!
//! 1. every tick bar inside the period is replayed in time order; at each
//!    tick open positions are evaluated in instrument-id order, then
//!    pending delayed entries are advanced;
//! 2. at the period close one new-entry decision is made from the
//!    period's bars;
//! 3. an equity point is recorded.
//!
//! Whatever is still open after the last period is force-closed. Event
//! times are bar close times (`timestamp + timeframe`).

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::delayed_entry::{DelayConfig, PendingEntry, PendingOutcome};
use super::error::KlinetraderError;
use super::exit::{ExitDecision, ExitEvaluator};
use super::kline::{Bar, Timeframe};
use super::position::TradeRecord;
use super::position_manager::{AccountState, EquityPoint, PositionManager};
use super::risk_gate::{
    GateContext, GateVerdict, PremiumObservation, RecordedPremiumGate, RiskGate,
    TrailingAverageGate,
};
use super::risk_params::{RiskParams, RiskTable};
use super::scanner::{Candidate, Direction, EntryScanner};
use super::series::{MarketData, SeriesGap};
use super::sizing::SizingPolicy;

/// What to do at a tick where an open position's instrument has no bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Evaluate exits against the last known price.
    #[default]
    CarryForward,
    /// Do not evaluate the position at that tick.
    Skip,
}

impl fmt::Display for GapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GapPolicy::CarryForward => "carry_forward",
            GapPolicy::Skip => "skip",
        })
    }
}

impl FromStr for GapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "carry_forward" | "carry" => Ok(GapPolicy::CarryForward),
            "skip" => Ok(GapPolicy::Skip),
            other => Err(format!("unknown gap policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum GateConfig {
    #[default]
    Disabled,
    TrailingAverage {
        lookback: usize,
        max_extension: f64,
    },
    RecordedPremium {
        max_abs_premium: f64,
    },
}

/// Build the configured gate; premium observations come from the loaded data.
pub fn build_gate(
    config: &GateConfig,
    premiums: &[PremiumObservation],
) -> Option<Box<dyn RiskGate>> {
    match config {
        GateConfig::Disabled => None,
        GateConfig::TrailingAverage {
            lookback,
            max_extension,
        } => Some(Box::new(TrailingAverageGate {
            lookback: *lookback,
            max_extension: *max_extension,
        })),
        GateConfig::RecordedPremium { max_abs_premium } => Some(Box::new(
            RecordedPremiumGate::new(premiums.to_vec(), *max_abs_premium),
        )),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub timeframe: Timeframe,
    /// Finer timeframe for exit ticks and delayed entries.
    pub sub_timeframe: Option<Timeframe>,
    pub initial_capital: f64,
    /// Base fraction of current cash posted per entry.
    pub position_size: f64,
    /// Add margin as a multiple of the entry margin.
    pub add_position_size: f64,
    pub min_pct_chg: f64,
    pub direction: Direction,
    /// Holding limit in signal periods; 0 disables the timeout.
    pub max_hold_periods: u32,
    pub delay: DelayConfig,
    pub gap_policy: GapPolicy,
    pub sizing: SizingPolicy,
    pub gate: GateConfig,
    pub risk: RiskTable,
}

impl BacktestConfig {
    pub fn max_hold(&self) -> Option<Duration> {
        if self.max_hold_periods == 0 {
            None
        } else {
            // a limit too large for a Duration never fires
            i32::try_from(self.max_hold_periods)
                .ok()
                .and_then(|n| self.timeframe.duration().checked_mul(n))
        }
    }
}

impl Default for BacktestConfig {
    /// Covers all loaded data on daily bars.
    fn default() -> Self {
        Self {
            start_date: NaiveDate::MIN,
            end_date: NaiveDate::MAX,
            timeframe: Timeframe::D1,
            sub_timeframe: None,
            initial_capital: 10_000.0,
            position_size: 0.1,
            add_position_size: 1.0,
            min_pct_chg: 0.1,
            direction: Direction::ShortOnly,
            max_hold_periods: 5,
            delay: DelayConfig::default(),
            gap_policy: GapPolicy::default(),
            sizing: SizingPolicy::default(),
            gate: GateConfig::default(),
            risk: RiskTable::default(),
        }
    }
}

/// Tick at which an open position's instrument had no bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataGap {
    pub instrument: String,
    pub time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VetoRecord {
    pub instrument: String,
    pub time: NaiveDateTime,
    pub gate: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub trades: Vec<TradeRecord>,
    pub final_account: AccountState,
    pub equity_curve: Vec<EquityPoint>,
    pub data_gaps: Vec<DataGap>,
    pub series_gaps: Vec<SeriesGap>,
    pub vetoed: Vec<VetoRecord>,
    /// Entries dropped for lack of cash.
    pub skipped_entries: usize,
    /// Add attempts refused for lack of cash.
    pub skipped_adds: usize,
    /// Delayed signals dropped at window expiry, or still pending at the end.
    pub discarded_signals: usize,
    pub periods: usize,
}

impl BacktestResult {
    pub fn final_balance(&self) -> f64 {
        self.final_account.cash_balance
    }

    pub fn total_return(&self) -> f64 {
        if self.initial_capital > 0.0 {
            (self.final_balance() - self.initial_capital) / self.initial_capital
        } else {
            0.0
        }
    }
}

struct RunState {
    pm: PositionManager,
    pending: BTreeMap<String, PendingEntry>,
    equity_curve: Vec<EquityPoint>,
    data_gaps: Vec<DataGap>,
    vetoed: Vec<VetoRecord>,
    skipped_entries: usize,
    skipped_adds: usize,
    discarded_signals: usize,
}

pub struct Backtest {
    config: BacktestConfig,
    scanner: EntryScanner,
    exits: ExitEvaluator,
    gate: Option<Box<dyn RiskGate>>,
}

impl Backtest {
    pub fn new(config: BacktestConfig) -> Self {
        let scanner = EntryScanner::new(config.direction);
        let exits = ExitEvaluator::new(config.max_hold());
        Self {
            config,
            scanner,
            exits,
            gate: None,
        }
    }

    /// Use `gate` instead of the one described by the config.
    pub fn with_gate(mut self, gate: Box<dyn RiskGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn run(&self, data: &MarketData) -> Result<BacktestResult, KlinetraderError> {
        let cfg = &self.config;
        let timeline = data.timeline(cfg.start_date, cfg.end_date);
        let Some(&last_period) = timeline.last() else {
            return Err(KlinetraderError::NoData {
                instrument: "*".to_string(),
                timeframe: data.timeframe.to_string(),
            });
        };

        let built_gate;
        let gate: Option<&dyn RiskGate> = match &self.gate {
            Some(g) => Some(g.as_ref()),
            None => {
                built_gate = build_gate(&cfg.gate, &data.premiums);
                built_gate.as_deref()
            }
        };

        let schedule = data.tick_schedule(&timeline);
        let period_span = data.timeframe.duration();
        let tick_span = data.tick_timeframe().duration();

        info!(
            instruments = data.instrument_count(),
            periods = timeline.len(),
            timeframe = %data.timeframe,
            tick_timeframe = %data.tick_timeframe(),
            direction = %cfg.direction,
            gate = gate.map(|g| g.name()).unwrap_or("none"),
            "starting backtest"
        );

        let mut state = RunState {
            pm: PositionManager::new(cfg.initial_capital),
            pending: BTreeMap::new(),
            equity_curve: Vec::with_capacity(timeline.len()),
            data_gaps: Vec::new(),
            vetoed: Vec::new(),
            skipped_entries: 0,
            skipped_adds: 0,
            discarded_signals: 0,
        };

        for &period in &timeline {
            match schedule.get(&period) {
                Some(ticks) => {
                    for (&tick, bars) in ticks {
                        let now = tick + tick_span;
                        self.evaluate_exits(&mut state, tick, bars, now)?;
                        self.advance_pending(&mut state, bars, now)?;
                    }
                }
                None => {
                    // no tick bars at all: every open position is gapped
                    self.evaluate_exits(&mut state, period, &BTreeMap::new(), period + tick_span)?;
                }
            }

            let period_close = period + period_span;
            self.decide_entry(&mut state, data, gate, period, period_close)?;
            let closes: BTreeMap<String, f64> = data
                .period_bars(period)
                .into_iter()
                .filter(|(id, _)| state.pm.is_open(id))
                .map(|(id, bar)| (id, bar.close))
                .collect();
            state.pm.mark_to_market(&closes);
            state.equity_curve.push(EquityPoint {
                time: period_close,
                equity: state.pm.account().equity,
            });
        }

        let end_time = last_period + period_span;
        let forced = state
            .pm
            .force_close_all(|i| data.last_close_at_or_before(i, end_time), end_time)?;
        if !state.pending.is_empty() {
            debug!(count = state.pending.len(), "dropping pending entries at end of run");
            state.discarded_signals += state.pending.len();
        }
        if let Some(point) = state.equity_curve.last_mut() {
            point.equity = state.pm.account().equity;
        }

        let result = BacktestResult {
            initial_capital: cfg.initial_capital,
            trades: state.pm.ledger().to_vec(),
            final_account: state.pm.account(),
            equity_curve: state.equity_curve,
            data_gaps: state.data_gaps,
            series_gaps: data.gaps.clone(),
            vetoed: state.vetoed,
            skipped_entries: state.skipped_entries,
            skipped_adds: state.skipped_adds,
            discarded_signals: state.discarded_signals,
            periods: timeline.len(),
        };

        info!(
            trades = result.trades.len(),
            forced = forced.len(),
            final_balance = result.final_balance(),
            data_gaps = result.data_gaps.len(),
            vetoed = result.vetoed.len(),
            skipped_entries = result.skipped_entries,
            "backtest finished"
        );
        Ok(result)
    }

    fn evaluate_exits(
        &self,
        state: &mut RunState,
        tick: NaiveDateTime,
        bars: &BTreeMap<&str, &Bar>,
        now: NaiveDateTime,
    ) -> Result<(), KlinetraderError> {
        let instruments: Vec<String> = state.pm.positions().map(|p| p.instrument.clone()).collect();
        for instrument in instruments {
            let price = match bars.get(instrument.as_str()) {
                Some(bar) => {
                    state.pm.mark(&instrument, bar.close);
                    bar.close
                }
                None => {
                    warn!(
                        instrument = instrument.as_str(),
                        %tick,
                        policy = %self.config.gap_policy,
                        "no bar for open position"
                    );
                    state.data_gaps.push(DataGap {
                        instrument: instrument.clone(),
                        time: tick,
                    });
                    match self.config.gap_policy {
                        GapPolicy::Skip => continue,
                        GapPolicy::CarryForward => match state.pm.last_mark(&instrument) {
                            Some(price) => price,
                            None => continue,
                        },
                    }
                }
            };

            let Some(position) = state.pm.get(&instrument) else {
                continue;
            };
            match self.exits.evaluate(position, price, now) {
                ExitDecision::Hold => {}
                ExitDecision::Add => {
                    match state
                        .pm
                        .add(&instrument, price, now, self.config.add_position_size)
                    {
                        Ok(_) => {}
                        Err(KlinetraderError::InsufficientBalance {
                            required,
                            available,
                        }) => {
                            warn!(
                                instrument = instrument.as_str(),
                                required,
                                available,
                                "skipping add"
                            );
                            state.skipped_adds += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ExitDecision::Close(reason) => {
                    state.pm.close(&instrument, price, now, reason)?;
                }
            }
        }
        Ok(())
    }

    fn advance_pending(
        &self,
        state: &mut RunState,
        bars: &BTreeMap<&str, &Bar>,
        now: NaiveDateTime,
    ) -> Result<(), KlinetraderError> {
        let instruments: Vec<String> = state.pending.keys().cloned().collect();
        for instrument in instruments {
            let Some(bar) = bars.get(instrument.as_str()) else {
                continue;
            };
            let Some(pending) = state.pending.get_mut(&instrument) else {
                continue;
            };
            match pending.observe(bar, self.config.delay.expiry) {
                PendingOutcome::Waiting => {}
                PendingOutcome::Enter { price, expired } => {
                    let Some(pending) = state.pending.remove(&instrument) else {
                        continue;
                    };
                    debug!(
                        instrument = instrument.as_str(),
                        price,
                        expired,
                        observed = pending.observed(),
                        "delayed entry confirmed"
                    );
                    self.open(state, &pending.candidate, &pending.risk, price, now)?;
                }
                PendingOutcome::Discard => {
                    state.pending.remove(&instrument);
                    state.discarded_signals += 1;
                    debug!(instrument = instrument.as_str(), "delayed entry expired, discarded");
                }
            }
        }
        Ok(())
    }

    fn decide_entry(
        &self,
        state: &mut RunState,
        data: &MarketData,
        gate: Option<&dyn RiskGate>,
        period: NaiveDateTime,
        period_close: NaiveDateTime,
    ) -> Result<(), KlinetraderError> {
        let cfg = &self.config;
        let period_bars = data.period_bars(period);
        let mut excluded = state.pm.open_instruments();
        excluded.extend(state.pending.keys().cloned());

        let Some(candidate) = self.scanner.scan(&period_bars, &excluded, cfg.min_pct_chg) else {
            return Ok(());
        };
        let risk = cfg.risk.select(candidate.pct_chg);

        if let Some(gate) = gate {
            let history = data
                .series(&candidate.instrument)
                .map(|s| s.history_before(period))
                .unwrap_or(&[]);
            let ctx = GateContext {
                time: period_close,
                history,
            };
            if let GateVerdict::Veto(reason) =
                gate.approve(&candidate.instrument, &candidate, &ctx)
            {
                info!(
                    instrument = candidate.instrument.as_str(),
                    gate = gate.name(),
                    %reason,
                    "entry vetoed"
                );
                state.vetoed.push(VetoRecord {
                    instrument: candidate.instrument,
                    time: period_close,
                    gate: gate.name().to_string(),
                    reason,
                });
                return Ok(());
            }
        }

        if cfg.delay.enabled && cfg.delay.periods > 0 {
            debug!(
                instrument = candidate.instrument.as_str(),
                pct_chg = candidate.pct_chg,
                window = cfg.delay.periods,
                "entry pending momentum check"
            );
            state.pending.insert(
                candidate.instrument.clone(),
                PendingEntry::new(candidate, risk, cfg.delay.periods),
            );
            return Ok(());
        }

        let price = candidate.bar.close;
        self.open(state, &candidate, &risk, price, period_close)
    }

    fn open(
        &self,
        state: &mut RunState,
        candidate: &Candidate,
        risk: &RiskParams,
        price: f64,
        time: NaiveDateTime,
    ) -> Result<(), KlinetraderError> {
        let ratio = self
            .config
            .sizing
            .size_ratio(self.config.position_size, &candidate.bar);
        match state.pm.create(
            &candidate.instrument,
            candidate.side,
            price,
            time,
            ratio,
            risk,
            candidate.pct_chg,
        ) {
            Ok(_) => Ok(()),
            Err(KlinetraderError::InsufficientBalance {
                required,
                available,
            }) => {
                warn!(
                    instrument = candidate.instrument.as_str(),
                    required, available, "skipping entry"
                );
                state.skipped_entries += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{ExitReason, Side};
    use approx::assert_relative_eq;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bar(instrument: &str, d: u32, open: f64, close: f64) -> Bar {
        Bar {
            instrument: instrument.to_string(),
            timestamp: day(d),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 1_000.0,
        }
    }

    fn flat_risk() -> RiskTable {
        RiskTable::flat(RiskParams {
            leverage: 10.0,
            take_profit_pct: 0.10,
            stop_loss_pct: -0.18,
            add_trigger_pct: -0.18,
            entry_delay_pct: 0.02,
        })
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            risk: flat_risk(),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn gap_policy_parses() {
        assert_eq!("carry_forward".parse::<GapPolicy>().unwrap(), GapPolicy::CarryForward);
        assert_eq!("SKIP".parse::<GapPolicy>().unwrap(), GapPolicy::Skip);
        assert!("interpolate".parse::<GapPolicy>().is_err());
    }

    #[test]
    fn max_hold_in_periods() {
        let cfg = BacktestConfig {
            max_hold_periods: 3,
            timeframe: Timeframe::H4,
            ..config()
        };
        assert_eq!(cfg.max_hold(), Some(Duration::hours(12)));
        let cfg = BacktestConfig {
            max_hold_periods: u32::MAX,
            ..config()
        };
        assert_eq!(cfg.max_hold(), None);
        let cfg = BacktestConfig {
            max_hold_periods: i32::MAX as u32,
            timeframe: Timeframe::D1,
            ..config()
        };
        assert_eq!(cfg.max_hold(), None);
        let cfg = BacktestConfig {
            max_hold_periods: 36_500,
            timeframe: Timeframe::D1,
            ..config()
        };
        assert_eq!(cfg.max_hold(), Some(Duration::days(36_500)));
        let cfg = BacktestConfig {
            max_hold_periods: 0,
            ..config()
        };
        assert_eq!(cfg.max_hold(), None);
    }

    #[test]
    fn build_gate_from_config() {
        assert!(build_gate(&GateConfig::Disabled, &[]).is_none());
        let gate = build_gate(
            &GateConfig::TrailingAverage {
                lookback: 3,
                max_extension: 0.5,
            },
            &[],
        )
        .unwrap();
        assert_eq!(gate.name(), "trailing_average");
        let gate = build_gate(&GateConfig::RecordedPremium { max_abs_premium: 0.01 }, &[]).unwrap();
        assert_eq!(gate.name(), "recorded_premium");
    }

    #[test]
    fn empty_timeline_is_no_data() {
        let data = MarketData::new(Timeframe::D1, None);
        let err = Backtest::new(config()).run(&data).unwrap_err();
        assert!(matches!(err, KlinetraderError::NoData { .. }));
    }

    #[test]
    fn short_take_profit_round_trip() {
        let mut data = MarketData::new(Timeframe::D1, None);
        data.insert(
            "XUSDT",
            vec![bar("XUSDT", 1, 80.0, 100.0), bar("XUSDT", 2, 100.0, 90.0)],
            vec![],
        )
        .unwrap();
        let result = Backtest::new(config()).run(&data).unwrap();
        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Short);
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.entry_time, day(2));
        assert_eq!(trade.exit_time, day(3));
        assert_relative_eq!(trade.realized_pnl, 1_000.0, epsilon = 1e-9);
        assert_relative_eq!(result.final_balance(), 11_000.0, epsilon = 1e-9);
        assert_eq!(result.equity_curve.len(), 2);
    }

    #[test]
    fn equity_curve_marks_open_positions_at_period_close() {
        let mut data = MarketData::new(Timeframe::D1, None);
        data.insert(
            "XUSDT",
            vec![
                bar("XUSDT", 1, 80.0, 100.0),
                bar("XUSDT", 2, 100.0, 95.0),
                bar("XUSDT", 3, 95.0, 95.0),
            ],
            vec![],
        )
        .unwrap();
        let result = Backtest::new(config()).run(&data).unwrap();
        let equity: Vec<f64> = result.equity_curve.iter().map(|p| p.equity).collect();
        assert_eq!(equity.len(), 3);
        assert_relative_eq!(equity[0], 10_000.0, epsilon = 1e-9);
        // short from 100 marked at 95: 0.05 * 10 * 1000
        assert_relative_eq!(equity[1], 10_500.0, epsilon = 1e-9);
        assert_eq!(result.equity_curve[1].time, day(3));
        assert_relative_eq!(result.final_balance(), 10_500.0, epsilon = 1e-9);
    }

    #[test]
    fn skip_policy_leaves_gapped_position_alone() {
        let mut data = MarketData::new(Timeframe::D1, None);
        data.insert(
            "AAA",
            vec![bar("AAA", 1, 80.0, 100.0), bar("AAA", 4, 100.0, 100.0)],
            vec![],
        )
        .unwrap();
        data.insert(
            "BBB",
            (1..=4).map(|d| bar("BBB", d, 10.0, 10.0)).collect(),
            vec![],
        )
        .unwrap();

        let cfg = BacktestConfig {
            gap_policy: GapPolicy::Skip,
            max_hold_periods: 1,
            ..config()
        };
        let result = Backtest::new(cfg).run(&data).unwrap();
        assert_eq!(result.data_gaps.len(), 2);
        assert!(result.data_gaps.iter().all(|g| g.instrument == "AAA"));
        // skipped on days 2 and 3, evaluated (and timed out) on day 4
        assert_eq!(result.trades[0].exit_reason, ExitReason::Timeout);
        assert_eq!(result.trades[0].exit_time, day(5));
    }

    #[test]
    fn carry_forward_policy_times_out_during_gap() {
        let mut data = MarketData::new(Timeframe::D1, None);
        data.insert(
            "AAA",
            vec![bar("AAA", 1, 80.0, 100.0), bar("AAA", 4, 100.0, 100.0)],
            vec![],
        )
        .unwrap();
        data.insert(
            "BBB",
            (1..=4).map(|d| bar("BBB", d, 10.0, 10.0)).collect(),
            vec![],
        )
        .unwrap();

        let cfg = BacktestConfig {
            gap_policy: GapPolicy::CarryForward,
            max_hold_periods: 1,
            ..config()
        };
        let result = Backtest::new(cfg).run(&data).unwrap();
        assert_eq!(result.data_gaps.len(), 1);
        assert_eq!(result.data_gaps[0].time, day(2));
        assert_eq!(result.trades[0].exit_reason, ExitReason::Timeout);
        assert_eq!(result.trades[0].exit_time, day(3));
        assert_relative_eq!(result.trades[0].exit_price, 100.0);
    }
}
