//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{self, CsvAdapter};
use crate::adapters::csv_ledger::CsvLedgerAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{Backtest, BacktestConfig, BacktestResult, GapPolicy, GateConfig};
use crate::domain::config_validation::{parse_date, parse_enum, parse_list, validate_config};
use crate::domain::delayed_entry::{DelayConfig, ExpiryPolicy};
use crate::domain::error::KlinetraderError;
use crate::domain::kline::Timeframe;
use crate::domain::metrics::{InstrumentResult, Summary};
use crate::domain::risk_gate::PremiumObservation;
use crate::domain::risk_params::{RiskParams, RiskTable};
use crate::domain::scanner::Direction;
use crate::domain::series::MarketData;
use crate::domain::sizing::{SizingPolicy, VolumeTiers};
use crate::domain::sweep::{SweepAxis, SweepParam, run_sweep};
use crate::domain::universe::{load_universe, parse_instruments};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PriceSeriesProvider;
use crate::ports::results_port::ResultsPort;

#[derive(Parser, Debug)]
#[command(name = "klinetrader", about = "K-line mean-reversion backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Trade ledger CSV; written to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Summary CSV
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Comma-separated instruments, replacing [backtest] instruments
        #[arg(long)]
        instruments: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Validate and load data without running
        #[arg(long)]
        dry_run: bool,
    },
    /// Run a parameter grid in parallel
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        /// Axis as `param=v1,v2,...`; repeatable, replaces the [sweep] section
        #[arg(long = "axis")]
        axes: Vec<String>,
        /// Print only the best N combinations
        #[arg(long)]
        top: Option<usize>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List instruments available from the configured data source
    ListInstruments {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        timeframe: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            summary,
            instruments,
            start,
            end,
            dry_run,
        } => {
            let overrides = Overrides {
                instruments,
                start,
                end,
            };
            if dry_run {
                run_dry_run(&config, &overrides)
            } else {
                run_backtest(&config, output.as_ref(), summary.as_ref(), &overrides)
            }
        }
        Command::Sweep { config, axes, top } => run_sweep_command(&config, &axes, top),
        Command::Validate { config } => run_validate(&config),
        Command::ListInstruments { config, timeframe } => {
            run_list_instruments(&config, timeframe.as_deref())
        }
    }
}

fn fail(e: &KlinetraderError) -> ExitCode {
    if e.is_invariant_violation() {
        tracing::error!(error = %e, "run aborted on a broken position invariant");
    }
    eprintln!("error: {e}");
    e.into()
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = KlinetraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        fail(&err)
    })
}

/// Command-line values that replace config entries.
#[derive(Debug, Default)]
pub struct Overrides {
    pub instruments: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl Overrides {
    pub fn apply(&self, adapter: &mut FileConfigAdapter) {
        if let Some(v) = &self.instruments {
            adapter.set("backtest", "instruments", v);
        }
        if let Some(v) = &self.start {
            adapter.set("backtest", "start_date", v);
        }
        if let Some(v) = &self.end {
            adapter.set("backtest", "end_date", v);
        }
    }
}

fn load_validated(
    config_path: &PathBuf,
    overrides: &Overrides,
) -> Result<FileConfigAdapter, ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let mut adapter = load_config(config_path)?;
    overrides.apply(&mut adapter);
    validate_config(&adapter).map_err(|e| fail(&e))?;
    Ok(adapter)
}

pub fn build_risk_table(adapter: &dyn ConfigPort) -> Result<RiskTable, KlinetraderError> {
    let bounds = parse_list(adapter, "risk", "tier_bounds")?;
    let any_set = bounds.is_some()
        || ["leverage", "take_profit", "stop_loss", "add_trigger", "entry_delay"]
            .iter()
            .any(|key| adapter.has_key("risk", key));
    if !any_set {
        return Ok(RiskTable::default());
    }
    let list = |key: &str| -> Result<Vec<f64>, KlinetraderError> {
        parse_list(adapter, "risk", key)?.ok_or_else(|| KlinetraderError::ConfigMissing {
            section: "risk".into(),
            key: key.into(),
        })
    };
    let leverage = list("leverage")?;
    let take_profit = list("take_profit")?;
    let stop_loss = list("stop_loss")?;
    let add_trigger = list("add_trigger")?;
    let entry_delay = list("entry_delay")?;

    let tiers = leverage
        .iter()
        .enumerate()
        .map(|(i, &lev)| -> Option<RiskParams> {
            Some(RiskParams {
                leverage: lev,
                take_profit_pct: *take_profit.get(i)?,
                stop_loss_pct: *stop_loss.get(i)?,
                add_trigger_pct: *add_trigger.get(i)?,
                entry_delay_pct: *entry_delay.get(i)?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| KlinetraderError::ConfigInvalid {
            section: "risk".into(),
            key: "leverage".into(),
            reason: "risk lists have different lengths".into(),
        })?;

    RiskTable::new(bounds.unwrap_or_default(), tiers).map_err(|reason| {
        KlinetraderError::ConfigInvalid {
            section: "risk".into(),
            key: "tier_bounds".into(),
            reason,
        }
    })
}

pub fn build_sizing(adapter: &dyn ConfigPort) -> Result<SizingPolicy, KlinetraderError> {
    if adapter.get_mode("sizing", "mode", "fixed") != "volume_tiered" {
        return Ok(SizingPolicy::Fixed);
    }
    let bands = parse_list(adapter, "sizing", "volume_bands")?;
    let multipliers = parse_list(adapter, "sizing", "volume_multipliers")?;
    let tiers = match (bands, multipliers) {
        (Some(b), Some(m)) => {
            VolumeTiers::new(b, m).map_err(|reason| KlinetraderError::ConfigInvalid {
                section: "sizing".into(),
                key: "volume_bands".into(),
                reason,
            })?
        }
        _ => VolumeTiers::default(),
    };
    Ok(SizingPolicy::VolumeTiered(tiers))
}

pub fn build_gate_config(adapter: &dyn ConfigPort) -> GateConfig {
    match adapter.get_mode("gate", "mode", "none").as_str() {
        "trailing_average" => GateConfig::TrailingAverage {
            lookback: adapter.get_int("gate", "lookback", 20).max(1) as usize,
            max_extension: adapter.get_double("gate", "max_extension", 0.5),
        },
        "recorded_premium" => GateConfig::RecordedPremium {
            max_abs_premium: adapter.get_double("gate", "max_abs_premium", 0.01),
        },
        _ => GateConfig::Disabled,
    }
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, KlinetraderError> {
    let defaults = BacktestConfig::default();
    let sub_timeframe = match adapter.get_string("backtest", "sub_timeframe") {
        Some(s) if !s.trim().is_empty() => Some(s.parse::<Timeframe>().map_err(|reason| {
            KlinetraderError::ConfigInvalid {
                section: "backtest".into(),
                key: "sub_timeframe".into(),
                reason,
            }
        })?),
        _ => None,
    };

    Ok(BacktestConfig {
        start_date: parse_date(adapter, "backtest", "start_date")?,
        end_date: parse_date(adapter, "backtest", "end_date")?,
        timeframe: parse_enum(adapter, "backtest", "timeframe", Timeframe::D1)?,
        sub_timeframe,
        initial_capital: adapter.get_double(
            "backtest",
            "initial_capital",
            defaults.initial_capital,
        ),
        position_size: adapter.get_double("entry", "position_size", defaults.position_size),
        add_position_size: adapter.get_double(
            "entry",
            "add_position_size",
            defaults.add_position_size,
        ),
        min_pct_chg: adapter.get_double("entry", "min_pct_chg", defaults.min_pct_chg),
        direction: parse_enum(adapter, "entry", "direction", Direction::ShortOnly)?,
        max_hold_periods: adapter
            .get_int("backtest", "max_hold_periods", defaults.max_hold_periods as i64)
            .clamp(0, i32::MAX as i64) as u32,
        delay: DelayConfig {
            enabled: adapter.get_bool("delay", "enabled", false),
            periods: adapter
                .get_int("delay", "periods", defaults.delay.periods as i64)
                .max(0) as usize,
            expiry: parse_enum(adapter, "delay", "expiry", ExpiryPolicy::Discard)?,
        },
        gap_policy: parse_enum(adapter, "backtest", "gap_policy", GapPolicy::default())?,
        sizing: build_sizing(adapter)?,
        gate: build_gate_config(adapter),
        risk: build_risk_table(adapter)?,
    })
}

/// Build the price provider named by `[data] source`.
pub fn build_provider(
    adapter: &dyn ConfigPort,
) -> Result<Box<dyn PriceSeriesProvider>, KlinetraderError> {
    match adapter.get_mode("data", "source", "csv").as_str() {
        "csv" => {
            let path = adapter.get_string("data", "path").ok_or_else(|| {
                KlinetraderError::ConfigMissing {
                    section: "data".into(),
                    key: "path".into(),
                }
            })?;
            Ok(Box::new(CsvAdapter::new(PathBuf::from(path.trim()))))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            Ok(Box::new(SqliteAdapter::from_config(adapter)?))
        }
        other => Err(KlinetraderError::ConfigInvalid {
            section: "data".into(),
            key: "source".into(),
            reason: format!("data source '{other}' is not available in this build"),
        }),
    }
}

pub fn load_gate_premiums(
    adapter: &dyn ConfigPort,
) -> Result<Vec<PremiumObservation>, KlinetraderError> {
    match adapter.get_string("gate", "premium_file") {
        Some(path) if !path.trim().is_empty() => {
            csv_adapter::load_premiums(Path::new(path.trim()))
        }
        _ => Ok(Vec::new()),
    }
}

/// Instruments from `[backtest] instruments`, or everything the provider
/// has for the timeframe.
pub fn resolve_instruments(
    config: &dyn ConfigPort,
    provider: &dyn PriceSeriesProvider,
    timeframe: Timeframe,
) -> Result<Vec<String>, KlinetraderError> {
    match config.get_string("backtest", "instruments") {
        Some(list) if !list.trim().is_empty() => {
            parse_instruments(&list).map_err(|e| KlinetraderError::ConfigInvalid {
                section: "backtest".into(),
                key: "instruments".into(),
                reason: e.to_string(),
            })
        }
        _ => provider.list_instruments(timeframe),
    }
}

/// Load everything a run reads from the configured sources.
pub fn load_market_data(
    adapter: &dyn ConfigPort,
    provider: &dyn PriceSeriesProvider,
    bt_config: &BacktestConfig,
) -> Result<MarketData, KlinetraderError> {
    let instruments = resolve_instruments(adapter, provider, bt_config.timeframe)?;
    eprintln!(
        "Loading {} instruments on {}...",
        instruments.len(),
        bt_config.timeframe
    );
    let min_bars = adapter.get_int("data", "min_bars", 1).max(1) as usize;
    let loaded = load_universe(
        provider,
        instruments,
        bt_config.timeframe,
        bt_config.sub_timeframe,
        bt_config.start_date,
        bt_config.end_date,
        min_bars,
    )?;
    for skipped in &loaded.skipped {
        eprintln!("  skipped {}: {:?}", skipped.instrument, skipped.reason);
    }
    let premiums = load_gate_premiums(adapter)?;
    Ok(loaded.data.with_premiums(premiums))
}

pub fn run_backtest_pipeline(
    adapter: &dyn ConfigPort,
    provider: &dyn PriceSeriesProvider,
) -> Result<BacktestResult, KlinetraderError> {
    let bt_config = build_backtest_config(adapter)?;
    let data = load_market_data(adapter, provider, &bt_config)?;
    eprintln!(
        "Running backtest: {} instruments, {} to {}",
        data.instrument_count(),
        bt_config.start_date,
        bt_config.end_date,
    );
    Backtest::new(bt_config).run(&data)
}

pub fn print_summary(result: &BacktestResult, summary: &Summary) {
    eprintln!("\n=== Results ===");
    eprintln!("Final Balance:    {:.2}", summary.final_balance);
    eprintln!("Total Return:     {:.2}%", summary.total_return * 100.0);
    eprintln!("Max Drawdown:     -{:.1}%", summary.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", summary.total_trades);
    eprintln!(
        "Wins / Losses:    {} / {}",
        summary.wins, summary.losses
    );
    eprintln!("Win Rate:         {:.1}%", summary.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", summary.profit_factor);
    eprintln!("Avg Hold:         {:.1}h", summary.avg_hold_hours);
    eprintln!("Adds Used:        {}", summary.adds_used);
    for (reason, count) in &summary.exits_by_reason {
        eprintln!("  {reason}: {count}");
    }
    if result.skipped_entries + result.skipped_adds > 0 {
        eprintln!(
            "Skipped (balance): {} entries, {} adds",
            result.skipped_entries, result.skipped_adds
        );
    }
    if !result.vetoed.is_empty() {
        eprintln!("Vetoed entries:   {}", result.vetoed.len());
    }
    if result.discarded_signals > 0 {
        eprintln!("Discarded signals: {}", result.discarded_signals);
    }
    if !result.data_gaps.is_empty() || !result.series_gaps.is_empty() {
        eprintln!(
            "Data gaps:        {} ticks, {} series holes",
            result.data_gaps.len(),
            result.series_gaps.len()
        );
    }

    let per_instrument = InstrumentResult::compute_per_instrument(&result.trades);
    if !per_instrument.is_empty() {
        eprintln!("\n=== Per-Instrument Summary ===");
        for ir in &per_instrument {
            let pnl_sign = if ir.total_pnl >= 0.0 { "+" } else { "" };
            eprintln!(
                "  {}:  {} trades, {:.1}% win rate, {}{:.2}",
                ir.instrument,
                ir.total_trades,
                ir.win_rate * 100.0,
                pnl_sign,
                ir.total_pnl,
            );
        }
    }
}

fn write_to(
    path: Option<&PathBuf>,
    write: impl FnOnce(&mut dyn Write) -> Result<(), KlinetraderError>,
) -> Result<(), KlinetraderError> {
    match path {
        Some(p) => {
            let mut file = File::create(p)?;
            write(&mut file)?;
            eprintln!("Written: {}", p.display());
            Ok(())
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            write(&mut lock)
        }
    }
}

fn run_backtest(
    config_path: &PathBuf,
    output_path: Option<&PathBuf>,
    summary_path: Option<&PathBuf>,
    overrides: &Overrides,
) -> ExitCode {
    let adapter = match load_validated(config_path, overrides) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let provider = match build_provider(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let result = match run_backtest_pipeline(&adapter, provider.as_ref()) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let summary = Summary::compute(&result);
    print_summary(&result, &summary);

    let sink = CsvLedgerAdapter::new();
    if let Err(e) = write_to(output_path, |out| sink.write_ledger(&result.trades, out)) {
        return fail(&e);
    }
    if let Some(path) = summary_path {
        if let Err(e) = write_to(Some(path), |out| sink.write_summary(&summary, out)) {
            return fail(&e);
        }
    }
    ExitCode::SUCCESS
}

pub fn run_dry_run(config_path: &PathBuf, overrides: &Overrides) -> ExitCode {
    let adapter = match load_validated(config_path, overrides) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    print_config(&bt_config);

    let provider = match build_provider(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let data = match load_market_data(&adapter, provider.as_ref(), &bt_config) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let timeline = data.timeline(bt_config.start_date, bt_config.end_date);
    eprintln!(
        "Dry run: {} instruments, {} periods, {} series gaps",
        data.instrument_count(),
        timeline.len(),
        data.gaps.len()
    );
    ExitCode::SUCCESS
}

fn print_config(cfg: &BacktestConfig) {
    eprintln!("  Period:        {} to {}", cfg.start_date, cfg.end_date);
    match cfg.sub_timeframe {
        Some(sub) => eprintln!("  Timeframe:     {} (ticks {})", cfg.timeframe, sub),
        None => eprintln!("  Timeframe:     {}", cfg.timeframe),
    }
    eprintln!("  Capital:       {:.2}", cfg.initial_capital);
    eprintln!("  Direction:     {}", cfg.direction);
    eprintln!("  Min change:    {:.2}%", cfg.min_pct_chg * 100.0);
    eprintln!(
        "  Position size: {:.2}% ({})",
        cfg.position_size * 100.0,
        cfg.sizing.name()
    );
    eprintln!("  Add size:      {:.2}x entry margin", cfg.add_position_size);
    eprintln!("  Max hold:      {} periods", cfg.max_hold_periods);
    if cfg.delay.enabled {
        eprintln!(
            "  Delayed entry: {} periods, expiry {}",
            cfg.delay.periods, cfg.delay.expiry
        );
    }
    eprintln!("  Gap policy:    {}", cfg.gap_policy);
    eprintln!("  Risk tiers:    {}", cfg.risk.tier_count());
}

/// Axes from `--axis` arguments, or the `[sweep]` section when none given.
pub fn build_sweep_axes(
    adapter: &dyn ConfigPort,
    args: &[String],
) -> Result<Vec<SweepAxis>, KlinetraderError> {
    let invalid = |key: &str, reason: String| KlinetraderError::ConfigInvalid {
        section: "sweep".into(),
        key: key.into(),
        reason,
    };

    if !args.is_empty() {
        return args
            .iter()
            .map(|arg| {
                let (name, values) = arg
                    .split_once('=')
                    .ok_or_else(|| invalid(arg, "expected param=v1,v2,...".into()))?;
                let param: SweepParam = name.parse().map_err(|e| invalid(name, e))?;
                let values = values
                    .split(',')
                    .map(|v| {
                        v.trim()
                            .parse::<f64>()
                            .map_err(|_| invalid(name, format!("'{}' is not a number", v.trim())))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SweepAxis { param, values })
            })
            .collect();
    }

    let mut axes = Vec::new();
    for param in SweepParam::ALL {
        if let Some(values) = parse_list(adapter, "sweep", param.as_str())? {
            axes.push(SweepAxis { param, values });
        }
    }
    Ok(axes)
}

fn run_sweep_command(config_path: &PathBuf, axis_args: &[String], top: Option<usize>) -> ExitCode {
    let adapter = match load_validated(config_path, &Overrides::default()) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let axes = match build_sweep_axes(&adapter, axis_args) {
        Ok(a) => a,
        Err(e) => return fail(&e),
    };
    if axes.is_empty() {
        eprintln!("error: no sweep axes (use --axis or a [sweep] section)");
        return ExitCode::from(2);
    }
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    let provider = match build_provider(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let data = match load_market_data(&adapter, provider.as_ref(), &bt_config) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };

    let results = match run_sweep(&bt_config, &axes, &data) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    eprintln!("Sweep finished: {} combinations", results.len());

    let shown = top.unwrap_or(results.len()).min(results.len());
    let mut out = csv::Writer::from_writer(io::stdout());
    let mut header = vec!["config_id".to_string()];
    header.extend(axes.iter().map(|a| a.param.to_string()));
    header.extend(
        [
            "total_trades",
            "win_rate",
            "total_return",
            "max_drawdown",
            "final_balance",
        ]
        .map(String::from),
    );
    let write_result = (|| -> Result<(), csv::Error> {
        out.write_record(&header)?;
        for r in &results[..shown] {
            let mut row = vec![r.config_id.clone()];
            row.extend(r.overrides.iter().map(|(_, v)| v.to_string()));
            row.push(r.summary.total_trades.to_string());
            row.push(format!("{:.6}", r.summary.win_rate));
            row.push(format!("{:.6}", r.summary.total_return));
            row.push(format!("{:.6}", r.summary.max_drawdown));
            row.push(format!("{:.8}", r.summary.final_balance));
            out.write_record(&row)?;
        }
        out.flush()?;
        Ok(())
    })();
    if let Err(e) = write_result {
        return fail(&KlinetraderError::Io(io::Error::other(e)));
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_config(&adapter) {
        return fail(&e);
    }
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(&e),
    };
    if let Err(e) = build_sweep_axes(&adapter, &[]) {
        return fail(&e);
    }
    print_config(&bt_config);
    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}

fn run_list_instruments(config_path: &PathBuf, timeframe: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let timeframe = match timeframe {
        Some(tf) => match tf.parse::<Timeframe>() {
            Ok(t) => t,
            Err(reason) => {
                return fail(&KlinetraderError::ConfigInvalid {
                    section: "backtest".into(),
                    key: "timeframe".into(),
                    reason,
                });
            }
        },
        None => match parse_enum(&adapter, "backtest", "timeframe", Timeframe::D1) {
            Ok(t) => t,
            Err(e) => return fail(&e),
        },
    };
    let provider = match build_provider(&adapter) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    let instruments = match provider.list_instruments(timeframe) {
        Ok(i) => i,
        Err(e) => return fail(&e),
    };

    if instruments.is_empty() {
        eprintln!("No {} instruments found", timeframe);
        return ExitCode::SUCCESS;
    }
    for id in &instruments {
        match provider.get_data_range(id, timeframe) {
            Ok(Some((first, last, count))) => {
                println!("{id}: {count} bars, {first} to {last}");
            }
            Ok(None) => println!("{id}: no data"),
            Err(e) => eprintln!("error querying {id}: {e}"),
        }
    }
    eprintln!("{} instruments found", instruments.len());
    ExitCode::SUCCESS
}
