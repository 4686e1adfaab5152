//! CSV results sink: one row per closed trade, plus a `metric,value`
//! summary table.

use crate::domain::error::KlinetraderError;
use crate::domain::metrics::Summary;
use crate::domain::position::TradeRecord;
use crate::ports::results_port::ResultsPort;
use std::io::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LEDGER_HEADER: [&str; 15] = [
    "instrument",
    "side",
    "entry_time",
    "entry_price",
    "average_entry_price",
    "add_position_used",
    "exit_time",
    "exit_price",
    "exit_reason",
    "margin",
    "leverage",
    "realized_pnl",
    "realized_pnl_pct",
    "hold_hours",
    "max_adverse_excursion",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvLedgerAdapter;

impl CsvLedgerAdapter {
    pub fn new() -> Self {
        Self
    }
}

fn csv_err(e: csv::Error) -> KlinetraderError {
    KlinetraderError::Io(std::io::Error::other(e))
}

impl ResultsPort for CsvLedgerAdapter {
    fn write_ledger(
        &self,
        trades: &[TradeRecord],
        out: &mut dyn Write,
    ) -> Result<(), KlinetraderError> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(LEDGER_HEADER).map_err(csv_err)?;
        for t in trades {
            wtr.write_record([
                t.instrument.clone(),
                t.side.to_string(),
                t.entry_time.format(TIME_FORMAT).to_string(),
                t.entry_price.to_string(),
                t.average_entry_price.to_string(),
                t.add_position_used.to_string(),
                t.exit_time.format(TIME_FORMAT).to_string(),
                t.exit_price.to_string(),
                t.exit_reason.to_string(),
                t.margin.to_string(),
                t.leverage.to_string(),
                format!("{:.8}", t.realized_pnl),
                format!("{:.8}", t.realized_pnl_pct),
                format!("{:.2}", t.hold_duration.num_minutes() as f64 / 60.0),
                format!("{:.8}", t.max_adverse_excursion),
            ])
            .map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_summary(
        &self,
        summary: &Summary,
        out: &mut dyn Write,
    ) -> Result<(), KlinetraderError> {
        let mut rows: Vec<(String, String)> = vec![
            ("total_trades".into(), summary.total_trades.to_string()),
            ("wins".into(), summary.wins.to_string()),
            ("losses".into(), summary.losses.to_string()),
            ("breakeven".into(), summary.breakeven.to_string()),
            ("win_rate".into(), format!("{:.6}", summary.win_rate)),
            ("final_balance".into(), format!("{:.8}", summary.final_balance)),
            ("total_return".into(), format!("{:.6}", summary.total_return)),
            ("profit_factor".into(), format!("{:.6}", summary.profit_factor)),
            ("max_drawdown".into(), format!("{:.6}", summary.max_drawdown)),
            ("avg_win".into(), format!("{:.8}", summary.avg_win)),
            ("avg_loss".into(), format!("{:.8}", summary.avg_loss)),
            ("largest_win".into(), format!("{:.8}", summary.largest_win)),
            ("largest_loss".into(), format!("{:.8}", summary.largest_loss)),
            ("avg_hold_hours".into(), format!("{:.2}", summary.avg_hold_hours)),
            ("adds_used".into(), summary.adds_used.to_string()),
        ];
        for (reason, count) in &summary.exits_by_reason {
            rows.push((format!("exits_{reason}"), count.to_string()));
        }

        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record(["metric", "value"]).map_err(csv_err)?;
        for (metric, value) in rows {
            wtr.write_record([metric, value]).map_err(csv_err)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
