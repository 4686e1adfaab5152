//! Results sink port.

use crate::domain::error::KlinetraderError;
use crate::domain::metrics::Summary;
use crate::domain::position::TradeRecord;
use std::io::Write;

/// Writes a finished run's trade ledger and summary.
pub trait ResultsPort {
    fn write_ledger(
        &self,
        trades: &[TradeRecord],
        out: &mut dyn Write,
    ) -> Result<(), KlinetraderError>;

    fn write_summary(&self, summary: &Summary, out: &mut dyn Write)
    -> Result<(), KlinetraderError>;
}
