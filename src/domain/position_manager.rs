//! Account balance, open positions and the trade ledger.
//!
//! [`PositionManager`] is the only writer of cash, the open-position set and
//! the ledger. Everything else reads through shared references or calls the
//! mutating operations below.

use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use super::error::KlinetraderError;
use super::position::{ExitReason, Position, Side, TradeRecord, favorable_move};
use super::risk_params::RiskParams;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountState {
    pub cash_balance: f64,
    /// Cash plus margin and unrealized P&L of open positions at their last mark.
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub time: NaiveDateTime,
    pub equity: f64,
}

#[derive(Debug, Clone)]
pub struct PositionManager {
    initial_capital: f64,
    account: AccountState,
    positions: BTreeMap<String, Position>,
    marks: BTreeMap<String, f64>,
    ledger: Vec<TradeRecord>,
}

impl PositionManager {
    pub fn new(initial_capital: f64) -> Self {
        PositionManager {
            initial_capital,
            account: AccountState {
                cash_balance: initial_capital,
                equity: initial_capital,
            },
            positions: BTreeMap::new(),
            marks: BTreeMap::new(),
            ledger: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn account(&self) -> AccountState {
        self.account
    }

    pub fn cash(&self) -> f64 {
        self.account.cash_balance
    }

    pub fn get(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn is_open(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Open positions in instrument-id order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_instruments(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn last_mark(&self, instrument: &str) -> Option<f64> {
        self.marks.get(instrument).copied()
    }

    pub fn ledger(&self) -> &[TradeRecord] {
        &self.ledger
    }

    /// Open a position posting `size_ratio` of current cash as margin.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &mut self,
        instrument: &str,
        side: Side,
        price: f64,
        time: NaiveDateTime,
        size_ratio: f64,
        risk: &RiskParams,
        signal_pct_chg: f64,
    ) -> Result<&Position, KlinetraderError> {
        if self.positions.contains_key(instrument) {
            return Err(KlinetraderError::DuplicatePosition {
                instrument: instrument.to_string(),
            });
        }

        let cash = self.account.cash_balance;
        let margin = size_ratio * cash;
        if !(margin > 0.0) || margin > cash {
            return Err(KlinetraderError::InsufficientBalance {
                required: margin,
                available: cash,
            });
        }

        self.account.cash_balance -= margin;

        let position = Position {
            instrument: instrument.to_string(),
            side,
            entry_price: price,
            entry_time: time,
            margin,
            leverage: risk.leverage,
            has_added: false,
            add_price: None,
            add_margin: 0.0,
            average_entry_price: price,
            take_profit_pct: risk.take_profit_pct,
            stop_loss_pct: risk.stop_loss_pct,
            add_trigger_pct: risk.add_trigger_pct,
            signal_entry_pct_chg: signal_pct_chg,
            max_adverse_excursion: 0.0,
        };

        debug!(
            instrument,
            %side,
            price,
            margin,
            leverage = risk.leverage,
            "opened position"
        );

        self.marks.insert(instrument.to_string(), price);
        self.positions.insert(instrument.to_string(), position);
        self.recompute_equity();
        Ok(&self.positions[instrument])
    }

    /// Add to a position once, posting `add_size_ratio` times the entry margin.
    pub fn add(
        &mut self,
        instrument: &str,
        price: f64,
        time: NaiveDateTime,
        add_size_ratio: f64,
    ) -> Result<&Position, KlinetraderError> {
        let cash = self.account.cash_balance;
        let position =
            self.positions
                .get_mut(instrument)
                .ok_or_else(|| KlinetraderError::PositionNotOpen {
                    instrument: instrument.to_string(),
                })?;

        if position.has_added {
            return Err(KlinetraderError::AlreadyAdded {
                instrument: instrument.to_string(),
            });
        }

        let add_margin = add_size_ratio * position.margin;
        if !(add_margin > 0.0) || add_margin > cash {
            return Err(KlinetraderError::InsufficientBalance {
                required: add_margin,
                available: cash,
            });
        }

        let total = position.margin + add_margin;
        position.average_entry_price =
            (position.entry_price * position.margin + price * add_margin) / total;
        position.has_added = true;
        position.add_price = Some(price);
        position.add_margin = add_margin;

        debug!(
            instrument,
            price,
            add_margin,
            average = position.average_entry_price,
            %time,
            "added to position"
        );

        self.account.cash_balance -= add_margin;
        self.marks.insert(instrument.to_string(), price);
        self.recompute_equity();
        Ok(&self.positions[instrument])
    }

    /// Close a position at `price`, realize P&L and append it to the ledger.
    ///
    /// Losses are capped at the posted margin.
    pub fn close(
        &mut self,
        instrument: &str,
        price: f64,
        time: NaiveDateTime,
        reason: ExitReason,
    ) -> Result<TradeRecord, KlinetraderError> {
        let position =
            self.positions
                .remove(instrument)
                .ok_or_else(|| KlinetraderError::PositionNotOpen {
                    instrument: instrument.to_string(),
                })?;
        self.marks.remove(instrument);

        let margin = position.total_margin();
        let realized_pnl = position.unrealized_pnl(price);
        let realized_pnl_pct = if margin > 0.0 {
            realized_pnl / margin
        } else {
            0.0
        };
        let adverse = favorable_move(position.side, position.reference_price(), price).min(0.0);

        self.account.cash_balance += margin + realized_pnl;

        let record = TradeRecord {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            average_entry_price: position.average_entry_price,
            add_position_used: position.has_added,
            exit_time: time,
            exit_price: price,
            exit_reason: reason,
            margin,
            realized_pnl,
            realized_pnl_pct,
            leverage: position.leverage,
            hold_duration: time - position.entry_time,
            max_adverse_excursion: position.max_adverse_excursion.min(adverse),
        };

        debug!(
            instrument,
            price,
            %reason,
            pnl = realized_pnl,
            cash = self.account.cash_balance,
            "closed position"
        );

        self.ledger.push(record.clone());
        self.recompute_equity();
        Ok(record)
    }

    /// Close every open position at its final price, tagged `forced`.
    ///
    /// `price_lookup` returning `None` falls back to the last mark, then to
    /// the average entry (flat P&L).
    pub fn force_close_all<F>(
        &mut self,
        price_lookup: F,
        time: NaiveDateTime,
    ) -> Result<Vec<TradeRecord>, KlinetraderError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let instruments: Vec<String> = self.positions.keys().cloned().collect();
        let mut records = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let price = price_lookup(&instrument)
                .or_else(|| self.last_mark(&instrument))
                .or_else(|| self.get(&instrument).map(|p| p.average_entry_price))
                .unwrap_or(0.0);
            records.push(self.close(&instrument, price, time, ExitReason::Forced)?);
        }
        Ok(records)
    }

    /// Record the latest price for a position and track its adverse excursion.
    pub fn mark(&mut self, instrument: &str, price: f64) {
        let Some(position) = self.positions.get_mut(instrument) else {
            return;
        };
        let mv = position.move_pct(price);
        if mv < position.max_adverse_excursion {
            position.max_adverse_excursion = mv;
        }
        self.marks.insert(instrument.to_string(), price);
        self.recompute_equity();
    }

    /// Mark every open position that has a price in `prices`.
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, f64>) {
        for (instrument, &price) in prices {
            self.mark(instrument, price);
        }
    }

    fn recompute_equity(&mut self) {
        let open_value: f64 = self
            .positions
            .values()
            .map(|pos| {
                let price = self
                    .marks
                    .get(&pos.instrument)
                    .copied()
                    .unwrap_or(pos.average_entry_price);
                pos.total_margin() + pos.unrealized_pnl(price)
            })
            .sum();
        self.account.equity = self.account.cash_balance + open_value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn t(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn risk() -> RiskParams {
        RiskParams {
            leverage: 10.0,
            take_profit_pct: 0.10,
            stop_loss_pct: -0.18,
            add_trigger_pct: -0.18,
            entry_delay_pct: 0.02,
        }
    }

    #[test]
    fn new_manager() {
        let pm = PositionManager::new(10_000.0);
        assert_eq!(pm.cash(), 10_000.0);
        assert_eq!(pm.account().equity, 10_000.0);
        assert_eq!(pm.position_count(), 0);
        assert!(pm.ledger().is_empty());
    }

    #[test]
    fn create_debits_margin() {
        let mut pm = PositionManager::new(10_000.0);
        let pos = pm
            .create("BTCUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        assert_relative_eq!(pos.margin, 1_000.0);
        assert_relative_eq!(pos.notional(), 10_000.0);
        assert_relative_eq!(pm.cash(), 9_000.0);
        assert_relative_eq!(pm.account().equity, 10_000.0);
        assert!(pm.is_open("BTCUSDT"));
    }

    #[test]
    fn create_duplicate_fails() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("BTCUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        let err = pm
            .create("BTCUSDT", Side::Short, 101.0, t(2), 0.1, &risk(), 0.3)
            .unwrap_err();
        assert!(matches!(err, KlinetraderError::DuplicatePosition { instrument } if instrument == "BTCUSDT"));
        assert_eq!(pm.position_count(), 1);
    }

    #[test]
    fn create_beyond_balance_fails() {
        let mut pm = PositionManager::new(10_000.0);
        let err = pm
            .create("BTCUSDT", Side::Long, 100.0, t(1), 1.5, &risk(), -0.3)
            .unwrap_err();
        assert!(matches!(err, KlinetraderError::InsufficientBalance { .. }));
        assert_eq!(pm.cash(), 10_000.0);
        assert!(!pm.is_open("BTCUSDT"));
    }

    #[test]
    fn create_with_zero_cash_fails() {
        let mut pm = PositionManager::new(0.0);
        let err = pm
            .create("BTCUSDT", Side::Long, 100.0, t(1), 0.5, &risk(), -0.3)
            .unwrap_err();
        assert!(matches!(err, KlinetraderError::InsufficientBalance { .. }));
    }

    #[test]
    fn add_recomputes_weighted_average() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("ETHUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        let pos = pm.add("ETHUSDT", 118.0, t(2), 1.0).unwrap();
        assert!(pos.has_added);
        assert_eq!(pos.add_price, Some(118.0));
        assert_relative_eq!(pos.average_entry_price, 109.0);
        assert_relative_eq!(pm.cash(), 8_000.0);
    }

    #[test]
    fn add_average_uses_size_weights() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("ETHUSDT", Side::Long, 100.0, t(1), 0.1, &risk(), -0.3)
            .unwrap();
        let pos = pm.add("ETHUSDT", 80.0, t(2), 0.5).unwrap();
        // (100 * 1000 + 80 * 500) / 1500
        assert_relative_eq!(pos.average_entry_price, 140_000.0 / 1_500.0);
        assert!(pos.average_entry_price > 80.0 && pos.average_entry_price < 100.0);
    }

    #[test]
    fn add_twice_fails() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("ETHUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        pm.add("ETHUSDT", 118.0, t(2), 1.0).unwrap();
        let err = pm.add("ETHUSDT", 125.0, t(3), 1.0).unwrap_err();
        assert!(matches!(err, KlinetraderError::AlreadyAdded { .. }));
        assert_relative_eq!(pm.cash(), 8_000.0);
    }

    #[test]
    fn add_beyond_balance_fails_and_leaves_position_unchanged() {
        let mut pm = PositionManager::new(1_000.0);
        pm.create("ETHUSDT", Side::Short, 100.0, t(1), 0.9, &risk(), 0.3)
            .unwrap();
        let err = pm.add("ETHUSDT", 118.0, t(2), 1.0).unwrap_err();
        assert!(matches!(err, KlinetraderError::InsufficientBalance { .. }));
        let pos = pm.get("ETHUSDT").unwrap();
        assert!(!pos.has_added);
        assert_relative_eq!(pos.average_entry_price, 100.0);
    }

    #[test]
    fn close_short_take_profit_realizes_levered_pnl() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("XUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        let record = pm.close("XUSDT", 90.0, t(3), ExitReason::TakeProfit).unwrap();
        // +10% * 10x = +100% of margin
        assert_relative_eq!(record.realized_pnl, 1_000.0, epsilon = 1e-9);
        assert_relative_eq!(record.realized_pnl_pct, 1.0, epsilon = 1e-12);
        assert_relative_eq!(pm.cash(), 11_000.0, epsilon = 1e-9);
        assert_eq!(record.hold_duration, chrono::Duration::days(2));
        assert_eq!(pm.ledger().len(), 1);
        assert!(!pm.is_open("XUSDT"));
    }

    #[test]
    fn close_long_sign_flipped() {
        let mut pm = PositionManager::new(10_000.0);
        let params = RiskParams {
            leverage: 2.0,
            ..risk()
        };
        pm.create("XUSDT", Side::Long, 100.0, t(1), 0.5, &params, -0.3)
            .unwrap();
        let record = pm.close("XUSDT", 90.0, t(2), ExitReason::StopLoss).unwrap();
        assert_relative_eq!(record.realized_pnl, -1_000.0, epsilon = 1e-9);
        assert_relative_eq!(pm.cash(), 9_000.0, epsilon = 1e-9);
    }

    #[test]
    fn close_loss_capped_at_margin() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("XUSDT", Side::Short, 100.0, t(1), 0.5, &risk(), 0.3)
            .unwrap();
        let record = pm.close("XUSDT", 150.0, t(2), ExitReason::StopLoss).unwrap();
        assert_relative_eq!(record.realized_pnl, -5_000.0, epsilon = 1e-9);
        assert_relative_eq!(pm.cash(), 5_000.0, epsilon = 1e-9);
        assert!(pm.cash() >= 0.0);
    }

    #[test]
    fn close_twice_fails() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("XUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        pm.close("XUSDT", 95.0, t(2), ExitReason::Timeout).unwrap();
        let err = pm
            .close("XUSDT", 95.0, t(2), ExitReason::Timeout)
            .unwrap_err();
        assert!(matches!(err, KlinetraderError::PositionNotOpen { .. }));
        assert_eq!(pm.ledger().len(), 1);
    }

    #[test]
    fn force_close_all_closes_each_once() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("BBB", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        pm.create("AAA", Side::Long, 50.0, t(1), 0.1, &risk(), -0.3)
            .unwrap();
        pm.mark("BBB", 97.0);

        let records = pm
            .force_close_all(|i| if i == "AAA" { Some(55.0) } else { None }, t(9))
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instrument, "AAA");
        assert_eq!(records[1].instrument, "BBB");
        assert!(records.iter().all(|r| r.exit_reason == ExitReason::Forced));
        assert_eq!(records[0].exit_price, 55.0);
        // falls back to last mark
        assert_eq!(records[1].exit_price, 97.0);
        assert_eq!(pm.position_count(), 0);
        assert_eq!(pm.ledger().len(), 2);
        assert!(pm.force_close_all(|_| None, t(10)).unwrap().is_empty());
    }

    #[test]
    fn mark_tracks_adverse_excursion_and_equity() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("XUSDT", Side::Short, 100.0, t(1), 0.1, &risk(), 0.3)
            .unwrap();
        pm.mark("XUSDT", 105.0);
        pm.mark("XUSDT", 102.0);
        let pos = pm.get("XUSDT").unwrap();
        assert_relative_eq!(pos.max_adverse_excursion, -0.05, epsilon = 1e-12);
        // cash 9000 + margin 1000 + (-2% * 10 * 1000)
        assert_relative_eq!(pm.account().equity, 9_800.0, epsilon = 1e-9);
    }

    #[test]
    fn mark_to_market_ignores_unknown_instruments() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("XUSDT", Side::Long, 100.0, t(1), 0.1, &risk(), -0.3)
            .unwrap();
        let prices: BTreeMap<String, f64> =
            [("XUSDT".to_string(), 101.0), ("ZUSDT".to_string(), 5.0)]
                .into_iter()
                .collect();
        pm.mark_to_market(&prices);
        assert_eq!(pm.last_mark("XUSDT"), Some(101.0));
        assert_eq!(pm.last_mark("ZUSDT"), None);
        // +1% * 10x on 1000 margin
        assert_relative_eq!(pm.account().equity, 10_100.0, epsilon = 1e-9);
    }

    #[test]
    fn ledger_replay_matches_cash() {
        let mut pm = PositionManager::new(10_000.0);
        pm.create("AAA", Side::Short, 100.0, t(1), 0.2, &risk(), 0.3)
            .unwrap();
        pm.create("BBB", Side::Long, 10.0, t(1), 0.2, &risk(), -0.3)
            .unwrap();
        pm.add("AAA", 110.0, t(2), 1.0).unwrap();
        pm.close("AAA", 104.0, t(3), ExitReason::TakeProfit).unwrap();
        pm.close("BBB", 9.5, t(4), ExitReason::Timeout).unwrap();
        let replay: f64 =
            pm.initial_capital() + pm.ledger().iter().map(|r| r.realized_pnl).sum::<f64>();
        assert_relative_eq!(replay, pm.cash(), epsilon = 1e-9);
    }
}
