//! Core domain types and backtest logic.

pub mod kline;
pub mod position;
pub mod risk_params;
pub mod scanner;
pub mod delayed_entry;
pub mod position_manager;
pub mod exit;
pub mod risk_gate;
pub mod sizing;
pub mod series;
pub mod backtest;
pub mod metrics;
pub mod sweep;
pub mod universe;
pub mod config_validation;
pub mod error;
