//! Ledger records and the persisted snapshot layout.

use crate::instrument::InstrumentId;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An open option position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Contract symbol as traded
    pub symbol: String,
    pub contracts: u32,
    /// Time of the first open; later opens merge into this entry
    pub entry_time: DateTime<Utc>,
    /// Total premium paid for the contracts still held
    #[serde(with = "rust_decimal::serde::str")]
    pub cost_basis: Decimal,
    /// Parsed contract, when the symbol decodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentId>,
    /// Broker order id while the opening order is not yet confirmed filled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_order: Option<String>,
}

/// A same-day open and close of one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTradeRecord {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub contracts: u32,
}

/// Everything the ledger persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub day_trades: Vec<DayTradeRecord>,
}

/// Day-trade allowance derived from the non-expired records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdtStatus {
    pub day_trade_count: usize,
    pub max_day_trades: u32,
    pub remaining: u32,
    pub can_day_trade: bool,
    pub window_days: u32,
    pub recent: Vec<DayTradeSummary>,
}

/// One day trade as shown in status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayTradeSummary {
    pub symbol: String,
    pub exit_date: NaiveDate,
    /// Whole days until this record leaves the window
    pub days_to_clear: i64,
}
