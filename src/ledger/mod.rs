//! Position and day-trade bookkeeping.
//!
//! Tracks open option positions and same-day round trips so the pattern day
//! trader limit can be enforced:
//! - Open/partial/close lifecycle per symbol
//! - Day-trade detection on the trading-calendar date
//! - Rolling-window eviction of old day trades
//! - Full JSON snapshot after every mutation, reloaded at startup

mod position_ledger;
mod store;
mod types;

pub use position_ledger::{LedgerConfig, PositionLedger};
pub use store::SnapshotStore;
pub use types::{DayTradeRecord, DayTradeSummary, LedgerSnapshot, PdtStatus, Position};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Opens and closes must move at least one contract.
    #[error("invalid quantity for {symbol}: {contracts} contracts")]
    InvalidQuantity { symbol: String, contracts: u32 },

    /// Snapshot could not be read or written.
    #[error("ledger persistence failed at {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },
}
