//! # Options Autotrader
//!
//! Execution and compliance layer for automated options trading through a
//! Tradier-style brokerage.
//!
//! ## Architecture
//!
//! - `instrument`: Option contract identifiers and the OCC symbol codec
//! - `ledger`: Open positions and pattern-day-trader bookkeeping
//! - `broker`: Brokerage client, retries, chain validation, sandbox fills
//! - `execution`: Signal handling from market gate to ledger update
//! - `journal`: SQLite history of execution outcomes
//! - `market_hours`: Regular-session gate
//! - `clock`: Injectable time source
//! - `config`: Configuration management and validation

pub mod broker;
pub mod clock;
pub mod config;
pub mod execution;
pub mod instrument;
pub mod journal;
pub mod ledger;
pub mod market_hours;

pub use config::Config;
