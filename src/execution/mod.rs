//! Signal execution.
//!
//! `ExecutionCoordinator` gates each signal on market hours and contract
//! shape, decides time-in-force from the day-trade allowance, places the
//! order through `BrokerGateway` and records the fill in the ledger.

mod coordinator;
mod signal;

pub use coordinator::{
    size_position, CoordinatorSettings, ExecutionCoordinator, ExecutionOutcome, ExecutionReport,
    ExecutionRequest, SkipReason,
};
pub use signal::{Signal, TradingSignal};
