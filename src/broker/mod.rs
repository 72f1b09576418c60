//! Brokerage integration.
//!
//! ## Layers
//! - `BrokerApi`: one HTTP round trip per call, no retries
//! - `TradierClient`: `BrokerApi` over the Tradier-style REST API
//! - `BrokerGateway`: retry/backoff, instrument validation against the live
//!   chain, and sandbox-only simulated fills on top of any `BrokerApi`

mod api;
mod client;
mod error;
mod gateway;
mod retry;
pub mod simulation;
mod types;

pub use api::BrokerApi;
pub use client::TradierClient;
pub use error::GatewayError;
pub use gateway::{BrokerGateway, Resolution};
pub use retry::{CancelToken, RetryPolicy};
pub use types::*;

#[cfg(test)]
pub use api::MockBrokerApi;
