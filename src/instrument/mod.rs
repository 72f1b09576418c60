//! Option instrument identifiers.
//!
//! - `InstrumentId`: underlying, expiration, call/put, strike
//! - `SymbolCodec`: conversion to and from a broker's symbol grammar
//! - `OccCodec`: the OCC-style `UNDERLYING YYMMDD C|P STRIKE*1000` grammar

mod codec;
mod types;

pub use codec::{OccCodec, SymbolCodec, MIN_SYMBOL_LEN};
pub use types::{InstrumentId, OptionType};

use thiserror::Error;

/// Errors raised while building, encoding or decoding instruments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    /// The instrument fields cannot form a valid contract.
    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    /// A symbol string did not match the codec's grammar.
    #[error("cannot decode option symbol {symbol:?}: {reason}")]
    Decode { symbol: String, reason: String },
}

impl InstrumentError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInstrument(reason.into())
    }

    pub(crate) fn decode(symbol: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }
}
