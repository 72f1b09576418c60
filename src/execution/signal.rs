//! Directional trading signals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What the signal source wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    BuyCall,
    BuyPut,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::BuyCall => "BUY_CALL",
            Signal::BuyPut => "BUY_PUT",
            Signal::Sell => "SELL",
            Signal::Hold => "HOLD",
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, Signal::BuyCall | Signal::BuyPut)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "BUY_CALL" => Ok(Signal::BuyCall),
            "BUY_PUT" => Ok(Signal::BuyPut),
            "SELL" | "SELL_CALL" | "SELL_PUT" => Ok(Signal::Sell),
            "HOLD" => Ok(Signal::Hold),
            other => Err(format!("unknown signal: {other}")),
        }
    }
}

/// A signal with its underlying and confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub signal: Signal,
    pub underlying: String,
    pub confidence: Decimal,
}

impl TradingSignal {
    pub fn new(signal: Signal, underlying: impl Into<String>, confidence: Decimal) -> Self {
        Self {
            signal,
            underlying: underlying.into().trim().to_ascii_uppercase(),
            confidence,
        }
    }
}
