//! Instrument value types.

use super::InstrumentError;
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest strike representable in eight digits of thousandths.
const MAX_STRIKE_MILLIS: i64 = 99_999_999;

/// Call or put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    /// Single-letter code used inside option symbols.
    pub fn code(&self) -> char {
        match self {
            OptionType::Call => 'C',
            OptionType::Put => 'P',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'C' => Some(OptionType::Call),
            'P' => Some(OptionType::Put),
            _ => None,
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

impl FromStr for OptionType {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "call" => Ok(OptionType::Call),
            "p" | "put" => Ok(OptionType::Put),
            other => Err(InstrumentError::invalid(format!(
                "unknown option type {other:?}"
            ))),
        }
    }
}

/// A single listed option contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentId {
    /// Underlying ticker, upper-case letters (e.g. "SPY")
    pub underlying: String,
    /// Expiration date
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    /// Strike in currency units, at most 3 decimal places
    #[serde(with = "rust_decimal::serde::str")]
    pub strike: Decimal,
}

impl InstrumentId {
    /// Build a validated instrument. The underlying is upper-cased.
    pub fn new(
        underlying: impl Into<String>,
        expiration: NaiveDate,
        option_type: OptionType,
        strike: Decimal,
    ) -> Result<Self, InstrumentError> {
        let id = Self {
            underlying: underlying.into().trim().to_ascii_uppercase(),
            expiration,
            option_type,
            strike,
        };
        id.validate()?;
        Ok(id)
    }

    /// Check the invariants the symbol grammar relies on.
    pub fn validate(&self) -> Result<(), InstrumentError> {
        validate_underlying(&self.underlying)?;

        if self.strike <= Decimal::ZERO {
            return Err(InstrumentError::invalid(format!(
                "strike must be positive, got {}",
                self.strike
            )));
        }
        let millis = self.strike * Decimal::ONE_THOUSAND;
        if !millis.fract().is_zero() {
            return Err(InstrumentError::invalid(format!(
                "strike {} has more than 3 decimal places",
                self.strike
            )));
        }
        if millis > Decimal::from(MAX_STRIKE_MILLIS) {
            return Err(InstrumentError::invalid(format!(
                "strike {} does not fit in 8 digits",
                self.strike
            )));
        }

        let year = self.expiration.year();
        if !(2000..=2099).contains(&year) {
            return Err(InstrumentError::invalid(format!(
                "expiration year {year} outside 2000-2099"
            )));
        }
        Ok(())
    }

    /// Strike expressed in thousandths, as carried inside the symbol.
    pub fn strike_millis(&self) -> i64 {
        (self.strike * Decimal::ONE_THOUSAND)
            .trunc()
            .to_i64()
            .unwrap_or(0)
    }

    /// True once the contract's expiration date is strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration < today
    }

    /// Calendar days until expiration, zero if already expired.
    pub fn days_to_expiration(&self, today: NaiveDate) -> i64 {
        (self.expiration - today).num_days().max(0)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.underlying, self.expiration, self.strike, self.option_type
        )
    }
}

fn validate_underlying(underlying: &str) -> Result<(), InstrumentError> {
    if underlying.is_empty() {
        return Err(InstrumentError::invalid("underlying symbol is empty"));
    }
    // Decoding splits on the first digit, so digits can never appear here.
    let well_formed = underlying
        .chars()
        .all(|c| c.is_ascii_uppercase() || c == '.')
        && underlying.starts_with(|c: char| c.is_ascii_uppercase())
        && underlying.ends_with(|c: char| c.is_ascii_uppercase());
    if !well_formed {
        return Err(InstrumentError::invalid(format!(
            "underlying {underlying:?} must be upper-case letters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()
    }

    #[test]
    fn test_new_uppercases_underlying() {
        let id = InstrumentId::new(" spy ", expiry(), OptionType::Call, dec!(450)).unwrap();
        assert_eq!(id.underlying, "SPY");
        assert_eq!(id.strike_millis(), 450_000);
    }

    #[test]
    fn test_rejects_non_positive_strike() {
        assert!(InstrumentId::new("SPY", expiry(), OptionType::Put, dec!(0)).is_err());
        assert!(InstrumentId::new("SPY", expiry(), OptionType::Put, dec!(-5)).is_err());
    }

    #[test]
    fn test_rejects_bad_underlying() {
        assert!(InstrumentId::new("", expiry(), OptionType::Call, dec!(10)).is_err());
        assert!(InstrumentId::new("SP1", expiry(), OptionType::Call, dec!(10)).is_err());
        assert!(InstrumentId::new("SPY_", expiry(), OptionType::Call, dec!(10)).is_err());
        assert!(InstrumentId::new("BRK.B", expiry(), OptionType::Call, dec!(10)).is_ok());
    }

    #[test]
    fn test_rejects_unrepresentable_strike() {
        assert!(InstrumentId::new("SPY", expiry(), OptionType::Call, dec!(450.0005)).is_err());
        assert!(InstrumentId::new("SPY", expiry(), OptionType::Call, dec!(100000)).is_err());
        assert!(InstrumentId::new("SPY", expiry(), OptionType::Call, dec!(99999.999)).is_ok());
    }

    #[test]
    fn test_expiry_helpers() {
        let id = InstrumentId::new("SPY", expiry(), OptionType::Call, dec!(450)).unwrap();
        let before = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 3, 22).unwrap();

        assert!(!id.is_expired(before));
        assert!(!id.is_expired(expiry()));
        assert!(id.is_expired(after));
        assert_eq!(id.days_to_expiration(before), 10);
        assert_eq!(id.days_to_expiration(after), 0);
    }

    #[test]
    fn test_option_type_parsing() {
        assert_eq!("CALL".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("p".parse::<OptionType>().unwrap(), OptionType::Put);
        assert!("straddle".parse::<OptionType>().is_err());
        assert_eq!(OptionType::from_code('c'), Some(OptionType::Call));
        assert_eq!(OptionType::from_code('X'), None);
    }
}
