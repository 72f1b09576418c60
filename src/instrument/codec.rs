//! Symbol grammars.

use super::{InstrumentError, InstrumentId, OptionType};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Minimum length of an OCC-style suffix: YYMMDD + type + 8 strike digits.
pub const MIN_SYMBOL_LEN: usize = 15;

/// Converts instruments to and from a broker's symbol strings.
///
/// Brokers with a different grammar supply their own implementation; the
/// ledger and gateway only ever talk to this trait.
pub trait SymbolCodec: Send + Sync {
    fn encode(&self, id: &InstrumentId) -> Result<String, InstrumentError>;

    fn decode(&self, symbol: &str) -> Result<InstrumentId, InstrumentError>;
}

/// OCC-style grammar: `SPY250321C00450000`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OccCodec;

impl SymbolCodec for OccCodec {
    fn encode(&self, id: &InstrumentId) -> Result<String, InstrumentError> {
        id.validate()?;
        Ok(format!(
            "{}{}{}{:08}",
            id.underlying,
            id.expiration.format("%y%m%d"),
            id.option_type.code(),
            id.strike_millis()
        ))
    }

    fn decode(&self, symbol: &str) -> Result<InstrumentId, InstrumentError> {
        let split = symbol
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| InstrumentError::decode(symbol, "no date digits"))?;
        let (prefix, suffix) = symbol.split_at(split);

        let underlying = prefix
            .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        if underlying.is_empty() {
            return Err(InstrumentError::decode(symbol, "missing underlying"));
        }

        if !suffix.is_ascii() || suffix.len() < MIN_SYMBOL_LEN {
            return Err(InstrumentError::decode(
                symbol,
                format!(
                    "suffix {suffix:?} shorter than {MIN_SYMBOL_LEN} characters"
                ),
            ));
        }

        let expiration = parse_date(symbol, &suffix[0..6])?;

        let type_code = suffix[6..7].chars().next().unwrap_or(' ');
        let option_type = OptionType::from_code(type_code).ok_or_else(|| {
            InstrumentError::decode(symbol, format!("unknown option type {type_code:?}"))
        })?;

        let strike_digits = &suffix[7..];
        if !strike_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InstrumentError::decode(
                symbol,
                format!("non-numeric strike {strike_digits:?}"),
            ));
        }
        let millis: i64 = strike_digits
            .parse()
            .map_err(|_| InstrumentError::decode(symbol, "strike out of range"))?;
        let strike = Decimal::new(millis, 3);

        InstrumentId::new(underlying, expiration, option_type, strike)
            .map_err(|e| InstrumentError::decode(symbol, e.to_string()))
    }
}

fn parse_date(symbol: &str, digits: &str) -> Result<NaiveDate, InstrumentError> {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InstrumentError::decode(
            symbol,
            format!("non-numeric date {digits:?}"),
        ));
    }
    let field = |range: std::ops::Range<usize>| digits[range].parse::<u32>().unwrap_or(0);
    let (yy, mm, dd) = (field(0..2), field(2..4), field(4..6));

    NaiveDate::from_ymd_opt(2000 + yy as i32, mm, dd)
        .ok_or_else(|| InstrumentError::decode(symbol, format!("invalid date {digits:?}")))
}
