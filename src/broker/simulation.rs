//! Synthetic fills for sandbox testing.
//!
//! Only `BrokerGateway` calls into this module, and only when its
//! configuration allows simulation.

use super::types::{OrderResult, OrderStatus};
use crate::instrument::{InstrumentId, OptionType};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Floor for any simulated premium.
pub const MIN_FILL_PRICE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);

/// Time value per sqrt(month) as a fraction of spot.
const TIME_VALUE_RATE: f64 = 0.02;

/// Multiplicative jitter applied to the heuristic price.
const JITTER: std::ops::RangeInclusive<f64> = 0.9..=1.1;

fn intrinsic_value(instrument: &InstrumentId, spot: Decimal) -> Decimal {
    let value = match instrument.option_type {
        OptionType::Call => spot - instrument.strike,
        OptionType::Put => instrument.strike - spot,
    };
    value.max(Decimal::ZERO)
}

/// Intrinsic value plus a square-root-of-time premium, jittered.
///
/// Without a spot quote the strike stands in for spot (at the money).
pub fn fill_price<R: Rng + ?Sized>(
    instrument: &InstrumentId,
    spot: Option<Decimal>,
    today: NaiveDate,
    rng: &mut R,
) -> Decimal {
    let spot = spot
        .filter(|s| *s > Decimal::ZERO)
        .unwrap_or(instrument.strike);
    let intrinsic = intrinsic_value(instrument, spot).to_f64().unwrap_or(0.0);

    let days = instrument.days_to_expiration(today).max(1) as f64;
    let time_value = spot.to_f64().unwrap_or(0.0) * TIME_VALUE_RATE * (days / 30.0).sqrt();

    let raw = (intrinsic + time_value) * rng.gen_range(JITTER);
    Decimal::from_f64(raw)
        .unwrap_or(Decimal::ZERO)
        .round_dp(2)
        .max(MIN_FILL_PRICE)
}

/// A filled `OrderResult` flagged as simulated.
pub fn simulated_result<R: Rng + ?Sized>(
    instrument: &InstrumentId,
    symbol: &str,
    quantity: u32,
    spot: Option<Decimal>,
    now: DateTime<Utc>,
    rng: &mut R,
) -> OrderResult {
    let price = fill_price(instrument, spot, now.date_naive(), rng);
    OrderResult {
        order_id: format!("SIM-{}-{:04x}", now.timestamp_millis(), rng.gen::<u16>()),
        status: OrderStatus::Filled,
        symbol: symbol.to_string(),
        fill_price: Some(price),
        filled_quantity: quantity,
        filled_at: Some(now),
        simulated: true,
        reason: Some("simulated sandbox fill".to_string()),
    }
}
