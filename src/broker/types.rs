//! Brokerage wire types and order domain types.

use crate::instrument::{InstrumentId, OptionType};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ==================== Wire helpers ====================

/// Tradier returns a bare object for single results and `"null"` (or JSON
/// null) for empty collections.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Many(Vec<T>),
    One(T),
    Empty(serde_json::Value),
}

pub(crate) fn listing<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Listing::<T>::deserialize(deserializer)? {
        Listing::Many(items) => items,
        Listing::One(item) => vec![item],
        Listing::Empty(_) => Vec::new(),
    })
}

/// A container that may be replaced by `"null"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Present(T),
    Absent(serde_json::Value),
}

pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Lenient::<T>::deserialize(deserializer)? {
        Lenient::Present(value) => Some(value),
        Lenient::Absent(_) => None,
    })
}

/// Order ids arrive as numbers; keep them as strings.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Number(n) => n.to_string(),
        Repr::Text(s) => s,
    })
}

// ==================== Market data ====================

/// Latest quote for a symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
}

impl Quote {
    /// Last trade, or the bid/ask midpoint when there is no last.
    pub fn price(&self) -> Option<Decimal> {
        self.last.filter(|p| *p > Decimal::ZERO).or_else(|| {
            match (self.bid, self.ask) {
                (Some(bid), Some(ask)) if bid > Decimal::ZERO && ask > Decimal::ZERO => {
                    Some((bid + ask) / Decimal::TWO)
                }
                _ => None,
            }
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuotesEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    pub quotes: Option<QuotesBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QuotesBody {
    #[serde(default, deserialize_with = "listing")]
    pub quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExpirationsEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    pub expirations: Option<ExpirationsBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExpirationsBody {
    #[serde(default, deserialize_with = "listing")]
    pub date: Vec<NaiveDate>,
}

/// One listed contract from an option chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptionContract {
    pub symbol: String,
    #[serde(default)]
    pub underlying: Option<String>,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiration_date: NaiveDate,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub last: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChainEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    pub options: Option<ChainBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChainBody {
    #[serde(default, deserialize_with = "listing")]
    pub option: Vec<OptionContract>,
}

/// Calls and puts for one underlying and expiration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionChain {
    pub underlying: String,
    pub expiration: Option<NaiveDate>,
    pub calls: Vec<OptionContract>,
    pub puts: Vec<OptionContract>,
}

impl OptionChain {
    /// Split a flat contract list by type.
    pub fn from_contracts(
        underlying: &str,
        expiration: NaiveDate,
        contracts: Vec<OptionContract>,
    ) -> Self {
        let (calls, puts) = contracts
            .into_iter()
            .filter(|c| c.expiration_date == expiration)
            .partition(|c| c.option_type == OptionType::Call);
        Self {
            underlying: underlying.to_string(),
            expiration: Some(expiration),
            calls,
            puts,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }

    pub fn side(&self, option_type: OptionType) -> &[OptionContract] {
        match option_type {
            OptionType::Call => &self.calls,
            OptionType::Put => &self.puts,
        }
    }

    /// Contract with exactly this symbol.
    pub fn find(&self, option_type: OptionType, symbol: &str) -> Option<&OptionContract> {
        self.side(option_type).iter().find(|c| c.symbol == symbol)
    }

    /// Contract of the given type with the smallest strike distance.
    /// Ties go to the first listed.
    pub fn nearest_strike(
        &self,
        option_type: OptionType,
        strike: Decimal,
    ) -> Option<&OptionContract> {
        self.side(option_type)
            .iter()
            .min_by_key(|c| (c.strike - strike).abs())
    }
}

// ==================== Account ====================

/// Account balance information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Balances {
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub total_equity: Decimal,
    #[serde(default)]
    pub total_cash: Decimal,
    #[serde(default)]
    pub market_value: Decimal,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BalancesEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    pub balances: Option<Balances>,
}

/// A position as the broker reports it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    #[serde(default)]
    pub cost_basis: Decimal,
    #[serde(default)]
    pub date_acquired: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PositionsEnvelope {
    #[serde(default, deserialize_with = "lenient")]
    pub positions: Option<PositionsBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PositionsBody {
    #[serde(default, deserialize_with = "listing")]
    pub position: Vec<BrokerPosition>,
}

// ==================== Orders ====================

/// Order side for option orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    BuyToOpen,
    BuyToClose,
    SellToOpen,
    SellToClose,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::BuyToOpen => "buy_to_open",
            OrderSide::BuyToClose => "buy_to_close",
            OrderSide::SellToOpen => "sell_to_open",
            OrderSide::SellToClose => "sell_to_close",
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self, OrderSide::BuyToOpen | OrderSide::SellToOpen)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long an order stays working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    /// Good-till-canceled
    Gtc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
        }
    }
}

/// Market or limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

/// The contract an order refers to, parsed or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderInstrument {
    Id(InstrumentId),
    Raw(String),
}

/// An order as the caller asks for it.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub instrument: OrderInstrument,
    pub side: OrderSide,
    pub quantity: u32,
    pub limit_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
}

/// A fully resolved order as sent over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub underlying: String,
    pub option_symbol: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub duration: TimeInForce,
}

impl OrderTicket {
    /// Form fields for the order endpoint.
    pub fn form(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("class", "option".to_string()),
            ("symbol", self.underlying.clone()),
            ("option_symbol", self.option_symbol.clone()),
            ("side", self.side.as_str().to_string()),
            ("quantity", self.quantity.to_string()),
            ("type", self.order_type.as_str().to_string()),
            ("duration", self.duration.as_str().to_string()),
        ];
        if let Some(price) = self.price {
            fields.push(("price", price.to_string()));
        }
        fields
    }
}

/// Broker acknowledgement of a placed order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderAckEnvelope {
    #[serde(default)]
    pub order: Option<OrderAck>,
    #[serde(default)]
    pub errors: Option<serde_json::Value>,
}

/// Broker view of an order's progress.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub option_symbol: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    #[serde(default)]
    pub exec_quantity: Option<Decimal>,
    #[serde(default)]
    pub reason_description: Option<String>,
    /// Time of the last execution
    #[serde(default)]
    pub transaction_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrderDetailEnvelope {
    pub order: OrderDetail,
}

/// Coarse order outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Filled,
    Pending,
    Rejected,
}

impl OrderStatus {
    /// Map a broker status string.
    pub fn from_broker(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "filled" => OrderStatus::Filled,
            "rejected" | "canceled" | "cancelled" | "expired" | "error" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Filled => "filled",
            OrderStatus::Pending => "pending",
            OrderStatus::Rejected => "rejected",
        }
    }
}

/// Outcome of a placed order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResult {
    pub order_id: String,
    pub status: OrderStatus,
    /// Contract symbol the order was placed for
    pub symbol: String,
    pub fill_price: Option<Decimal>,
    pub filled_quantity: u32,
    /// When the broker reports the fill happened
    pub filled_at: Option<DateTime<Utc>>,
    /// True when the fill was synthesized by a sandbox gateway
    pub simulated: bool,
    pub reason: Option<String>,
}

/// The broker did not list the requested contract, so the nearest strike
/// was traded instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    pub requested: String,
    pub substituted: String,
    pub requested_strike: Decimal,
    pub substituted_strike: Decimal,
}

/// Result of `BrokerGateway::place_order`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub result: OrderResult,
    /// Contract actually traded
    pub instrument: InstrumentId,
    pub substitution: Option<Substitution>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_single_quote_object_becomes_list() {
        let envelope: QuotesEnvelope = serde_json::from_str(
            r#"{"quotes":{"quote":{"symbol":"SPY","last":451.25,"bid":451.2,"ask":451.3}}}"#,
        )
        .unwrap();
        let quotes = envelope.quotes.unwrap().quote;
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price(), Some(dec!(451.25)));
    }

    #[test]
    fn test_quote_price_falls_back_to_mid() {
        let quote = Quote {
            symbol: "KO".to_string(),
            last: None,
            bid: Some(dec!(60)),
            ask: Some(dec!(61)),
        };
        assert_eq!(quote.price(), Some(dec!(60.5)));
    }

    #[test]
    fn test_null_string_collections_are_empty() {
        let positions: PositionsEnvelope = serde_json::from_str(r#"{"positions":"null"}"#).unwrap();
        assert!(positions.positions.is_none());

        let chain: ChainEnvelope = serde_json::from_str(r#"{"options":null}"#).unwrap();
        assert!(chain.options.is_none());
    }

    #[test]
    fn test_chain_partition_and_nearest_strike() {
        let expiry = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        let envelope: ChainEnvelope = serde_json::from_str(
            r#"{"options":{"option":[
                {"symbol":"SPY250321C00445000","strike":445.0,"option_type":"call","expiration_date":"2025-03-21"},
                {"symbol":"SPY250321C00455000","strike":455.0,"option_type":"call","expiration_date":"2025-03-21"},
                {"symbol":"SPY250321P00450000","strike":450.0,"option_type":"put","expiration_date":"2025-03-21"}
            ]}}"#,
        )
        .unwrap();
        let chain = OptionChain::from_contracts("SPY", expiry, envelope.options.unwrap().option);

        assert_eq!(chain.calls.len(), 2);
        assert_eq!(chain.puts.len(), 1);
        assert!(chain.find(OptionType::Put, "SPY250321P00450000").is_some());

        let nearest = chain.nearest_strike(OptionType::Call, dec!(452)).unwrap();
        assert_eq!(nearest.symbol, "SPY250321C00455000");
        // Equidistant: first listed wins.
        let tie = chain.nearest_strike(OptionType::Call, dec!(450)).unwrap();
        assert_eq!(tie.symbol, "SPY250321C00445000");
    }

    #[test]
    fn test_order_detail_numeric_id() {
        let envelope: OrderDetailEnvelope = serde_json::from_str(
            r#"{"order":{"id":228175,"status":"filled","avg_fill_price":2.15,"exec_quantity":3.0}}"#,
        )
        .unwrap();
        assert_eq!(envelope.order.id, "228175");
        assert_eq!(envelope.order.avg_fill_price, Some(dec!(2.15)));
        assert_eq!(envelope.order.transaction_date, None);
    }

    #[test]
    fn test_order_detail_transaction_date() {
        let envelope: OrderDetailEnvelope = serde_json::from_str(
            r#"{"order":{"id":"77","status":"filled","transaction_date":"2025-02-20T14:31:05.000Z"}}"#,
        )
        .unwrap();
        assert_eq!(
            envelope.order.transaction_date.unwrap().to_rfc3339(),
            "2025-02-20T14:31:05+00:00"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderStatus::from_broker("filled"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_broker("open"), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_broker("partially_filled"), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_broker("rejected"), OrderStatus::Rejected);
        assert_eq!(OrderStatus::from_broker("canceled"), OrderStatus::Rejected);
    }

    #[test]
    fn test_ticket_form_fields() {
        let ticket = OrderTicket {
            underlying: "SPY".to_string(),
            option_symbol: "SPY250321C00450000".to_string(),
            side: OrderSide::BuyToOpen,
            quantity: 2,
            order_type: OrderType::Limit,
            price: Some(dec!(3.10)),
            duration: TimeInForce::Gtc,
        };
        let form = ticket.form();
        assert!(form.contains(&("side", "buy_to_open".to_string())));
        assert!(form.contains(&("duration", "gtc".to_string())));
        assert!(form.contains(&("price", "3.10".to_string())));
    }
}
