//! Raw brokerage operations.

use super::error::GatewayError;
use super::types::{
    Balances, BrokerPosition, OptionChain, OrderAck, OrderDetail, OrderTicket, Quote,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// One request per call against a brokerage account.
///
/// Implementations never retry; `BrokerGateway` owns retry and fallback
/// policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Latest quote for an equity or option symbol.
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, GatewayError>;

    /// Listed expirations for an underlying, ascending.
    async fn expirations(&self, underlying: &str) -> Result<Vec<NaiveDate>, GatewayError>;

    /// Full chain for one expiration.
    async fn chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<OptionChain, GatewayError>;

    async fn balances(&self) -> Result<Balances, GatewayError>;

    async fn positions(&self) -> Result<Vec<BrokerPosition>, GatewayError>;

    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, GatewayError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderDetail, GatewayError>;
}
