//! Tradier-style brokerage REST client.

use super::api::BrokerApi;
use super::error::GatewayError;
use super::types::*;
use crate::config::GatewayConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

/// Longest slice of a response body carried into an error message.
const MAX_BODY_IN_ERROR: usize = 256;

/// REST client for a single brokerage account.
pub struct TradierClient {
    http: Client,
    base_url: String,
    api_key: String,
    account_id: String,
}

impl TradierClient {
    /// Create a new client from gateway settings.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            api_key: config.api_key().to_string(),
            account_id: config.account_id().to_string(),
        })
    }

    fn account_url(&self, suffix: &str) -> String {
        format!(
            "{}/accounts/{}/{}",
            self.base_url,
            urlencoding::encode(&self.account_id),
            suffix
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header(ACCEPT, "application/json")
    }

    async fn send_raw(&self, request: RequestBuilder) -> Result<String, GatewayError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "Broker returned error status");
            return Err(GatewayError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let body = self.send_raw(request).await?;
        parse(&body)
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T, GatewayError> {
    serde_json::from_str(body).map_err(|e| {
        let snippet: String = body.chars().take(MAX_BODY_IN_ERROR).collect();
        GatewayError::MalformedResponse(format!("{e}: {snippet}"))
    })
}

#[async_trait]
impl BrokerApi for TradierClient {
    #[instrument(skip(self))]
    async fn quote(&self, symbol: &str) -> Result<Option<Quote>, GatewayError> {
        let url = format!("{}/markets/quotes", self.base_url);
        let envelope: QuotesEnvelope = self
            .send(self.http.get(&url).query(&[("symbols", symbol)]))
            .await?;

        Ok(envelope
            .quotes
            .map(|q| q.quote)
            .unwrap_or_default()
            .into_iter()
            .find(|q| q.symbol.eq_ignore_ascii_case(symbol)))
    }

    #[instrument(skip(self))]
    async fn expirations(&self, underlying: &str) -> Result<Vec<NaiveDate>, GatewayError> {
        let url = format!("{}/markets/options/expirations", self.base_url);
        let envelope: ExpirationsEnvelope = self
            .send(self.http.get(&url).query(&[("symbol", underlying)]))
            .await?;

        let mut dates = envelope.expirations.map(|e| e.date).unwrap_or_default();
        dates.sort_unstable();
        Ok(dates)
    }

    #[instrument(skip(self))]
    async fn chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<OptionChain, GatewayError> {
        let url = format!("{}/markets/options/chains", self.base_url);
        let expiration_param = expiration.format("%Y-%m-%d").to_string();
        let envelope: ChainEnvelope = self
            .send(self.http.get(&url).query(&[
                ("symbol", underlying),
                ("expiration", expiration_param.as_str()),
                ("greeks", "false"),
            ]))
            .await?;

        let contracts = envelope.options.map(|o| o.option).unwrap_or_default();
        Ok(OptionChain::from_contracts(underlying, expiration, contracts))
    }

    #[instrument(skip(self))]
    async fn balances(&self) -> Result<Balances, GatewayError> {
        let envelope: BalancesEnvelope = self
            .send(self.http.get(self.account_url("balances")))
            .await?;

        envelope
            .balances
            .ok_or_else(|| GatewayError::MalformedResponse("balances missing".to_string()))
    }

    #[instrument(skip(self))]
    async fn positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let envelope: PositionsEnvelope = self
            .send(self.http.get(self.account_url("positions")))
            .await?;

        Ok(envelope.positions.map(|p| p.position).unwrap_or_default())
    }

    #[instrument(skip(self), fields(option_symbol = %ticket.option_symbol))]
    async fn submit_order(&self, ticket: &OrderTicket) -> Result<OrderAck, GatewayError> {
        let body = self
            .send_raw(self.http.post(self.account_url("orders")).form(&ticket.form()))
            .await?;
        let envelope: OrderAckEnvelope = parse(&body)?;

        match envelope.order {
            Some(ack) => {
                debug!(order_id = %ack.id, "Order accepted");
                Ok(ack)
            }
            // Some rejections arrive with a 200 status and an errors body.
            None if envelope.errors.is_some() => Err(GatewayError::from_status(400, &body)),
            None => Err(GatewayError::MalformedResponse(
                "order response without order or errors".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn order_status(&self, order_id: &str) -> Result<OrderDetail, GatewayError> {
        let url = self.account_url(&format!("orders/{}", urlencoding::encode(order_id)));
        let envelope: OrderDetailEnvelope = self.send(self.http.get(&url)).await?;
        Ok(envelope.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> TradierClient {
        let config = GatewayConfig::sandbox("test-key", "VA1").with_base_url(server.uri());
        TradierClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_quote_single_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/quotes"))
            .and(query_param("symbols", "SPY"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "quotes": { "quote": { "symbol": "SPY", "last": 451.25, "bid": 451.2, "ask": 451.3 } }
            })))
            .mount(&server)
            .await;

        let quote = client_for(&server).await.quote("SPY").await.unwrap().unwrap();
        assert_eq!(quote.price(), Some(dec!(451.25)));
    }

    #[tokio::test]
    async fn test_empty_chain_and_positions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/markets/options/chains"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "options": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/VA1/positions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "positions": "null"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let expiry = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        assert!(client.chain("SPY", expiry).await.unwrap().is_empty());
        assert!(client.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/VA1/balances"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/VA1/orders"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": { "error": "Invalid option symbol" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.balances().await.unwrap_err();
        assert!(err.is_retryable());

        let ticket = OrderTicket {
            underlying: "SPY".to_string(),
            option_symbol: "SPY250321C00450000".to_string(),
            side: OrderSide::BuyToOpen,
            quantity: 1,
            order_type: OrderType::Market,
            price: None,
            duration: TimeInForce::Day,
        };
        let err = client.submit_order(&ticket).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::OrderRejected {
                reason: "Invalid option symbol".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_submit_order_sends_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/VA1/orders"))
            .and(body_string_contains("class=option"))
            .and(body_string_contains("option_symbol=SPY250321C00450000"))
            .and(body_string_contains("duration=gtc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order": { "id": 257459, "status": "ok" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ticket = OrderTicket {
            underlying: "SPY".to_string(),
            option_symbol: "SPY250321C00450000".to_string(),
            side: OrderSide::BuyToOpen,
            quantity: 2,
            order_type: OrderType::Market,
            price: None,
            duration: TimeInForce::Gtc,
        };
        let ack = client_for(&server).await.submit_order(&ticket).await.unwrap();
        assert_eq!(ack.id, "257459");
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/VA1/orders/42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).await.order_status("42").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
    }
}
