//! Resilient order placement on top of a `BrokerApi`.

use super::api::BrokerApi;
use super::error::GatewayError;
use super::retry::{CancelToken, RetryPolicy};
use super::simulation;
use super::types::*;
use crate::clock::Clock;
use crate::config::GatewayConfig;
use crate::instrument::{InstrumentId, SymbolCodec};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How a requested contract maps onto the live chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Listed as requested.
    Exact(InstrumentId),
    /// Not listed; the nearest strike on the same side is.
    Substituted {
        instrument: InstrumentId,
        substitution: Substitution,
    },
    /// The chain has nothing for this expiration and type.
    NoData,
}

/// Brokerage access with retries, chain validation and sandbox fallback.
pub struct BrokerGateway {
    api: Arc<dyn BrokerApi>,
    config: GatewayConfig,
    retry: RetryPolicy,
    codec: Arc<dyn SymbolCodec>,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
}

impl BrokerGateway {
    pub fn new(
        api: Arc<dyn BrokerApi>,
        config: GatewayConfig,
        codec: Arc<dyn SymbolCodec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            api,
            config,
            retry,
            codec,
            clock,
            cancel: CancelToken::new(),
        }
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ==================== Market data ====================

    #[instrument(skip(self))]
    pub async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>, GatewayError> {
        self.retry
            .run("quote", &self.cancel, || self.api.quote(symbol))
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_expirations(&self, underlying: &str) -> Result<Vec<NaiveDate>, GatewayError> {
        self.retry
            .run("expirations", &self.cancel, || self.api.expirations(underlying))
            .await
    }

    /// Chain for one expiration. An unparseable chain is treated as empty.
    #[instrument(skip(self))]
    pub async fn get_chain(
        &self,
        underlying: &str,
        expiration: NaiveDate,
    ) -> Result<OptionChain, GatewayError> {
        let result = self
            .retry
            .run("chain", &self.cancel, || self.api.chain(underlying, expiration))
            .await;

        match result {
            Err(GatewayError::MalformedResponse(reason)) => {
                warn!(
                    %underlying,
                    %expiration,
                    %reason,
                    "Malformed option chain, treating as empty"
                );
                Ok(OptionChain {
                    underlying: underlying.to_string(),
                    expiration: Some(expiration),
                    ..OptionChain::default()
                })
            }
            other => other,
        }
    }

    // ==================== Account ====================

    #[instrument(skip(self))]
    pub async fn get_balances(&self) -> Result<Balances, GatewayError> {
        self.retry
            .run("balances", &self.cancel, || self.api.balances())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        self.retry
            .run("positions", &self.cancel, || self.api.positions())
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_order_status(&self, order_id: &str) -> Result<OrderResult, GatewayError> {
        let detail = self
            .retry
            .run("order_status", &self.cancel, || self.api.order_status(order_id))
            .await?;
        Ok(order_result(detail, "", 0))
    }

    // ==================== Orders ====================

    /// Check a contract against the live chain.
    ///
    /// A missing strike is replaced by the nearest listed strike of the same
    /// type and expiration.
    #[instrument(skip(self), fields(instrument = %id))]
    pub async fn resolve_instrument(&self, id: &InstrumentId) -> Result<Resolution, GatewayError> {
        let symbol = self.encode(id)?;
        let chain = self.get_chain(&id.underlying, id.expiration).await?;

        if chain
            .side(id.option_type)
            .iter()
            .any(|c| c.symbol == symbol || c.strike == id.strike)
        {
            return Ok(Resolution::Exact(id.clone()));
        }

        let Some(nearest) = chain.nearest_strike(id.option_type, id.strike) else {
            return Ok(Resolution::NoData);
        };

        let instrument = match self.codec.decode(&nearest.symbol) {
            Ok(decoded) => decoded,
            Err(_) => InstrumentId::new(
                &id.underlying,
                id.expiration,
                id.option_type,
                nearest.strike,
            )
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?,
        };
        let substitution = Substitution {
            requested: symbol,
            substituted: self.encode(&instrument)?,
            requested_strike: id.strike,
            substituted_strike: instrument.strike,
        };
        Ok(Resolution::Substituted {
            instrument,
            substitution,
        })
    }

    /// Validate, resolve and submit an order.
    ///
    /// Malformed requests fail before any network call. Retryable failures
    /// are retried up to the configured bound; rejections are returned
    /// after one attempt. The submission itself is repeated only when the
    /// broker refused it outright (429, 503). Closing orders never trade a
    /// substituted strike. A simulated fill is produced only when the
    /// configuration allows simulation and the broker could not supply real
    /// data.
    #[instrument(skip(self, request), fields(side = %request.side, quantity = request.quantity))]
    pub async fn place_order(&self, request: &OrderRequest) -> Result<PlacedOrder, GatewayError> {
        let requested = self.validate_request(request)?;

        let (instrument, substitution) = match self.resolve_instrument(&requested).await {
            Ok(Resolution::Exact(instrument)) => (instrument, None),
            Ok(Resolution::Substituted { substitution, .. }) if !request.side.is_opening() => {
                warn!(
                    requested = %substitution.requested,
                    nearest = %substitution.substituted,
                    "Closing contract not listed, refusing to trade a different strike"
                );
                return Err(GatewayError::InstrumentNotFound {
                    symbol: substitution.requested,
                });
            }
            Ok(Resolution::Substituted {
                instrument,
                substitution,
            }) => {
                warn!(
                    requested = %substitution.requested,
                    substituted = %substitution.substituted,
                    "Requested strike not listed, using nearest"
                );
                (instrument, Some(substitution))
            }
            Ok(Resolution::NoData) => {
                let err = GatewayError::InstrumentNotFound {
                    symbol: self.encode(&requested)?,
                };
                return self.fallback(err, requested, request).await;
            }
            Err(e) if e.is_data_unavailable() => return self.fallback(e, requested, request).await,
            Err(e) => return Err(e),
        };

        let ticket = OrderTicket {
            underlying: instrument.underlying.clone(),
            option_symbol: self.encode(&instrument)?,
            side: request.side,
            quantity: request.quantity,
            order_type: if request.limit_price.is_some() {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            price: request.limit_price,
            duration: request.time_in_force,
        };

        let submitted = self
            .retry
            .run_when(
                "submit_order",
                &self.cancel,
                GatewayError::is_safe_to_resubmit,
                || self.api.submit_order(&ticket),
            )
            .await;
        let ack = match submitted {
            Ok(ack) => ack,
            Err(e) => {
                if e.is_retryable() {
                    warn!(
                        symbol = %ticket.option_symbol,
                        error = %e,
                        "Order submission outcome unknown, not resubmitting"
                    );
                }
                if e.is_data_unavailable() {
                    return self.fallback(e, instrument, request).await;
                }
                return Err(e);
            }
        };
        info!(order_id = %ack.id, symbol = %ticket.option_symbol, "Order submitted");

        // One status check; a failure here leaves the order pending.
        let result = match self.api.order_status(&ack.id).await {
            Ok(detail) => order_result(detail, &ticket.option_symbol, request.quantity),
            Err(e) => {
                warn!(order_id = %ack.id, error = %e, "Order status unavailable");
                OrderResult {
                    order_id: ack.id,
                    status: OrderStatus::Pending,
                    symbol: ticket.option_symbol,
                    fill_price: None,
                    filled_quantity: 0,
                    filled_at: None,
                    simulated: false,
                    reason: None,
                }
            }
        };

        Ok(PlacedOrder {
            result,
            instrument,
            substitution,
        })
    }

    fn validate_request(&self, request: &OrderRequest) -> Result<InstrumentId, GatewayError> {
        if request.quantity == 0 {
            return Err(GatewayError::Validation("quantity must be positive".to_string()));
        }
        if let Some(price) = request.limit_price {
            if price <= Decimal::ZERO {
                return Err(GatewayError::Validation(format!(
                    "limit price must be positive, got {price}"
                )));
            }
        }

        let id = match &request.instrument {
            OrderInstrument::Id(id) => {
                id.validate()
                    .map_err(|e| GatewayError::Validation(e.to_string()))?;
                id.clone()
            }
            OrderInstrument::Raw(symbol) => self
                .codec
                .decode(symbol)
                .map_err(|e| GatewayError::Validation(e.to_string()))?,
        };

        let today = self.clock.now().date_naive();
        if id.is_expired(today) {
            return Err(GatewayError::Validation(format!(
                "{id} expired on {}",
                id.expiration
            )));
        }
        Ok(id)
    }

    fn encode(&self, id: &InstrumentId) -> Result<String, GatewayError> {
        self.codec
            .encode(id)
            .map_err(|e| GatewayError::Validation(e.to_string()))
    }

    async fn fallback(
        &self,
        err: GatewayError,
        instrument: InstrumentId,
        request: &OrderRequest,
    ) -> Result<PlacedOrder, GatewayError> {
        if !self.config.allows_simulation() {
            return Err(err);
        }

        let symbol = self.encode(&instrument)?;
        warn!(%symbol, error = %err, "Broker data unavailable, simulating sandbox fill");

        // Best effort: one attempt, no retries.
        let spot = match self.api.quote(&instrument.underlying).await {
            Ok(quote) => quote.and_then(|q| q.price()),
            Err(e) => {
                debug!(error = %e, "No spot quote for simulated fill");
                None
            }
        };

        let result = simulation::simulated_result(
            &instrument,
            &symbol,
            request.quantity,
            spot,
            self.clock.now(),
            &mut rand::thread_rng(),
        );
        Ok(PlacedOrder {
            result,
            instrument,
            substitution: None,
        })
    }
}

fn order_result(detail: OrderDetail, symbol: &str, requested: u32) -> OrderResult {
    let status = OrderStatus::from_broker(&detail.status);
    let filled_quantity = detail
        .exec_quantity
        .and_then(|q| q.to_u32())
        .filter(|q| *q > 0)
        .unwrap_or(if status == OrderStatus::Filled { requested } else { 0 });

    OrderResult {
        order_id: detail.id,
        status,
        symbol: detail
            .option_symbol
            .or(detail.symbol)
            .unwrap_or_else(|| symbol.to_string()),
        fill_price: detail.avg_fill_price.filter(|p| *p > Decimal::ZERO),
        filled_quantity,
        filled_at: detail
            .transaction_date
            .filter(|_| status == OrderStatus::Filled),
        simulated: false,
        reason: detail.reason_description,
    }
}
