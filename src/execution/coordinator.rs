//! Signal to order to ledger.

use super::signal::{Signal, TradingSignal};
use crate::broker::{
    BrokerGateway, OrderInstrument, OrderRequest, OrderResult, OrderSide, OrderStatus,
    Substitution, TimeInForce,
};
use crate::clock::Clock;
use crate::config::Config;
use crate::instrument::{InstrumentId, OptionType, SymbolCodec, MIN_SYMBOL_LEN};
use crate::journal::{JournalEntry, TradeJournal};
use crate::ledger::{PdtStatus, Position, PositionLedger};
use crate::market_hours::MarketHours;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Shares per option contract.
const CONTRACT_MULTIPLIER: Decimal = dec!(100);

/// Equity per extra sizing step.
const EQUITY_PER_SCALE: Decimal = dec!(10000);

/// Coordinator thresholds.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Signals below this confidence are skipped
    pub min_confidence: Decimal,
    /// Accounts below this equity are bound by the day-trade limit
    pub pdt_equity_threshold: Decimal,
    /// Ignore the market-hours gate for every request
    pub pre_market_eligible: bool,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_confidence: config.execution.min_confidence,
            pdt_equity_threshold: config.compliance.pdt_equity_threshold,
            pre_market_eligible: config.execution.pre_market_eligible,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One signal to act on.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub signal: TradingSignal,
    /// Contract to trade. Required for opening signals; a closing signal
    /// without one closes the first open position in the underlying.
    pub contract: Option<String>,
    /// Contracts to trade. Sized from confidence and equity when absent.
    pub quantity: Option<u32>,
    pub limit_price: Option<Decimal>,
    /// Bypass the market-hours gate for this request
    pub pre_market_eligible: bool,
}

impl ExecutionRequest {
    pub fn new(signal: TradingSignal, contract: Option<String>) -> Self {
        Self {
            signal,
            contract,
            quantity: None,
            limit_price: None,
            pre_market_eligible: false,
        }
    }
}

/// Why a signal was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    MarketClosed,
    /// Closing would complete a day trade the account is not allowed
    PdtLimit,
    Hold,
    LowConfidence,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MarketClosed => "market-closed",
            SkipReason::PdtLimit => "pdt-limit",
            SkipReason::Hold => "hold",
            SkipReason::LowConfidence => "low-confidence",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order that reached the broker and was not rejected.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub order: OrderResult,
    /// Contract actually traded
    pub instrument: InstrumentId,
    pub substitution: Option<Substitution>,
    /// Contracts booked in the ledger; the requested quantity while unfilled
    pub contracts: u32,
    pub time_in_force: TimeInForce,
    /// The close completed a same-day round trip
    pub day_trade: bool,
    /// Allowance after the ledger update
    pub pdt: PdtStatus,
}

/// Every signal ends in exactly one of these.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Executed(Box<ExecutionReport>),
    Rejected { reason: String },
    Skipped { reason: SkipReason },
}

impl ExecutionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Executed(_) => "executed",
            ExecutionOutcome::Rejected { .. } => "rejected",
            ExecutionOutcome::Skipped { .. } => "skipped",
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        ExecutionOutcome::Rejected {
            reason: reason.into(),
        }
    }
}

/// Turns trading signals into broker orders and ledger updates.
pub struct ExecutionCoordinator {
    ledger: Arc<PositionLedger>,
    gateway: Arc<BrokerGateway>,
    hours: Arc<dyn MarketHours>,
    codec: Arc<dyn SymbolCodec>,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<TradeJournal>>,
    settings: CoordinatorSettings,
}

impl ExecutionCoordinator {
    pub fn new(
        ledger: Arc<PositionLedger>,
        gateway: Arc<BrokerGateway>,
        hours: Arc<dyn MarketHours>,
        codec: Arc<dyn SymbolCodec>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            ledger,
            gateway,
            hours,
            codec,
            clock,
            journal: None,
            settings,
        }
    }

    pub fn with_journal(mut self, journal: Arc<TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Act on one signal and journal the outcome.
    #[instrument(
        skip(self, request),
        fields(signal = %request.signal.signal, underlying = %request.signal.underlying)
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let now = self.clock.now();
        let outcome = self.evaluate(request, now).await;

        match &outcome {
            ExecutionOutcome::Executed(report) => info!(
                order_id = %report.order.order_id,
                symbol = %report.order.symbol,
                status = report.order.status.as_str(),
                simulated = report.order.simulated,
                day_trade = report.day_trade,
                "Signal executed"
            ),
            ExecutionOutcome::Rejected { reason } => warn!(%reason, "Signal rejected"),
            ExecutionOutcome::Skipped { reason } => info!(%reason, "Signal skipped"),
        }

        self.journal(request, &outcome, now);
        outcome
    }

    async fn evaluate(&self, request: &ExecutionRequest, now: DateTime<Utc>) -> ExecutionOutcome {
        let signal = &request.signal;

        if signal.signal == Signal::Hold {
            return ExecutionOutcome::Skipped {
                reason: SkipReason::Hold,
            };
        }
        if signal.confidence < self.settings.min_confidence {
            return ExecutionOutcome::Skipped {
                reason: SkipReason::LowConfidence,
            };
        }

        let pre_market = request.pre_market_eligible || self.settings.pre_market_eligible;
        if !pre_market && !self.hours.is_open(now) {
            return ExecutionOutcome::Skipped {
                reason: SkipReason::MarketClosed,
            };
        }

        let (symbol, instrument) = match self.select_contract(request, now) {
            Ok(selected) => selected,
            Err(reason) => return ExecutionOutcome::rejected(reason),
        };

        let (pdt_applies, equity) = self.pdt_applies().await;
        let day_trade_allowed =
            !pdt_applies || self.ledger.can_open_day_trade(self.ledger.config().max_day_trades);

        let (side, quantity, time_in_force) = if signal.signal.is_opening() {
            let quantity = request
                .quantity
                .unwrap_or_else(|| size_position(signal.confidence, equity));
            let time_in_force = if day_trade_allowed {
                TimeInForce::Day
            } else {
                info!(%symbol, "Day trades exhausted, submitting as good-till-canceled");
                TimeInForce::Gtc
            };
            (OrderSide::BuyToOpen, quantity, time_in_force)
        } else {
            let Some(position) = self.ledger.position(&symbol) else {
                return ExecutionOutcome::rejected(format!("no open position in {symbol}"));
            };
            let position = match self.reconcile(position, now).await {
                Ok(position) => position,
                Err(outcome) => return outcome,
            };
            if !day_trade_allowed && self.ledger.same_trading_day(position.entry_time, now) {
                return ExecutionOutcome::Skipped {
                    reason: SkipReason::PdtLimit,
                };
            }
            let quantity = request.quantity.unwrap_or(position.contracts);
            let time_in_force = if day_trade_allowed {
                TimeInForce::Day
            } else {
                info!(%symbol, "Day trades exhausted, closing as good-till-canceled");
                TimeInForce::Gtc
            };
            (OrderSide::SellToClose, quantity, time_in_force)
        };

        let order = OrderRequest {
            instrument: OrderInstrument::Id(instrument),
            side,
            quantity,
            limit_price: request.limit_price,
            time_in_force,
        };
        let placed = match self.gateway.place_order(&order).await {
            Ok(placed) => placed,
            Err(e) => return ExecutionOutcome::rejected(e.to_string()),
        };
        if placed.result.status == OrderStatus::Rejected {
            return ExecutionOutcome::rejected(
                placed
                    .result
                    .reason
                    .clone()
                    .unwrap_or_else(|| "rejected by broker".to_string()),
            );
        }

        let traded = self
            .codec
            .encode(&placed.instrument)
            .unwrap_or_else(|_| placed.result.symbol.clone());
        let contracts = match placed.result.filled_quantity {
            0 => quantity,
            filled => filled,
        };

        let day_trade = if side.is_opening() {
            let price = placed.result.fill_price.or(request.limit_price);
            let cost_basis = price
                .map(|p| p * Decimal::from(contracts) * CONTRACT_MULTIPLIER)
                .unwrap_or(Decimal::ZERO);
            let adds_to_held = self.ledger.position(&traded).is_some();
            match self.ledger.open_position(
                &traded,
                contracts,
                now,
                cost_basis,
                Some(placed.instrument.clone()),
            ) {
                Ok(()) if placed.result.status == OrderStatus::Pending && !adds_to_held => {
                    self.ledger.mark_pending(&traded, &placed.result.order_id);
                }
                Ok(()) => {}
                Err(e) => warn!(symbol = %traded, error = %e, "Ledger did not record open"),
            }
            false
        } else {
            self.ledger
                .close_position(&traded, contracts, now)
                .unwrap_or_else(|e| {
                    warn!(symbol = %traded, error = %e, "Ledger did not record close");
                    false
                })
        };

        ExecutionOutcome::Executed(Box::new(ExecutionReport {
            order: placed.result,
            instrument: placed.instrument,
            substitution: placed.substitution,
            contracts,
            time_in_force,
            day_trade,
            pdt: self.ledger.status(),
        }))
    }

    /// Pick and sanity-check the contract without touching the network.
    fn select_contract(
        &self,
        request: &ExecutionRequest,
        now: DateTime<Utc>,
    ) -> Result<(String, InstrumentId), String> {
        let signal = &request.signal;

        if !signal.signal.is_opening() {
            let (symbol, id) = match request.contract.as_deref() {
                Some(raw) => {
                    let id = self.parse_contract(raw)?;
                    (self.codec.encode(&id).map_err(|e| e.to_string())?, id)
                }
                None => {
                    let position = self
                        .ledger
                        .open_positions()
                        .into_iter()
                        .find(|p| {
                            p.instrument
                                .as_ref()
                                .is_some_and(|i| i.underlying == signal.underlying)
                        })
                        .ok_or_else(|| format!("no open position in {}", signal.underlying))?;
                    let id = self.parse_contract(&position.symbol)?;
                    (position.symbol, id)
                }
            };
            return Ok((symbol, id));
        }

        let raw = request
            .contract
            .as_deref()
            .ok_or_else(|| format!("{} requires a contract", signal.signal))?;
        let id = self.parse_contract(raw)?;

        let expected = if signal.signal == Signal::BuyCall {
            OptionType::Call
        } else {
            OptionType::Put
        };
        if id.option_type != expected {
            return Err(format!(
                "{raw} is a {} but the signal is {}",
                id.option_type, signal.signal
            ));
        }
        if id.underlying != signal.underlying {
            return Err(format!(
                "{raw} is on {} but the signal is for {}",
                id.underlying, signal.underlying
            ));
        }
        if id.is_expired(self.ledger.trading_date(now)) {
            return Err(format!("{raw} expired on {}", id.expiration));
        }

        let symbol = self.codec.encode(&id).map_err(|e| e.to_string())?;
        Ok((symbol, id))
    }

    /// Settle a position booked from an order that had not filled yet.
    ///
    /// A confirmed fill moves the entry to the fill time; an order that is
    /// still working blocks the close; a dead order drops the position.
    async fn reconcile(
        &self,
        position: Position,
        now: DateTime<Utc>,
    ) -> Result<Position, ExecutionOutcome> {
        let Some(order_id) = position.pending_order.clone() else {
            return Ok(position);
        };
        let symbol = position.symbol.clone();

        let status = match self.gateway.get_order_status(&order_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    %symbol,
                    %order_id,
                    error = %e,
                    "Opening fill unconfirmed, using booked entry"
                );
                return Ok(position);
            }
        };

        match status.status {
            OrderStatus::Filled => {
                let filled_at = status.filled_at.unwrap_or(now);
                Ok(self
                    .ledger
                    .confirm_fill(&symbol, filled_at)
                    .unwrap_or(position))
            }
            OrderStatus::Pending => Err(ExecutionOutcome::rejected(format!(
                "opening order {order_id} for {symbol} has not filled"
            ))),
            OrderStatus::Rejected => {
                self.ledger.discard_position(&symbol);
                Err(ExecutionOutcome::rejected(format!(
                    "opening order {order_id} for {symbol} was {}",
                    status.reason.as_deref().unwrap_or("not filled")
                )))
            }
        }
    }

    fn parse_contract(&self, raw: &str) -> Result<InstrumentId, String> {
        let raw = raw.trim();
        if raw.len() < MIN_SYMBOL_LEN {
            return Err(format!("invalid contract format: {raw:?}"));
        }
        self.codec.decode(raw).map_err(|e| e.to_string())
    }

    /// Whether the day-trade limit binds, and the equity seen.
    ///
    /// Unknown equity is treated as below the threshold.
    async fn pdt_applies(&self) -> (bool, Option<Decimal>) {
        match self.gateway.get_balances().await {
            Ok(balances) => (
                balances.total_equity < self.settings.pdt_equity_threshold,
                Some(balances.total_equity),
            ),
            Err(e) => {
                warn!(error = %e, "Balances unavailable, assuming day-trade limit applies");
                (true, None)
            }
        }
    }

    fn journal(&self, request: &ExecutionRequest, outcome: &ExecutionOutcome, now: DateTime<Utc>) {
        let Some(journal) = &self.journal else {
            return;
        };

        let mut entry = JournalEntry {
            timestamp: now,
            underlying: request.signal.underlying.clone(),
            signal: request.signal.signal.to_string(),
            contract: request.contract.clone(),
            outcome: outcome.kind().to_string(),
            quantity: 0,
            fill_price: None,
            simulated: false,
            reason: None,
        };
        match outcome {
            ExecutionOutcome::Executed(report) => {
                entry.contract = Some(report.order.symbol.clone());
                entry.quantity = report.contracts;
                entry.fill_price = report.order.fill_price;
                entry.simulated = report.order.simulated;
                entry.reason = report.substitution.as_ref().map(|s| {
                    format!("substituted {} for {}", s.substituted, s.requested)
                });
            }
            ExecutionOutcome::Rejected { reason } => entry.reason = Some(reason.clone()),
            ExecutionOutcome::Skipped { reason } => entry.reason = Some(reason.to_string()),
        }

        if let Err(e) = journal.record(&entry) {
            warn!(error = %e, "Failed to journal execution");
        }
    }
}

/// Contracts for an opening order: 1, 2 or 3 by confidence, times
/// `clamp(floor(equity / 10000), 1, 3)`.
pub fn size_position(confidence: Decimal, equity: Option<Decimal>) -> u32 {
    let base = if confidence > dec!(0.9) {
        3
    } else if confidence > dec!(0.8) {
        2
    } else {
        1
    };
    let scale = equity
        .and_then(|e| (e / EQUITY_PER_SCALE).floor().to_u32())
        .unwrap_or(1)
        .clamp(1, 3);
    base * scale
}
