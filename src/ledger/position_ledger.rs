//! The position ledger and its day-trade rules.

use super::{
    DayTradeRecord, DayTradeSummary, LedgerError, LedgerSnapshot, PdtStatus, Position,
    SnapshotStore,
};
use crate::clock::Clock;
use crate::instrument::{InstrumentId, SymbolCodec};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Day-trade policy parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Day trades allowed inside the window
    pub max_day_trades: u32,
    /// Rolling window, in calendar days
    pub window_days: u32,
    /// Timezone whose calendar date defines "same day"
    pub trading_tz: Tz,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_day_trades: 3,
            window_days: 7,
            trading_tz: chrono_tz::US::Eastern,
        }
    }
}

/// Open positions plus recent day trades, persisted after every mutation.
///
/// One mutex guards the in-memory state and is held across the snapshot
/// write, so concurrent callers never interleave read-modify-write cycles.
pub struct PositionLedger {
    state: Mutex<LedgerSnapshot>,
    store: Option<SnapshotStore>,
    codec: Arc<dyn SymbolCodec>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl PositionLedger {
    /// Open a file-backed ledger.
    ///
    /// A missing file starts empty; an unreadable or corrupt file is logged
    /// and also starts empty rather than failing startup.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: LedgerConfig,
        codec: Arc<dyn SymbolCodec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = SnapshotStore::new(path);
        let snapshot = match store.load() {
            Ok(Some(snapshot)) => {
                info!(
                    path = ?store.path(),
                    positions = snapshot.positions.len(),
                    day_trades = snapshot.day_trades.len(),
                    "Loaded ledger"
                );
                snapshot
            }
            Ok(None) => {
                info!(path = ?store.path(), "No ledger found, starting fresh");
                LedgerSnapshot::default()
            }
            Err(e) => {
                warn!(error = %e, "Ledger unreadable, starting with an empty ledger");
                LedgerSnapshot::default()
            }
        };

        let ledger = Self {
            state: Mutex::new(snapshot),
            store: Some(store),
            codec,
            clock,
            config,
        };
        ledger.evict_expired(&mut ledger.lock(), ledger.config.window_days);
        ledger
    }

    /// A ledger that never touches disk.
    pub fn in_memory(
        config: LedgerConfig,
        codec: Arc<dyn SymbolCodec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerSnapshot::default()),
            store: None,
            codec,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Record a fill that opens (or adds to) a position.
    ///
    /// Adding to an existing position keeps the first entry time, so a
    /// later same-day close of the merged lot is judged against the
    /// earliest open.
    pub fn open_position(
        &self,
        symbol: &str,
        contracts: u32,
        entry_time: DateTime<Utc>,
        cost_basis: Decimal,
        instrument: Option<InstrumentId>,
    ) -> Result<(), LedgerError> {
        if contracts == 0 {
            return Err(LedgerError::InvalidQuantity {
                symbol: symbol.to_string(),
                contracts,
            });
        }

        let mut state = self.lock();
        match state.positions.get_mut(symbol) {
            Some(position) => {
                let Some(total) = position.contracts.checked_add(contracts) else {
                    return Err(LedgerError::InvalidQuantity {
                        symbol: symbol.to_string(),
                        contracts,
                    });
                };
                position.contracts = total;
                position.cost_basis += cost_basis;
                info!(
                    %symbol,
                    added = contracts,
                    total = position.contracts,
                    "Added to existing position"
                );
            }
            None => {
                let instrument = instrument.or_else(|| self.codec.decode(symbol).ok());
                state.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        contracts,
                        entry_time,
                        cost_basis,
                        instrument,
                        pending_order: None,
                    },
                );
                info!(%symbol, contracts, "Opened new position");
            }
        }

        self.persist(&state);
        Ok(())
    }

    /// Record a fill that closes some or all of a position.
    ///
    /// Returns true when the close completes a day trade. Closing a symbol
    /// with no open position is logged and is never a day trade.
    pub fn close_position(
        &self,
        symbol: &str,
        contracts: u32,
        exit_time: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        if contracts == 0 {
            return Err(LedgerError::InvalidQuantity {
                symbol: symbol.to_string(),
                contracts,
            });
        }

        let mut state = self.lock();
        let Some(position) = state.positions.get(symbol).cloned() else {
            warn!(%symbol, "Attempted to close a position that is not open");
            return Ok(false);
        };

        let closed = contracts.min(position.contracts);
        let is_day_trade = self.same_trading_day(position.entry_time, exit_time);
        if is_day_trade {
            state.day_trades.push(DayTradeRecord {
                symbol: symbol.to_string(),
                entry_time: position.entry_time,
                exit_time,
                contracts: closed,
            });
            info!(%symbol, contracts = closed, "Recorded day trade");
        }

        let remaining = position.contracts - closed;
        if remaining == 0 {
            state.positions.remove(symbol);
            info!(%symbol, "Closed position");
        } else if let Some(open) = state.positions.get_mut(symbol) {
            open.cost_basis = position.cost_basis * Decimal::from(remaining)
                / Decimal::from(position.contracts);
            open.contracts = remaining;
            info!(%symbol, remaining, "Partially closed position");
        }

        self.persist(&state);
        Ok(is_day_trade)
    }

    /// Flag a position whose opening order has not been confirmed filled.
    ///
    /// Returns false when the symbol is not open.
    pub fn mark_pending(&self, symbol: &str, order_id: &str) -> bool {
        let mut state = self.lock();
        let Some(position) = state.positions.get_mut(symbol) else {
            return false;
        };
        position.pending_order = Some(order_id.to_string());
        info!(%symbol, %order_id, "Position awaiting fill confirmation");
        self.persist(&state);
        true
    }

    /// Settle a pending position once the broker reports the fill.
    ///
    /// The entry time moves forward to the fill time, never back, so a
    /// next-day fill closed that same day counts as a day trade.
    pub fn confirm_fill(&self, symbol: &str, filled_at: DateTime<Utc>) -> Option<Position> {
        let mut state = self.lock();
        let position = state.positions.get_mut(symbol)?;
        position.pending_order = None;
        position.entry_time = position.entry_time.max(filled_at);
        let confirmed = position.clone();
        info!(%symbol, entry_time = %confirmed.entry_time, "Confirmed fill");
        self.persist(&state);
        Some(confirmed)
    }

    /// Drop a position whose opening order never filled.
    ///
    /// No day trade is recorded.
    pub fn discard_position(&self, symbol: &str) -> Option<Position> {
        let mut state = self.lock();
        let removed = state.positions.remove(symbol)?;
        warn!(%symbol, contracts = removed.contracts, "Discarded unfilled position");
        self.persist(&state);
        Some(removed)
    }

    /// Manually record a day trade (control-surface action).
    pub fn record_day_trade(
        &self,
        symbol: &str,
        contracts: u32,
        entry_time: DateTime<Utc>,
        exit_time: DateTime<Utc>,
    ) {
        let mut state = self.lock();
        state.day_trades.push(DayTradeRecord {
            symbol: symbol.to_string(),
            entry_time,
            exit_time,
            contracts,
        });
        info!(%symbol, contracts, "Manually recorded day trade");
        self.persist(&state);
    }

    /// Forget every recorded day trade.
    pub fn reset_day_trades(&self) -> PdtStatus {
        {
            let mut state = self.lock();
            let cleared = state.day_trades.len();
            state.day_trades.clear();
            self.persist(&state);
            info!(cleared, "Reset day trade records");
        }
        self.status()
    }

    /// Day trades whose exit falls inside the last `window_days` days.
    ///
    /// Older records are evicted as a side effect.
    pub fn day_trade_count(&self, window_days: u32) -> usize {
        let mut state = self.lock();
        self.evict_expired(&mut state, window_days);
        state.day_trades.len()
    }

    /// Whether one more day trade stays under `limit`.
    pub fn can_open_day_trade(&self, limit: u32) -> bool {
        self.day_trade_count(self.config.window_days) < limit as usize
    }

    /// Allowance under the configured limit and window.
    pub fn status(&self) -> PdtStatus {
        let mut state = self.lock();
        let window_days = self.config.window_days;
        self.evict_expired(&mut state, window_days);

        let now = self.clock.now();
        let count = state.day_trades.len();
        let limit = self.config.max_day_trades;
        let recent = state
            .day_trades
            .iter()
            .map(|trade| {
                let days_to_clear = window(window_days)
                    .and_then(|w| trade.exit_time.checked_add_signed(w))
                    .map(|clears_at| (clears_at - now).num_days().max(0))
                    .unwrap_or(i64::MAX);
                DayTradeSummary {
                    symbol: trade.symbol.clone(),
                    exit_date: self.trading_date(trade.exit_time),
                    days_to_clear,
                }
            })
            .collect();

        PdtStatus {
            day_trade_count: count,
            max_day_trades: limit,
            remaining: limit.saturating_sub(u32::try_from(count).unwrap_or(u32::MAX)),
            can_day_trade: count < limit as usize,
            window_days,
            recent,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.lock().positions.get(symbol).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.lock().positions.values().cloned().collect()
    }

    /// Copy of the full state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.lock().clone()
    }

    /// Calendar date of `at` in the trading timezone.
    pub fn trading_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.config.trading_tz).date_naive()
    }

    /// True when both instants share a trading-calendar date.
    pub fn same_trading_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.trading_date(a) == self.trading_date(b)
    }

    fn evict_expired(&self, state: &mut LedgerSnapshot, window_days: u32) {
        let now = self.clock.now();
        let Some(cutoff) = window(window_days).and_then(|w| now.checked_sub_signed(w)) else {
            return;
        };
        let before = state.day_trades.len();
        state.day_trades.retain(|trade| trade.exit_time > cutoff);

        let evicted = before - state.day_trades.len();
        if evicted > 0 {
            info!(evicted, window_days, "Evicted expired day trades");
            self.persist(state);
        }
    }

    fn persist(&self, state: &LedgerSnapshot) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(state) {
            error!(error = %e, "Failed to persist ledger");
        } else {
            debug!("Ledger persisted");
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn window(days: u32) -> Option<Duration> {
    Duration::try_days(i64::from(days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::instrument::OccCodec;
    use chrono::TimeZone;
    use chrono_tz::US::Eastern;
    use rust_decimal_macros::dec;
    use std::thread;

    const XYZ: &str = "XYZ250321C00050000";

    fn eastern(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Eastern
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ledger_at(now: DateTime<Utc>) -> (PositionLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let ledger = PositionLedger::in_memory(
            LedgerConfig::default(),
            Arc::new(OccCodec),
            clock.clone(),
        );
        (ledger, clock)
    }

    #[test]
    fn test_same_day_round_trip_is_one_day_trade() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));

        ledger
            .open_position(XYZ, 10, eastern(2025, 3, 17, 9, 35), dec!(1500), None)
            .unwrap();
        let day_trade = ledger
            .close_position(XYZ, 10, eastern(2025, 3, 17, 15, 50))
            .unwrap();

        assert!(day_trade);
        assert_eq!(ledger.day_trade_count(7), 1);
        assert!(ledger.position(XYZ).is_none());
        assert!(ledger.open_positions().is_empty());
    }

    #[test]
    fn test_overnight_round_trip_is_not_a_day_trade() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 18, 16, 0));

        ledger
            .open_position(XYZ, 3, eastern(2025, 3, 17, 15, 55), dec!(300), None)
            .unwrap();
        let day_trade = ledger
            .close_position(XYZ, 3, eastern(2025, 3, 18, 9, 31))
            .unwrap();

        assert!(!day_trade);
        assert_eq!(ledger.day_trade_count(7), 0);
    }

    #[test]
    fn test_trading_date_uses_exchange_timezone() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 23, 0));

        // 19:00 and 21:00 Eastern straddle midnight UTC but share a trading date.
        ledger
            .open_position(XYZ, 1, eastern(2025, 3, 17, 19, 0), dec!(100), None)
            .unwrap();
        assert!(ledger
            .close_position(XYZ, 1, eastern(2025, 3, 17, 21, 0))
            .unwrap());
    }

    #[test]
    fn test_partial_close_keeps_remainder() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 18, 12, 0));

        ledger
            .open_position(XYZ, 10, eastern(2025, 3, 17, 10, 0), dec!(2000), None)
            .unwrap();
        assert!(!ledger
            .close_position(XYZ, 4, eastern(2025, 3, 18, 11, 0))
            .unwrap());

        let position = ledger.position(XYZ).unwrap();
        assert_eq!(position.contracts, 6);
        assert_eq!(position.cost_basis, dec!(1200));
    }

    #[test]
    fn test_partial_same_day_close_records_closed_contracts() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));

        ledger
            .open_position(XYZ, 5, eastern(2025, 3, 17, 9, 45), dec!(500), None)
            .unwrap();
        assert!(ledger
            .close_position(XYZ, 2, eastern(2025, 3, 17, 11, 0))
            .unwrap());

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.day_trades[0].contracts, 2);
        assert_eq!(snapshot.positions[XYZ].contracts, 3);
    }

    #[test]
    fn test_overclose_removes_position_and_caps_record() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));

        ledger
            .open_position(XYZ, 2, eastern(2025, 3, 17, 9, 45), dec!(200), None)
            .unwrap();
        ledger
            .close_position(XYZ, 5, eastern(2025, 3, 17, 10, 0))
            .unwrap();

        assert!(ledger.position(XYZ).is_none());
        assert_eq!(ledger.snapshot().day_trades[0].contracts, 2);
    }

    #[test]
    fn test_merged_opens_keep_first_entry_time() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 18, 16, 0));
        let first = eastern(2025, 3, 17, 10, 0);

        ledger.open_position(XYZ, 2, first, dec!(200), None).unwrap();
        ledger
            .open_position(XYZ, 3, eastern(2025, 3, 18, 10, 0), dec!(330), None)
            .unwrap();

        let position = ledger.position(XYZ).unwrap();
        assert_eq!(position.contracts, 5);
        assert_eq!(position.entry_time, first);
        assert_eq!(position.cost_basis, dec!(530));

        // Closing on the second day is judged against the first open.
        assert!(!ledger
            .close_position(XYZ, 5, eastern(2025, 3, 18, 15, 0))
            .unwrap());
    }

    #[test]
    fn test_close_unknown_symbol_is_not_a_day_trade() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        assert!(!ledger
            .close_position("NOPE250321C00010000", 1, eastern(2025, 3, 17, 15, 0))
            .unwrap());
        assert_eq!(ledger.day_trade_count(7), 0);
    }

    #[test]
    fn test_zero_contracts_rejected() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        let at = eastern(2025, 3, 17, 10, 0);

        assert!(matches!(
            ledger.open_position(XYZ, 0, at, dec!(0), None),
            Err(LedgerError::InvalidQuantity { .. })
        ));
        assert!(ledger.close_position(XYZ, 0, at).is_err());
    }

    #[test]
    fn test_open_enriches_instrument_when_symbol_decodes() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        let at = eastern(2025, 3, 17, 10, 0);

        ledger.open_position(XYZ, 1, at, dec!(50), None).unwrap();
        ledger.open_position("not-a-contract", 1, at, dec!(50), None).unwrap();

        let parsed = ledger.position(XYZ).unwrap().instrument.unwrap();
        assert_eq!(parsed.underlying, "XYZ");
        assert_eq!(parsed.strike, dec!(50));
        assert!(ledger.position("not-a-contract").unwrap().instrument.is_none());
    }

    #[test]
    fn test_limit_blocks_until_oldest_expires() {
        let (ledger, clock) = ledger_at(eastern(2025, 3, 17, 16, 0));

        for (i, day) in [17, 18, 19].into_iter().enumerate() {
            clock.set(eastern(2025, 3, day, 16, 0));
            let symbol = format!("XYZ2503{day}C0005{i}000");
            ledger
                .open_position(&symbol, 1, eastern(2025, 3, day, 10, 0), dec!(50), None)
                .unwrap();
            assert!(ledger
                .close_position(&symbol, 1, eastern(2025, 3, day, 11, 0))
                .unwrap());
        }

        assert!(!ledger.can_open_day_trade(3));
        assert_eq!(ledger.status().remaining, 0);

        // Six days after the first exit it still counts.
        clock.set(eastern(2025, 3, 23, 11, 0));
        assert!(!ledger.can_open_day_trade(3));

        // Past the seven-day window the oldest drops out.
        clock.set(eastern(2025, 3, 24, 11, 1));
        assert!(ledger.can_open_day_trade(3));
        assert_eq!(ledger.day_trade_count(7), 2);
    }

    #[test]
    fn test_count_uses_requested_window() {
        let (ledger, clock) = ledger_at(eastern(2025, 3, 17, 12, 0));
        ledger.record_day_trade(
            XYZ,
            1,
            eastern(2025, 3, 17, 10, 0),
            eastern(2025, 3, 17, 11, 0),
        );

        clock.set(eastern(2025, 3, 20, 12, 0));
        assert_eq!(ledger.day_trade_count(5), 1);
        assert_eq!(ledger.day_trade_count(2), 0);
        // Eviction is permanent.
        assert_eq!(ledger.day_trade_count(5), 0);
    }

    #[test]
    fn test_status_reports_days_to_clear() {
        let (ledger, clock) = ledger_at(eastern(2025, 3, 17, 12, 0));
        ledger.record_day_trade(
            XYZ,
            1,
            eastern(2025, 3, 17, 10, 0),
            eastern(2025, 3, 17, 11, 0),
        );
        clock.set(eastern(2025, 3, 19, 11, 0));

        let status = ledger.status();
        assert_eq!(status.day_trade_count, 1);
        assert_eq!(status.remaining, 2);
        assert!(status.can_day_trade);
        assert_eq!(status.recent[0].exit_date, NaiveDate::from_ymd_opt(2025, 3, 17).unwrap());
        assert_eq!(status.recent[0].days_to_clear, 5);
    }

    #[test]
    fn test_reset_clears_records() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 12, 0));
        let at = eastern(2025, 3, 17, 11, 0);
        ledger.record_day_trade(XYZ, 1, at, at);
        ledger.record_day_trade(XYZ, 1, at, at);

        let status = ledger.reset_day_trades();
        assert_eq!(status.day_trade_count, 0);
        assert_eq!(status.remaining, 3);
    }

    #[test]
    fn test_file_backed_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let now = eastern(2025, 3, 17, 16, 0);

        {
            let ledger = PositionLedger::open(
                &path,
                LedgerConfig::default(),
                Arc::new(OccCodec),
                Arc::new(ManualClock::new(now)),
            );
            ledger
                .open_position(XYZ, 4, eastern(2025, 3, 17, 9, 40), dec!(400), None)
                .unwrap();
            ledger
                .close_position(XYZ, 1, eastern(2025, 3, 17, 10, 0))
                .unwrap();
        }

        let reopened = PositionLedger::open(
            &path,
            LedgerConfig::default(),
            Arc::new(OccCodec),
            Arc::new(ManualClock::new(now)),
        );
        assert_eq!(reopened.position(XYZ).unwrap().contracts, 3);
        assert_eq!(reopened.day_trade_count(7), 1);
    }

    #[test]
    fn test_expired_records_dropped_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let at = eastern(2025, 3, 3, 11, 0);

        let store = SnapshotStore::new(&path);
        store
            .save(&LedgerSnapshot {
                positions: Default::default(),
                day_trades: vec![DayTradeRecord {
                    symbol: XYZ.to_string(),
                    entry_time: at,
                    exit_time: at,
                    contracts: 1,
                }],
            })
            .unwrap();

        let _ledger = PositionLedger::open(
            &path,
            LedgerConfig::default(),
            Arc::new(OccCodec),
            Arc::new(ManualClock::new(eastern(2025, 3, 17, 12, 0))),
        );
        assert!(store.load().unwrap().unwrap().day_trades.is_empty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "[[[").unwrap();

        let ledger = PositionLedger::open(
            &path,
            LedgerConfig::default(),
            Arc::new(OccCodec),
            Arc::new(ManualClock::new(eastern(2025, 3, 17, 12, 0))),
        );
        assert!(ledger.open_positions().is_empty());
        assert_eq!(ledger.day_trade_count(7), 0);

        // The next mutation replaces the corrupt file with a valid snapshot.
        ledger
            .open_position(XYZ, 1, eastern(2025, 3, 17, 10, 0), dec!(10), None)
            .unwrap();
        assert_eq!(
            SnapshotStore::new(&path).load().unwrap().unwrap().positions.len(),
            1
        );
    }

    #[test]
    fn test_failed_save_keeps_in_memory_mutation() {
        let dir = tempfile::tempdir().unwrap();
        // The parent of the snapshot path is a regular file, so every save fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let path = blocker.join("ledger.json");

        let ledger = PositionLedger::open(
            &path,
            LedgerConfig::default(),
            Arc::new(OccCodec),
            Arc::new(ManualClock::new(eastern(2025, 3, 17, 16, 0))),
        );
        ledger
            .open_position(XYZ, 2, eastern(2025, 3, 17, 9, 40), dec!(200), None)
            .unwrap();
        assert_eq!(ledger.position(XYZ).unwrap().contracts, 2);

        assert!(ledger
            .close_position(XYZ, 2, eastern(2025, 3, 17, 15, 0))
            .unwrap());
        assert!(ledger.position(XYZ).is_none());
        assert_eq!(ledger.day_trade_count(7), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_contract_overflow_rejected() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        let at = eastern(2025, 3, 17, 10, 0);

        ledger.open_position(XYZ, u32::MAX, at, dec!(0), None).unwrap();
        assert!(matches!(
            ledger.open_position(XYZ, 1, at, dec!(0), None),
            Err(LedgerError::InvalidQuantity { contracts: 1, .. })
        ));
        assert_eq!(ledger.position(XYZ).unwrap().contracts, u32::MAX);
    }

    #[test]
    fn test_unbounded_window_keeps_every_record() {
        let clock = Arc::new(ManualClock::new(eastern(2025, 3, 17, 16, 0)));
        let ledger = PositionLedger::in_memory(
            LedgerConfig {
                window_days: u32::MAX,
                ..LedgerConfig::default()
            },
            Arc::new(OccCodec),
            clock,
        );
        let at = eastern(2020, 1, 6, 10, 0);
        ledger.record_day_trade(XYZ, 1, at, at);

        assert_eq!(ledger.day_trade_count(u32::MAX), 1);
        let status = ledger.status();
        assert_eq!(status.day_trade_count, 1);
        assert!(status.recent[0].days_to_clear > 0);
    }

    #[test]
    fn test_confirmed_fill_moves_entry_to_fill_time() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 18, 16, 0));

        // Booked Monday afternoon, filled Tuesday morning.
        ledger
            .open_position(XYZ, 1, eastern(2025, 3, 17, 15, 55), dec!(100), None)
            .unwrap();
        assert!(ledger.mark_pending(XYZ, "8812"));
        assert_eq!(ledger.position(XYZ).unwrap().pending_order.as_deref(), Some("8812"));

        let filled_at = eastern(2025, 3, 18, 9, 31);
        let confirmed = ledger.confirm_fill(XYZ, filled_at).unwrap();
        assert_eq!(confirmed.entry_time, filled_at);
        assert!(confirmed.pending_order.is_none());

        assert!(ledger
            .close_position(XYZ, 1, eastern(2025, 3, 18, 15, 0))
            .unwrap());
    }

    #[test]
    fn test_confirm_never_moves_entry_backwards() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        let booked = eastern(2025, 3, 17, 10, 0);

        ledger.open_position(XYZ, 1, booked, dec!(100), None).unwrap();
        let confirmed = ledger
            .confirm_fill(XYZ, eastern(2025, 3, 17, 9, 0))
            .unwrap();
        assert_eq!(confirmed.entry_time, booked);
        assert!(ledger.confirm_fill("NOPE250321C00010000", booked).is_none());
    }

    #[test]
    fn test_discard_unfilled_position() {
        let (ledger, _) = ledger_at(eastern(2025, 3, 17, 16, 0));
        ledger
            .open_position(XYZ, 2, eastern(2025, 3, 17, 10, 0), dec!(200), None)
            .unwrap();
        assert!(!ledger.mark_pending("NOPE250321C00010000", "1"));

        assert_eq!(ledger.discard_position(XYZ).unwrap().contracts, 2);
        assert!(ledger.position(XYZ).is_none());
        assert_eq!(ledger.day_trade_count(7), 0);
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let at = eastern(2025, 3, 17, 10, 0);
        let ledger = Arc::new(PositionLedger::open(
            &path,
            LedgerConfig::default(),
            Arc::new(OccCodec),
            Arc::new(ManualClock::new(at)),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        ledger.open_position(XYZ, 1, at, dec!(1), None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.position(XYZ).unwrap().contracts, 200);
        let persisted = SnapshotStore::new(&path).load().unwrap().unwrap();
        assert_eq!(persisted.positions[XYZ].contracts, 200);
        assert_eq!(persisted.positions[XYZ].cost_basis, dec!(200));
    }
}
