//! SQLite trade journal.
//!
//! One row per execution outcome, kept for history and daily reports.
//! The journal is an audit trail only; the ledger snapshot remains the
//! source of truth for positions and day trades.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create journal directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
}

/// One recorded execution outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub underlying: String,
    pub signal: String,
    /// Contract symbol, when one was involved
    pub contract: Option<String>,
    /// executed, rejected or skipped
    pub outcome: String,
    pub quantity: u32,
    pub fill_price: Option<Decimal>,
    pub simulated: bool,
    pub reason: Option<String>,
}

/// Append-only SQLite log of execution outcomes.
pub struct TradeJournal {
    conn: Mutex<Connection>,
}

impl TradeJournal {
    /// Open (or create) the journal database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, JournalError> {
        let db_path = db_path.as_ref();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| JournalError::Directory {
                path: dir.display().to_string(),
                source,
            })?;
        }

        let journal = Self {
            conn: Mutex::new(Connection::open(db_path)?),
        };
        journal.init_schema()?;

        info!("Trade journal opened at {:?}", db_path);
        Ok(journal)
    }

    /// Journal backed by an in-memory database.
    pub fn in_memory() -> Result<Self, JournalError> {
        let journal = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<(), JournalError> {
        self.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                underlying TEXT NOT NULL,
                signal TEXT NOT NULL,
                contract TEXT,
                outcome TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                fill_price TEXT,
                simulated INTEGER NOT NULL,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON executions(timestamp);
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one outcome.
    pub fn record(&self, entry: &JournalEntry) -> Result<(), JournalError> {
        self.lock().execute(
            r#"
            INSERT INTO executions (timestamp, underlying, signal, contract, outcome,
                                    quantity, fill_price, simulated, reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                sortable(entry.timestamp),
                entry.underlying,
                entry.signal,
                entry.contract,
                entry.outcome,
                entry.quantity,
                entry.fill_price.map(|p| p.to_string()),
                entry.simulated,
                entry.reason,
            ],
        )?;
        Ok(())
    }

    /// Newest entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, JournalError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, underlying, signal, contract, outcome,
                   quantity, fill_price, simulated, reason
            FROM executions
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )?;

        let entries = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entries whose timestamp falls on `date` in `tz`, oldest first.
    pub fn entries_on(&self, date: NaiveDate, tz: Tz) -> Result<Vec<JournalEntry>, JournalError> {
        let start = start_of_day(date, tz);
        let end = date
            .succ_opt()
            .map(|next| start_of_day(next, tz))
            .unwrap_or(start + Duration::days(1));

        let conn = self.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, underlying, signal, contract, outcome,
                   quantity, fill_price, simulated, reason
            FROM executions
            WHERE timestamp >= ?1 AND timestamp < ?2
            ORDER BY timestamp ASC, id ASC
            "#,
        )?;

        let entries = stmt
            .query_map(params![sortable(start), sortable(end)], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Fixed-width UTC timestamps compare correctly as text.
fn sortable(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<JournalEntry> {
    let timestamp: String = row.get(0)?;
    let fill_price: Option<String> = row.get(6)?;
    Ok(JournalEntry {
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::MIN_UTC),
        underlying: row.get(1)?,
        signal: row.get(2)?,
        contract: row.get(3)?,
        outcome: row.get(4)?,
        quantity: row.get(5)?,
        fill_price: fill_price.and_then(|p| Decimal::from_str(&p).ok()),
        simulated: row.get(7)?,
        reason: row.get(8)?,
    })
}
