//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The engine and subsystems call `StoreTx` methods inside an atomic
//! scope; they never execute SQL directly.
//!
//! Concurrency: one connection per store behind a mutex, and every
//! scope that writes opens with `BEGIN IMMEDIATE`, so read-modify-write
//! on balances and limits cannot interleave. Other processes sharing the
//! file wait up to `BUSY_TIMEOUT` and then fail with a database error.

use crate::error::LedgerResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use std::{str::FromStr, time::Duration};

mod account;
mod audit;
pub use audit::AuditRow;
mod compliance;
mod loan;
mod transaction;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LedgerStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

/// A live storage transaction. Dropping it without `commit` rolls back.
pub struct StoreTx<'c> {
    conn: Transaction<'c>,
}

impl LedgerStore {
    pub fn open(path: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> LedgerResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(include_str!("../../migrations/001_accounts.sql"))?;
        conn.execute_batch(include_str!("../../migrations/002_transactions.sql"))?;
        conn.execute_batch(include_str!("../../migrations/003_compliance.sql"))?;
        conn.execute_batch(include_str!("../../migrations/004_loans.sql"))?;
        conn.execute_batch(include_str!("../../migrations/005_audit.sql"))?;
        Ok(())
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns Ok; any Err rolls back every write `f`
    /// made, so callers never observe partial state.
    pub fn atomic<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut conn = self.conn.lock();
        let scope = StoreTx {
            conn: conn.transaction_with_behavior(TransactionBehavior::Immediate)?,
        };
        let out = f(&scope)?;
        scope.conn.commit()?;
        Ok(out)
    }

    /// Run `f` against a consistent read snapshot. Writes are discarded.
    pub fn read<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> LedgerResult<T>) -> LedgerResult<T> {
        let mut conn = self.conn.lock();
        let scope = StoreTx {
            conn: conn.transaction_with_behavior(TransactionBehavior::Deferred)?,
        };
        f(&scope)
    }
}

// ── Column codecs ─────────────────────────────────────────────────

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn instant_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

pub(crate) fn opt_instant_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(millis) => DateTime::from_timestamp_millis(millis)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis)),
        None => Ok(None),
    }
}

pub(crate) fn enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_enum_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn json_at<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
