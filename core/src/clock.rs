//! Ledger clock: the single source of "now" and "today".
//!
//! RULE: No ledger decision reads the system time directly.
//! Limit resets, velocity windows and settlement due-dates all go
//! through a Clock so tests can pin and advance time. Only the
//! audit and notification sinks stamp rows with database time.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used for daily-limit resets.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }

    /// Advance by `by`. Returns the new time.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut current = self.current.lock();
        *current += by;
        *current
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
