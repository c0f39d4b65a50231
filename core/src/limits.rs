//! Daily spending limit and debit guards.
//!
//! These mutate an `AccountRecord` read inside the caller's atomic
//! scope; the caller persists it in that same scope. Reset, check and
//! debit therefore commit together or not at all.

use crate::{
    error::{LedgerError, LedgerResult},
    model::AccountRecord,
    types::Money,
};
use chrono::NaiveDate;

/// Reset the day's usage if `today` is a new calendar day, then require
/// that `amount` fits in what is left.
pub fn reserve_daily_limit(
    account: &mut AccountRecord,
    amount: Money,
    today: NaiveDate,
) -> LedgerResult<()> {
    if account.last_limit_reset_date != today {
        account.used_limit = Money::ZERO;
        account.last_limit_reset_date = today;
    }
    if account.used_limit + amount > account.daily_limit {
        let remaining = (account.daily_limit - account.used_limit).max(Money::ZERO);
        return Err(LedgerError::DailyLimitExceeded { remaining });
    }
    account.used_limit += amount;
    Ok(())
}

/// Frozen and closed accounts take no debits.
pub fn ensure_debitable(account: &AccountRecord) -> LedgerResult<()> {
    if !account.status.allows_debits() {
        return Err(LedgerError::AccountNotActive {
            account_number: account.account_number.clone(),
            status: account.status.to_string(),
        });
    }
    Ok(())
}

pub fn ensure_funds(account: &AccountRecord, amount: Money) -> LedgerResult<()> {
    if account.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            available: account.balance,
            requested: amount,
        });
    }
    Ok(())
}

/// Status, funds and daily limit, in that order, then the debit itself.
pub fn apply_limited_debit(
    account: &mut AccountRecord,
    amount: Money,
    today: NaiveDate,
) -> LedgerResult<()> {
    ensure_debitable(account)?;
    ensure_funds(account, amount)?;
    reserve_daily_limit(account, amount, today)?;
    account.balance -= amount;
    Ok(())
}
