//! Shared primitive types used across the ledger.

use rust_decimal::{Decimal, RoundingStrategy};

/// A stable, unique identifier for any stored entity (uuid v4 text).
pub type EntityId = String;

/// The customer-facing account number.
pub type AccountNumber = String;

/// All monetary amounts.
pub type Money = Decimal;

/// Round a monetary value to cents, halves away from zero.
pub fn round_money(value: Money) -> Money {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Generate a fresh entity id.
pub fn new_id() -> EntityId {
    uuid::Uuid::new_v4().to_string()
}
