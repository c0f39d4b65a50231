//! Typed inbound payloads.
//!
//! Each request is validated before it reaches an atomic scope, so the
//! ledger never starts a transaction for a malformed amount or date.

use crate::{
    error::{LedgerError, LedgerResult},
    model::LoanType,
    types::{AccountNumber, EntityId, Money},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Positive, at most two decimal places.
pub fn validate_amount(amount: Money) -> LedgerResult<()> {
    if amount <= Money::ZERO {
        return Err(LedgerError::InvalidAmount { amount, reason: "must be positive" });
    }
    if amount.normalize().scale() > 2 {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: "more than two decimal places",
        });
    }
    Ok(())
}

fn require(field: &str, value: &str) -> LedgerResult<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::InvalidRequest(format!("{field} is required")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender_id:               EntityId,
    pub receiver_account_number: AccountNumber,
    pub amount:                  Money,
    #[serde(default)]
    pub description:             String,
}

impl TransferRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        require("sender_id", &self.sender_id)?;
        require("receiver_account_number", &self.receiver_account_number)?;
        validate_amount(self.amount)
    }
}

/// Beneficiary at another bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalBankDetails {
    pub account_holder: String,
    pub account_number: String,
    pub bank_name:      String,
    pub routing_code:   String,
    /// ISO country code of the receiving bank, when known.
    #[serde(default)]
    pub country:        Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTransferRequest {
    pub sender_id:   EntityId,
    pub bank:        ExternalBankDetails,
    pub amount:      Money,
    #[serde(default)]
    pub description: String,
}

impl ExternalTransferRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        require("sender_id", &self.sender_id)?;
        require("bank.account_holder", &self.bank.account_holder)?;
        require("bank.account_number", &self.bank.account_number)?;
        require("bank.routing_code", &self.bank.routing_code)?;
        validate_amount(self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTransferRequest {
    pub sender_id:               EntityId,
    pub receiver_account_number: AccountNumber,
    pub amount:                  Money,
    pub scheduled_date:          DateTime<Utc>,
    #[serde(default)]
    pub description:             String,
}

impl ScheduledTransferRequest {
    /// `now` comes from the ledger clock.
    pub fn validate(&self, now: DateTime<Utc>) -> LedgerResult<()> {
        require("sender_id", &self.sender_id)?;
        require("receiver_account_number", &self.receiver_account_number)?;
        validate_amount(self.amount)?;
        if self.scheduled_date <= now {
            return Err(LedgerError::ScheduledDateNotInFuture);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillPaymentRequest {
    pub owner_id:     EntityId,
    pub biller_name:  String,
    pub consumer_ref: String,
    pub amount:       Money,
}

impl BillPaymentRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        require("owner_id", &self.owner_id)?;
        require("biller_name", &self.biller_name)?;
        require("consumer_ref", &self.consumer_ref)?;
        validate_amount(self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRepaymentRequest {
    pub owner_id: EntityId,
    pub loan_id:  EntityId,
    pub amount:   Money,
}

impl LoanRepaymentRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        require("owner_id", &self.owner_id)?;
        require("loan_id", &self.loan_id)?;
        validate_amount(self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestmentRequest {
    pub owner_id:      EntityId,
    pub plan:          String,
    pub amount:        Money,
    pub tenure_months: u32,
}

impl InvestmentRequest {
    pub fn validate(&self) -> LedgerResult<()> {
        require("owner_id", &self.owner_id)?;
        require("plan", &self.plan)?;
        if self.tenure_months == 0 {
            return Err(LedgerError::InvalidRequest("tenure_months must be at least 1".into()));
        }
        validate_amount(self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanApplication {
    pub owner_id:                EntityId,
    pub loan_type:               LoanType,
    pub principal:               Money,
    pub tenure_months:           u32,
    pub declared_monthly_income: Money,
}

impl LoanApplication {
    pub fn validate(&self) -> LedgerResult<()> {
        require("owner_id", &self.owner_id)?;
        validate_amount(self.principal)?;
        if self.tenure_months == 0 {
            return Err(LedgerError::InvalidRequest("tenure_months must be at least 1".into()));
        }
        validate_amount(self.declared_monthly_income)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn amounts_must_be_positive_cents() {
        assert!(validate_amount(dec!(10.50)).is_ok());
        assert!(validate_amount(dec!(10.500)).is_ok());
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
        assert!(validate_amount(dec!(0.001)).is_err());
    }

    #[test]
    fn scheduled_date_must_be_strictly_future() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut req = ScheduledTransferRequest {
            sender_id:               "u1".into(),
            receiver_account_number: "100000000002".into(),
            amount:                  dec!(100),
            scheduled_date:          now,
            description:             String::new(),
        };
        assert!(matches!(req.validate(now), Err(LedgerError::ScheduledDateNotInFuture)));
        req.scheduled_date = now + Duration::seconds(1);
        assert!(req.validate(now).is_ok());
    }
}
