//! Stored records and their closed vocabularies.
//!
//! Every enum here is persisted as its snake_case text form; `as_str`
//! and `FromStr` are the only conversions the store uses.

use crate::types::{AccountNumber, EntityId, Money};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct ParseEnumError {
    pub kind:  &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident : $kind:literal { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// ── Accounts ──────────────────────────────────────────────────────

text_enum!(AccountType: "account type" {
    Savings => "savings",
    Current => "current",
});

text_enum!(
    /// Frozen and closed accounts reject every limited operation.
    AccountStatus: "account status" {
        Active  => "active",
        Frozen  => "frozen",
        Closed  => "closed",
        Dormant => "dormant",
    }
);

impl AccountStatus {
    pub fn allows_debits(&self) -> bool {
        matches!(self, Self::Active | Self::Dormant)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id:            EntityId,
    pub owner_id:              EntityId,
    pub account_number:        AccountNumber,
    pub account_type:          AccountType,
    pub balance:               Money,
    pub currency:              String,
    pub status:                AccountStatus,
    pub daily_limit:           Money,
    pub used_limit:            Money,
    pub last_limit_reset_date: NaiveDate,
    pub opened_at:             DateTime<Utc>,
}

// ── Transactions ──────────────────────────────────────────────────

text_enum!(TransactionType: "transaction type" {
    Deposit       => "deposit",
    Withdrawal    => "withdrawal",
    Transfer      => "transfer",
    BillPayment   => "bill_payment",
    Investment    => "investment",
    LoanRepayment => "loan_repayment",
});

text_enum!(TransactionStatus: "transaction status" {
    Pending   => "pending",
    Completed => "completed",
    Failed    => "failed",
});

text_enum!(
    /// How a pending row is finished by the settlement job.
    SettlementMode: "settlement mode" {
        /// Nothing moved yet: debit (and credit) at settlement time.
        Deferred => "deferred",
        /// Sender already debited when the row was written.
        Reserved => "reserved",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id:      EntityId,
    pub owner_id:            EntityId,
    pub account_id:          EntityId,
    pub txn_type:            TransactionType,
    /// Negative for debits, positive for credits.
    pub amount:              Money,
    pub currency:            String,
    pub status:              TransactionStatus,
    pub counterpart_name:    Option<String>,
    pub counterpart_account: Option<String>,
    pub description:         String,
    pub category:            String,
    pub is_flagged:          bool,
    pub risk_score:          u8,
    pub scheduled_date:      Option<DateTime<Utc>>,
    pub settlement_mode:     Option<SettlementMode>,
    pub created_at:          DateTime<Utc>,
}

// ── Users (risk subset) ───────────────────────────────────────────

text_enum!(RiskLevel: "risk level" {
    Low    => "low",
    Medium => "medium",
    High   => "high",
});

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        if score >= 75 {
            Self::High
        } else if score >= 40 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

text_enum!(UserAccountStatus: "user account status" {
    Active  => "active",
    Frozen  => "frozen",
    Blocked => "blocked",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id:        EntityId,
    pub name:           String,
    pub risk_score:     u8,
    pub risk_level:     RiskLevel,
    pub is_pep:         bool,
    pub account_status: UserAccountStatus,
    pub created_at:     DateTime<Utc>,
}

// ── Compliance ────────────────────────────────────────────────────

text_enum!(ComplianceRule: "compliance rule" {
    LargeTransaction => "large_transaction",
    VelocityCheck    => "velocity_check",
    Structuring      => "structuring",
    SanctionMatch    => "sanction_match",
    HighRiskCountry  => "high_risk_country",
});

text_enum!(Severity: "severity" {
    Low      => "low",
    Medium   => "medium",
    High     => "high",
    Critical => "critical",
});

impl Severity {
    /// Points added to the user's risk score when a rule of this severity fires.
    pub fn risk_points(&self) -> u8 {
        match self {
            Self::Critical => 40,
            Self::High     => 20,
            Self::Medium   => 10,
            Self::Low      => 5,
        }
    }
}

text_enum!(ReviewStatus: "review status" {
    PendingReview => "pending_review",
    Approved      => "approved",
    Rejected      => "rejected",
    Blocked       => "blocked",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousActivityRecord {
    pub activity_id:    EntityId,
    pub user_id:        EntityId,
    pub transaction_id: Option<EntityId>,
    pub rule:           ComplianceRule,
    pub severity:       Severity,
    pub status:         ReviewStatus,
    pub metadata:       serde_json::Value,
    pub remarks:        Option<String>,
    pub created_at:     DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionEntry {
    pub entry_id: EntityId,
    pub name:     String,
    pub program:  String,
    pub country:  Option<String>,
}

// ── Loans ─────────────────────────────────────────────────────────

text_enum!(LoanType: "loan type" {
    Personal  => "personal",
    Home      => "home",
    Auto      => "auto",
    Education => "education",
    Business  => "business",
});

text_enum!(LoanStatus: "loan status" {
    Pending  => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

/// Underwriting snapshot stored with the loan at application time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub risk_score:             i32,
    pub approval_probability:   u8,
    pub max_loan_limit:         Money,
    pub assigned_interest_rate: Money,
    pub eligible:               bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmiInstallment {
    pub month:               u32,
    pub principal_component: Money,
    pub interest_component:  Money,
    pub remaining_balance:   Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub loan_id:           EntityId,
    pub owner_id:          EntityId,
    pub loan_type:         LoanType,
    pub principal:         Money,
    pub tenure_months:     u32,
    pub interest_rate:     Money,
    pub emi:               Money,
    pub remaining_balance: Money,
    pub status:            LoanStatus,
    pub risk_profile:      RiskProfile,
    pub emi_schedule:      Vec<EmiInstallment>,
    pub created_at:        DateTime<Utc>,
    pub reviewed_by:       Option<EntityId>,
    pub reviewed_at:       Option<DateTime<Utc>>,
}

// ── Debit side records ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    pub bill_id:        EntityId,
    pub owner_id:       EntityId,
    pub transaction_id: EntityId,
    pub biller_name:    String,
    pub consumer_ref:   String,
    pub amount:         Money,
    pub paid_at:        DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentRecord {
    pub investment_id:  EntityId,
    pub owner_id:       EntityId,
    pub transaction_id: EntityId,
    pub plan:           String,
    pub amount:         Money,
    pub tenure_months:  u32,
    pub maturity_date:  NaiveDate,
    pub created_at:     DateTime<Utc>,
}
