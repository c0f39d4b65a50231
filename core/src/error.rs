use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    // ── Validation ─────────────────────────────────────────────
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },

    #[error("Scheduled date must be in the future")]
    ScheduledDateNotInFuture,

    #[error("Sender and receiver accounts are the same")]
    SelfTransferRejected,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── State ──────────────────────────────────────────────────
    #[error("No account found for '{reference}'")]
    AccountNotFound { reference: String },

    #[error("Receiver account '{account_number}' not found")]
    ReceiverNotFound { account_number: String },

    #[error("Account {account_number} is {status}")]
    AccountNotActive { account_number: String, status: String },

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("Daily limit exceeded: remaining allowance {remaining}")]
    DailyLimitExceeded { remaining: Decimal },

    #[error("User '{user_id}' not found")]
    UserNotFound { user_id: String },

    #[error("Loan '{loan_id}' not found")]
    LoanNotFound { loan_id: String },

    #[error("Loan '{loan_id}' is {status}")]
    LoanNotRepayable { loan_id: String, status: String },

    #[error("Record '{id}' already reviewed ({status})")]
    AlreadyReviewed { id: String, status: String },

    #[error("Record '{id}' not found")]
    RecordNotFound { id: String },

    #[error("Transition not allowed: {0}")]
    InvalidTransition(String),

    // ── Compliance ─────────────────────────────────────────────
    #[error("Transaction blocked by compliance: {reason}")]
    ComplianceBlocked { reason: String },

    // ── Infrastructure ─────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by callers to map failures to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Compliance,
    Infrastructure,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::ScheduledDateNotInFuture
            | Self::SelfTransferRejected
            | Self::InvalidRequest(_) => ErrorKind::Validation,

            Self::AccountNotFound { .. }
            | Self::ReceiverNotFound { .. }
            | Self::AccountNotActive { .. }
            | Self::InsufficientFunds { .. }
            | Self::DailyLimitExceeded { .. }
            | Self::UserNotFound { .. }
            | Self::LoanNotFound { .. }
            | Self::LoanNotRepayable { .. }
            | Self::AlreadyReviewed { .. }
            | Self::RecordNotFound { .. }
            | Self::InvalidTransition(_) => ErrorKind::State,

            Self::ComplianceBlocked { .. } => ErrorKind::Compliance,

            Self::Database(_) | Self::Serialization(_) | Self::Scheduler(_) | Self::Other(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Infrastructure failures may succeed if the caller tries again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
