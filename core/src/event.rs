//! Side effects produced by ledger operations.
//!
//! RULE: Operations never call the audit sink or notifier from inside
//! an atomic scope. They collect `SideEffects` while the scope runs and
//! the engine dispatches them only after commit.

use crate::types::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Critical,
    /// Irreversible state changes such as account freezes.
    Destructive,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info        => "info",
            Self::Warning     => "warning",
            Self::Critical    => "critical",
            Self::Destructive => "destructive",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id:    EntityId,
    pub action:      String,
    pub entity_type: String,
    pub entity_id:   EntityId,
    pub before:      Option<serde_json::Value>,
    pub after:       Option<serde_json::Value>,
    pub severity:    AuditSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Credit,
    Debit,
    TransferScheduled,
    TransferSettled,
    TransferFailed,
    ComplianceAlert,
    AccountFrozen,
    LoanUpdate,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit            => "credit",
            Self::Debit             => "debit",
            Self::TransferScheduled => "transfer_scheduled",
            Self::TransferSettled   => "transfer_settled",
            Self::TransferFailed    => "transfer_failed",
            Self::ComplianceAlert   => "compliance_alert",
            Self::AccountFrozen     => "account_frozen",
            Self::LoanUpdate        => "loan_update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: EntityId,
    pub kind:    NotificationKind,
    pub message: String,
}

/// Everything an operation wants published once its scope has committed.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pub audits:        Vec<AuditEntry>,
    pub notifications: Vec<Notification>,
}

impl SideEffects {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn audit(
        &mut self,
        actor_id: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
        severity: AuditSeverity,
    ) {
        self.audits.push(AuditEntry {
            actor_id:    actor_id.to_string(),
            action:      action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id:   entity_id.to_string(),
            before,
            after,
            severity,
        });
    }

    pub fn notify(&mut self, user_id: &str, kind: NotificationKind, message: String) {
        self.notifications.push(Notification {
            user_id: user_id.to_string(),
            kind,
            message,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.audits.is_empty() && self.notifications.is_empty()
    }
}
