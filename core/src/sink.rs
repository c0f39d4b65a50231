//! Collaborator contracts at the edge of the ledger core.
//!
//! The ledger only ever talks to auditing, notification delivery and
//! the sanctions list through these traits. The store-backed
//! implementations below are what the runner wires in; callers may
//! substitute their own.

use crate::{
    error::LedgerResult,
    event::{AuditEntry, Notification},
    model::SanctionEntry,
    store::LedgerStore,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Append-only audit trail.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()>;
}

/// Best-effort message delivery.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> LedgerResult<()>;
}

/// Sanctions list lookups.
pub trait SanctionsList: Send + Sync {
    /// Case-insensitive substring search over listed names.
    fn find_by_name(&self, name: &str) -> LedgerResult<Vec<SanctionEntry>>;
}

// ── Store-backed implementations ─────────────────────────────────

pub struct StoreAuditSink {
    store: Arc<LedgerStore>,
}

impl StoreAuditSink {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

impl AuditSink for StoreAuditSink {
    fn append(&self, entry: &AuditEntry) -> LedgerResult<()> {
        self.store.atomic(|tx| tx.append_audit(entry))
    }
}

pub struct StoreNotifier {
    store: Arc<LedgerStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

impl Notifier for StoreNotifier {
    fn notify(&self, notification: &Notification) -> LedgerResult<()> {
        self.store.atomic(|tx| tx.insert_notification(notification))
    }
}

pub struct StoreSanctionsList {
    store: Arc<LedgerStore>,
}

impl StoreSanctionsList {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }
}

impl SanctionsList for StoreSanctionsList {
    fn find_by_name(&self, name: &str) -> LedgerResult<Vec<SanctionEntry>> {
        self.store.read(|tx| tx.sanctions_matching(name))
    }
}

/// Keeps notifications in memory. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: &Notification) -> LedgerResult<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}
