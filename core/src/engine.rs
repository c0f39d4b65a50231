//! The ledger engine: the one entry point for every money movement.
//!
//! RULES:
//!   - Every operation that writes runs inside exactly one `commit` scope.
//!   - Accounts are re-read by id inside the scope that mutates them;
//!     no account record is carried across scopes and then saved.
//!   - Audit entries and notifications are collected during the scope
//!     and dispatched only after it commits. Dispatch failures are
//!     logged and swallowed.
//!   - Sanctions lookups happen before a scope opens, never inside one.
//!
//! Operations are split by concern across the `*_subsystem` modules,
//! each adding an `impl LedgerEngine` block.

use crate::{
    clock::{Clock, ManualClock, SystemClock},
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    event::{AuditSeverity, SideEffects},
    model::{
        AccountRecord, AccountStatus, AccountType, RiskLevel, SanctionEntry, TransactionRecord,
        TransactionStatus, UserAccountStatus, UserRecord,
    },
    requests::validate_amount,
    sink::{AuditSink, Notifier, SanctionsList, StoreAuditSink, StoreNotifier, StoreSanctionsList},
    store::{AuditRow, LedgerStore, StoreTx},
    types::{new_id, Money},
};
use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;

/// Attempts at drawing an unused account number before giving up.
const ACCOUNT_NUMBER_ATTEMPTS: usize = 16;

/// Actor recorded on audit entries the engine writes on its own behalf.
pub const SYSTEM_ACTOR: &str = "system";

pub struct LedgerEngine {
    pub store:            Arc<LedgerStore>,
    pub config:           LedgerConfig,
    pub(crate) clock:     Arc<dyn Clock>,
    pub(crate) audit:     Arc<dyn AuditSink>,
    pub(crate) notifier:  Arc<dyn Notifier>,
    pub(crate) sanctions: Arc<dyn SanctionsList>,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<LedgerStore>,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn Notifier>,
        sanctions: Arc<dyn SanctionsList>,
    ) -> Self {
        Self { store, config, clock, audit, notifier, sanctions }
    }

    /// Wire an engine against `store` with the store-backed collaborators
    /// and the wall clock. The store must already be migrated.
    pub fn build(store: Arc<LedgerStore>, config: LedgerConfig) -> Self {
        let audit = Arc::new(StoreAuditSink::new(store.clone()));
        let notifier = Arc::new(StoreNotifier::new(store.clone()));
        let sanctions = Arc::new(StoreSanctionsList::new(store.clone()));
        Self::new(store, config, Arc::new(SystemClock), audit, notifier, sanctions)
    }

    /// In-memory store, default config, and a clock the test controls.
    pub fn build_test(clock: Arc<ManualClock>) -> LedgerResult<Self> {
        let store = Arc::new(LedgerStore::in_memory()?);
        store.migrate()?;
        let audit = Arc::new(StoreAuditSink::new(store.clone()));
        let notifier = Arc::new(StoreNotifier::new(store.clone()));
        let sanctions = Arc::new(StoreSanctionsList::new(store.clone()));
        Ok(Self::new(store, LedgerConfig::default(), clock, audit, notifier, sanctions))
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Run `f` in one write scope, then publish what it collected.
    pub(crate) fn commit<T>(
        &self,
        f: impl FnOnce(&StoreTx<'_>, &mut SideEffects) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut effects = SideEffects::new();
        let out = self.store.atomic(|tx| f(tx, &mut effects))?;
        self.dispatch(effects);
        Ok(out)
    }

    /// Deliver side effects once the scope has committed. Delivery runs on
    /// the caller's thread and failures are only logged, so a slow or
    /// broken sink delays the return but never changes the result. A
    /// `Notifier` that must not block should enqueue and return.
    fn dispatch(&self, effects: SideEffects) {
        if effects.is_empty() {
            return;
        }
        for entry in &effects.audits {
            if let Err(e) = self.audit.append(entry) {
                warn!("audit append failed for {} {}: {e}", entry.entity_type, entry.entity_id);
            }
        }
        for notification in &effects.notifications {
            if let Err(e) = self.notifier.notify(notification) {
                warn!(
                    "notification {} to {} dropped: {e}",
                    notification.kind.as_str(),
                    notification.user_id
                );
            }
        }
    }

    // ── Users and accounts ────────────────────────────────────────

    pub fn register_user(&self, name: &str, is_pep: bool) -> LedgerResult<UserRecord> {
        if name.trim().is_empty() {
            return Err(LedgerError::InvalidRequest("name is required".into()));
        }
        let user = UserRecord {
            user_id:        new_id(),
            name:           name.trim().to_string(),
            risk_score:     0,
            risk_level:     RiskLevel::Low,
            is_pep,
            account_status: UserAccountStatus::Active,
            created_at:     self.clock.now(),
        };
        self.commit(|tx, fx| {
            tx.insert_user(&user)?;
            fx.audit(
                SYSTEM_ACTOR,
                "user_registered",
                "user",
                &user.user_id,
                None,
                Some(serde_json::to_value(&user)?),
                AuditSeverity::Info,
            );
            Ok(())
        })?;
        debug!("registered user {}", user.user_id);
        Ok(user)
    }

    /// Open an account with a fresh 12-digit number.
    /// `daily_limit` falls back to the configured default.
    pub fn open_account(
        &self,
        owner_id: &str,
        account_type: AccountType,
        daily_limit: Option<Money>,
    ) -> LedgerResult<AccountRecord> {
        let daily_limit = daily_limit.unwrap_or(self.config.limits.default_daily_limit);
        validate_amount(daily_limit)?;
        let now = self.clock.now();
        let account = self.commit(|tx, fx| {
            let user = tx
                .user(owner_id)?
                .ok_or_else(|| LedgerError::UserNotFound { user_id: owner_id.to_string() })?;
            if user.account_status != UserAccountStatus::Active {
                return Err(LedgerError::InvalidTransition(format!(
                    "user {owner_id} is {} and cannot open accounts",
                    user.account_status
                )));
            }
            let account_number = self.unused_account_number(tx)?;
            let account = AccountRecord {
                account_id:            new_id(),
                owner_id:              owner_id.to_string(),
                account_number,
                account_type,
                balance:               Money::ZERO,
                currency:              self.config.limits.default_currency.clone(),
                status:                AccountStatus::Active,
                daily_limit,
                used_limit:            Money::ZERO,
                last_limit_reset_date: now.date_naive(),
                opened_at:             now,
            };
            tx.insert_account(&account)?;
            fx.audit(
                owner_id,
                "account_opened",
                "account",
                &account.account_id,
                None,
                Some(serde_json::to_value(&account)?),
                AuditSeverity::Info,
            );
            Ok(account)
        })?;
        info!("opened {} account {} for {owner_id}", account.account_type, account.account_number);
        Ok(account)
    }

    fn unused_account_number(&self, tx: &StoreTx<'_>) -> LedgerResult<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..ACCOUNT_NUMBER_ATTEMPTS {
            let candidate = rng.gen_range(100_000_000_000u64..1_000_000_000_000u64).to_string();
            if !tx.account_number_taken(&candidate)? {
                return Ok(candidate);
            }
        }
        Err(LedgerError::InvalidTransition("no free account number available".into()))
    }

    /// Status changes by an operator. `closed` is terminal and needs a zero balance.
    pub fn set_account_status(
        &self,
        actor_id: &str,
        account_number: &str,
        status: AccountStatus,
    ) -> LedgerResult<AccountRecord> {
        self.commit(|tx, fx| {
            let mut account = tx
                .account_by_number(account_number)?
                .ok_or_else(|| LedgerError::AccountNotFound { reference: account_number.to_string() })?;
            if account.status == AccountStatus::Closed {
                return Err(LedgerError::InvalidTransition(format!(
                    "account {account_number} is closed"
                )));
            }
            if status == AccountStatus::Closed && account.balance != Money::ZERO {
                return Err(LedgerError::InvalidTransition(format!(
                    "account {account_number} still holds {}",
                    account.balance
                )));
            }
            let before = serde_json::to_value(&account)?;
            account.status = status;
            tx.save_account(&account)?;
            let severity = match status {
                AccountStatus::Frozen | AccountStatus::Closed => AuditSeverity::Destructive,
                _ => AuditSeverity::Warning,
            };
            fx.audit(
                actor_id,
                "account_status_changed",
                "account",
                &account.account_id,
                Some(before),
                Some(serde_json::to_value(&account)?),
                severity,
            );
            Ok(account)
        })
    }

    pub fn set_daily_limit(
        &self,
        actor_id: &str,
        account_number: &str,
        daily_limit: Money,
    ) -> LedgerResult<AccountRecord> {
        validate_amount(daily_limit)?;
        self.commit(|tx, fx| {
            let mut account = tx
                .account_by_number(account_number)?
                .ok_or_else(|| LedgerError::AccountNotFound { reference: account_number.to_string() })?;
            let before = account.daily_limit;
            account.daily_limit = daily_limit;
            tx.save_account(&account)?;
            fx.audit(
                actor_id,
                "daily_limit_changed",
                "account",
                &account.account_id,
                Some(serde_json::json!({ "daily_limit": before })),
                Some(serde_json::json!({ "daily_limit": daily_limit })),
                AuditSeverity::Warning,
            );
            Ok(account)
        })
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn user(&self, user_id: &str) -> LedgerResult<UserRecord> {
        self.store
            .read(|tx| tx.user(user_id))?
            .ok_or_else(|| LedgerError::UserNotFound { user_id: user_id.to_string() })
    }

    pub fn account(&self, account_number: &str) -> LedgerResult<AccountRecord> {
        self.store
            .read(|tx| tx.account_by_number(account_number))?
            .ok_or_else(|| LedgerError::AccountNotFound { reference: account_number.to_string() })
    }

    pub fn accounts_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<AccountRecord>> {
        self.store.read(|tx| tx.accounts_for_owner(owner_id))
    }

    pub fn transaction(&self, transaction_id: &str) -> LedgerResult<TransactionRecord> {
        self.store
            .read(|tx| tx.transaction(transaction_id))?
            .ok_or_else(|| LedgerError::RecordNotFound { id: transaction_id.to_string() })
    }

    /// Newest first.
    pub fn transaction_history(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        self.store.read(|tx| tx.transactions_for_owner(owner_id, limit))
    }

    pub fn pending_transactions(&self) -> LedgerResult<Vec<TransactionRecord>> {
        self.store.read(|tx| tx.transactions_by_status(TransactionStatus::Pending))
    }

    /// Sum of every account balance in the system.
    pub fn total_balance(&self) -> LedgerResult<Money> {
        self.store.read(|tx| tx.total_balance())
    }

    /// (kind, message) pairs delivered through the store-backed notifier.
    pub fn notifications_for_user(&self, user_id: &str) -> LedgerResult<Vec<(String, String)>> {
        self.store.read(|tx| tx.notifications_for_user(user_id))
    }

    pub fn audit_trail(&self, entity_id: &str) -> LedgerResult<Vec<AuditRow>> {
        self.store.read(|tx| tx.audit_for_entity(entity_id))
    }

    /// Sanctions entries whose name contains `name`, ignoring case.
    pub fn search_sanctions(&self, name: &str) -> LedgerResult<Vec<SanctionEntry>> {
        self.sanctions.find_by_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::AuditEntry, sink::MemoryNotifier};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct BrokenAuditSink;

    impl AuditSink for BrokenAuditSink {
        fn append(&self, _entry: &AuditEntry) -> LedgerResult<()> {
            Err(LedgerError::Other(anyhow::anyhow!("audit store offline")))
        }
    }

    fn engine_with(notifier: Arc<MemoryNotifier>) -> LedgerEngine {
        let store = Arc::new(LedgerStore::in_memory().unwrap());
        store.migrate().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()));
        let sanctions = Arc::new(StoreSanctionsList::new(store.clone()));
        LedgerEngine::new(
            store,
            LedgerConfig::default(),
            clock,
            Arc::new(BrokenAuditSink),
            notifier,
            sanctions,
        )
    }

    #[test]
    fn side_effect_failures_never_undo_the_commit() {
        let notifier = Arc::new(MemoryNotifier::new());
        let engine = engine_with(notifier.clone());
        let user = engine.register_user("Dana", false).unwrap();
        let account = engine.open_account(&user.user_id, AccountType::Savings, None).unwrap();
        engine.deposit(&user.user_id, dec!(125.50)).unwrap();

        assert_eq!(engine.account(&account.account_number).unwrap().balance, dec!(125.50));
        assert!(engine.audit_trail(&account.account_id).unwrap().is_empty());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, user.user_id);
        assert!(sent[0].message.contains("125.50"));
    }

    #[test]
    fn nothing_is_dispatched_when_the_scope_fails() {
        let notifier = Arc::new(MemoryNotifier::new());
        let engine = engine_with(notifier.clone());
        let user = engine.register_user("Eli", false).unwrap();
        engine.open_account(&user.user_id, AccountType::Current, None).unwrap();

        assert!(engine.withdraw(&user.user_id, dec!(10)).is_err());
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn account_numbers_are_twelve_digits_and_unique() {
        let engine = engine_with(Arc::new(MemoryNotifier::new()));
        let user = engine.register_user("Fay", false).unwrap();
        let a = engine.open_account(&user.user_id, AccountType::Savings, None).unwrap();
        let b = engine.open_account(&user.user_id, AccountType::Current, None).unwrap();
        for account in [&a, &b] {
            assert_eq!(account.account_number.len(), 12);
            assert!(account.account_number.chars().all(|c| c.is_ascii_digit()));
        }
        assert_ne!(a.account_number, b.account_number);
        assert!(matches!(
            engine.open_account("nobody", AccountType::Savings, None),
            Err(LedgerError::UserNotFound { .. })
        ));
    }
}
