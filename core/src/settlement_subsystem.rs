//! Scheduled settlement: finishes pending transfers once they fall due.
//!
//! A pending row is settled according to its settlement mode:
//!   - deferred: nothing has moved yet. Sender status, balance and daily
//!     limit are checked now, the sender is debited and the receiver is
//!     credited if the account number resolves here (otherwise the
//!     transfer is external and only the debit exists).
//!   - reserved: the sender was debited when the row was written; the
//!     row is only marked completed.
//!
//! Each row settles in its own scope. A validation or state failure
//! rolls that scope back and marks the row `failed` (terminal) in a
//! second scope. Infrastructure failures leave the row pending for the
//! next sweep.
//!
//! `SettlementScheduler` runs sweeps on a tokio interval: a timer task
//! queues due ids, a worker settles them one at a time on the blocking
//! pool.

use crate::{
    engine::{LedgerEngine, SYSTEM_ACTOR},
    error::{LedgerError, LedgerResult},
    event::{AuditSeverity, NotificationKind, SideEffects},
    ledger_subsystem::ledger_row,
    limits::{apply_limited_debit, ensure_debitable},
    model::{SettlementMode, TransactionRecord, TransactionStatus, TransactionType},
    store::StoreTx,
    types::{EntityId, Money},
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    /// Marked `failed`; will not be retried.
    Failed { reason: String },
    /// Not pending, not yet due, or already handled elsewhere.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub settled: usize,
    pub failed:  usize,
    pub skipped: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled        => self.settled += 1,
            SettlementOutcome::Failed { .. }  => self.failed += 1,
            SettlementOutcome::Skipped        => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.settled += other.settled;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.settled + self.failed + self.skipped
    }
}

impl LedgerEngine {
    /// Ids of pending rows due at the current clock time, oldest due first.
    pub fn due_settlements(&self) -> LedgerResult<Vec<EntityId>> {
        let now = self.clock.now();
        let due = self.store.read(|tx| tx.due_pending_transactions(now))?;
        Ok(due.into_iter().map(|t| t.transaction_id).collect())
    }

    /// Settle everything currently due. One row's failure never stops the rest.
    pub fn sweep(&self) -> LedgerResult<SweepReport> {
        let due = self.due_settlements()?;
        let mut report = SweepReport::default();
        for transaction_id in &due {
            match self.settle_one(transaction_id) {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    warn!("settlement of {transaction_id} left pending: {e}");
                    report.skipped += 1;
                }
            }
        }
        if !due.is_empty() {
            info!(
                "settlement sweep: {} settled, {} failed, {} skipped",
                report.settled, report.failed, report.skipped
            );
        }
        Ok(report)
    }

    /// Settle one pending row if it is due.
    ///
    /// Returns Err only for infrastructure failures, which leave the row pending.
    pub fn settle_one(&self, transaction_id: &str) -> LedgerResult<SettlementOutcome> {
        let now = self.clock.now();
        let attempt = self.commit(|tx, fx| {
            let Some(row) = tx.transaction(transaction_id)? else {
                return Ok(false);
            };
            let due = row.scheduled_date.is_some_and(|at| at <= now);
            if row.status != TransactionStatus::Pending || !due {
                return Ok(false);
            }
            if !tx.finish_pending(transaction_id, TransactionStatus::Completed)? {
                return Ok(false);
            }
            // A failed deferred debit rolls the status change back with it.
            let amount = row.amount.abs();
            if row.settlement_mode.unwrap_or(SettlementMode::Deferred) == SettlementMode::Deferred {
                self.settle_deferred(tx, fx, &row, amount, now)?;
            }
            fx.audit(
                SYSTEM_ACTOR,
                "transfer_settled",
                "transaction",
                transaction_id,
                Some(json!({ "status": TransactionStatus::Pending })),
                Some(json!({ "status": TransactionStatus::Completed })),
                AuditSeverity::Info,
            );
            fx.notify(
                &row.owner_id,
                NotificationKind::TransferSettled,
                format!("Your transfer of {} {amount} has settled.", row.currency),
            );
            Ok(true)
        });

        match attempt {
            Ok(true) => {
                info!("settled {transaction_id}");
                Ok(SettlementOutcome::Settled)
            }
            Ok(false) => Ok(SettlementOutcome::Skipped),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                let reason = e.to_string();
                if self.fail_settlement(transaction_id, &reason)? {
                    Ok(SettlementOutcome::Failed { reason })
                } else {
                    Ok(SettlementOutcome::Skipped)
                }
            }
        }
    }

    fn settle_deferred(
        &self,
        tx: &StoreTx<'_>,
        fx: &mut SideEffects,
        row: &TransactionRecord,
        amount: Money,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        let mut sender = tx
            .account_by_id(&row.account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound { reference: row.account_id.clone() })?;
        apply_limited_debit(&mut sender, amount, now.date_naive())?;
        tx.save_account(&sender)?;

        let receiver = match &row.counterpart_account {
            Some(number) => tx.account_by_number(number)?,
            None => None,
        };
        let Some(mut receiver) = receiver else {
            debug!("{} has no internal receiver; settling as external", row.transaction_id);
            return Ok(());
        };
        if receiver.account_id == sender.account_id {
            return Err(LedgerError::SelfTransferRejected);
        }
        ensure_debitable(&receiver)?;
        receiver.balance += amount;
        tx.save_account(&receiver)?;

        let mut credit = ledger_row(
            &receiver,
            TransactionType::Transfer,
            amount,
            TransactionStatus::Completed,
            &row.description,
            "scheduled_transfer",
            now,
        );
        credit.counterpart_account = Some(sender.account_number.clone());
        tx.insert_transaction(&credit)?;
        fx.notify(
            &receiver.owner_id,
            NotificationKind::Credit,
            format!("{} {amount} received from {}.", receiver.currency, sender.account_number),
        );
        Ok(())
    }

    /// Mark a row `failed` after its settlement scope rolled back. Only
    /// deferred rows get here, so there is no reserved debit to undo.
    /// Returns false when the row was no longer pending.
    fn fail_settlement(&self, transaction_id: &str, reason: &str) -> LedgerResult<bool> {
        let marked = self.commit(|tx, fx| {
            let Some(row) = tx.transaction(transaction_id)? else {
                return Ok(false);
            };
            if !tx.finish_pending(transaction_id, TransactionStatus::Failed)? {
                return Ok(false);
            }
            fx.audit(
                SYSTEM_ACTOR,
                "transfer_failed",
                "transaction",
                transaction_id,
                Some(json!({ "status": TransactionStatus::Pending })),
                Some(json!({ "status": TransactionStatus::Failed, "reason": reason })),
                AuditSeverity::Warning,
            );
            fx.notify(
                &row.owner_id,
                NotificationKind::TransferFailed,
                format!("Your transfer of {} {} failed: {reason}", row.currency, row.amount.abs()),
            );
            Ok(true)
        })?;
        if marked {
            warn!("settlement of {transaction_id} failed: {reason}");
        }
        Ok(marked)
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

/// Periodic settlement: timer task + bounded queue + worker task.
pub struct SettlementScheduler {
    shutdown: watch::Sender<bool>,
    timer:    JoinHandle<()>,
    worker:   JoinHandle<SweepReport>,
}

impl SettlementScheduler {
    /// Start on the configured interval. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<LedgerEngine>) -> Self {
        let period = Duration::from_secs(engine.config.settlement.interval_secs);
        Self::start_with_period(engine, period)
    }

    pub fn start_with_period(engine: Arc<LedgerEngine>, period: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(engine.config.settlement.queue_depth);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!("settlement scheduler started, every {period:?}");
        Self {
            shutdown: shutdown_tx,
            timer:    tokio::spawn(run_timer(engine.clone(), period, queue_tx, shutdown_rx)),
            worker:   tokio::spawn(run_worker(engine, queue_rx)),
        }
    }

    /// Stop the timer, let the worker drain what is queued, and report totals.
    pub async fn shutdown(self) -> LedgerResult<SweepReport> {
        let _ = self.shutdown.send(true);
        self.timer
            .await
            .map_err(|e| LedgerError::Scheduler(format!("timer task: {e}")))?;
        let report = self
            .worker
            .await
            .map_err(|e| LedgerError::Scheduler(format!("worker task: {e}")))?;
        info!(
            "settlement scheduler stopped: {} settled, {} failed, {} skipped",
            report.settled, report.failed, report.skipped
        );
        Ok(report)
    }
}

async fn run_timer(
    engine: Arc<LedgerEngine>,
    period: Duration,
    queue: mpsc::Sender<EntityId>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let scan = engine.clone();
                let due = match tokio::task::spawn_blocking(move || scan.due_settlements()).await {
                    Ok(Ok(ids)) => ids,
                    Ok(Err(e)) => {
                        warn!("settlement scan failed: {e}");
                        continue;
                    }
                    Err(e) => {
                        warn!("settlement scan panicked: {e}");
                        continue;
                    }
                };
                for id in due {
                    if queue.send(id).await.is_err() {
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("settlement timer stopped");
}

async fn run_worker(engine: Arc<LedgerEngine>, mut queue: mpsc::Receiver<EntityId>) -> SweepReport {
    let mut report = SweepReport::default();
    while let Some(id) = queue.recv().await {
        let settle = engine.clone();
        let target = id.clone();
        match tokio::task::spawn_blocking(move || settle.settle_one(&target)).await {
            Ok(Ok(outcome)) => report.record(&outcome),
            Ok(Err(e)) => {
                warn!("settlement of {id} left pending: {e}");
                report.skipped += 1;
            }
            Err(e) => {
                warn!("settlement of {id} panicked: {e}");
                report.skipped += 1;
            }
        }
    }
    report
}
