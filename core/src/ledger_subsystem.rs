//! Ledger operations: deposits, withdrawals, transfers and purpose debits.
//!
//! Each operation is one `commit` scope. Accounts are looked up by id
//! inside that scope, limits are reset-then-checked against the row just
//! read, and every balance change is written together with its ledger
//! row(s). An error anywhere rolls the whole scope back.
//!
//! Transfer-type operations are screened first (see compliance_subsystem);
//! screening hits are linked to the sender's row once it exists.

use crate::{
    compliance_subsystem::ScreeningRequest,
    engine::LedgerEngine,
    error::{LedgerError, LedgerResult},
    event::{AuditSeverity, NotificationKind, SideEffects},
    limits::{apply_limited_debit, ensure_debitable},
    model::{
        AccountRecord, BillRecord, InvestmentRecord, LoanStatus, SettlementMode,
        TransactionRecord, TransactionStatus, TransactionType,
    },
    requests::{
        validate_amount, BillPaymentRequest, ExternalTransferRequest, InvestmentRequest,
        LoanRepaymentRequest, ScheduledTransferRequest, TransferRequest,
    },
    store::StoreTx,
    types::{new_id, Money},
};
use chrono::{DateTime, Duration, Months, Utc};
use log::{debug, info};
use serde_json::json;

/// A fresh ledger row for `account` with no counterpart or flags.
pub(crate) fn ledger_row(
    account: &AccountRecord,
    txn_type: TransactionType,
    amount: Money,
    status: TransactionStatus,
    description: &str,
    category: &str,
    now: DateTime<Utc>,
) -> TransactionRecord {
    TransactionRecord {
        transaction_id:      new_id(),
        owner_id:            account.owner_id.clone(),
        account_id:          account.account_id.clone(),
        txn_type,
        amount,
        currency:            account.currency.clone(),
        status,
        counterpart_name:    None,
        counterpart_account: None,
        description:         description.to_string(),
        category:            category.to_string(),
        is_flagged:          false,
        risk_score:          0,
        scheduled_date:      None,
        settlement_mode:     None,
        created_at:          now,
    }
}

fn primary_account(tx: &StoreTx<'_>, owner_id: &str) -> LedgerResult<AccountRecord> {
    tx.primary_account(owner_id)?
        .ok_or_else(|| LedgerError::AccountNotFound { reference: owner_id.to_string() })
}

fn account_by_id(tx: &StoreTx<'_>, account_id: &str) -> LedgerResult<AccountRecord> {
    tx.account_by_id(account_id)?
        .ok_or_else(|| LedgerError::AccountNotFound { reference: account_id.to_string() })
}

fn balance_snapshot(account: &AccountRecord) -> serde_json::Value {
    json!({
        "balance": account.balance,
        "used_limit": account.used_limit,
        "last_limit_reset_date": account.last_limit_reset_date,
    })
}

/// Sender and receiver of an internal transfer, resolved before screening.
struct TransferParties {
    sender:        AccountRecord,
    receiver:      Option<AccountRecord>,
    receiver_name: Option<String>,
}

/// Result of an internal transfer: the sender's debit leg and the receiver's credit leg.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub debit:  TransactionRecord,
    pub credit: TransactionRecord,
}

impl LedgerEngine {
    fn resolve_parties(
        &self,
        sender_id: &str,
        receiver_account_number: &str,
    ) -> LedgerResult<TransferParties> {
        self.store.read(|tx| {
            let sender = primary_account(tx, sender_id)?;
            if sender.account_number == receiver_account_number {
                return Err(LedgerError::SelfTransferRejected);
            }
            let receiver = tx.account_by_number(receiver_account_number)?;
            let receiver_name = match &receiver {
                Some(r) => tx.user(&r.owner_id)?.map(|u| u.name),
                None => None,
            };
            Ok(TransferParties { sender, receiver, receiver_name })
        })
    }

    /// Debit the owner's primary account with limit checks and write its row.
    #[allow(clippy::too_many_arguments)]
    fn limited_debit(
        &self,
        tx: &StoreTx<'_>,
        fx: &mut SideEffects,
        owner_id: &str,
        amount: Money,
        txn_type: TransactionType,
        counterpart: &str,
        description: &str,
        category: &str,
    ) -> LedgerResult<TransactionRecord> {
        let now = self.clock.now();
        let mut account = primary_account(tx, owner_id)?;
        let before = balance_snapshot(&account);
        apply_limited_debit(&mut account, amount, now.date_naive())?;
        tx.save_account(&account)?;

        let mut row = ledger_row(
            &account,
            txn_type,
            -amount,
            TransactionStatus::Completed,
            description,
            category,
            now,
        );
        row.counterpart_name = Some(counterpart.to_string());
        tx.insert_transaction(&row)?;

        fx.audit(
            owner_id,
            txn_type.as_str(),
            "account",
            &account.account_id,
            Some(before),
            Some(balance_snapshot(&account)),
            AuditSeverity::Info,
        );
        fx.notify(
            owner_id,
            NotificationKind::Debit,
            format!("{} {amount} debited for {counterpart}.", account.currency),
        );
        Ok(row)
    }

    // ── Credits and cash ──────────────────────────────────────────

    /// Credit the owner's primary account. Deposits are not limited.
    pub fn deposit(&self, owner_id: &str, amount: Money) -> LedgerResult<TransactionRecord> {
        validate_amount(amount)?;
        let now = self.clock.now();
        let row = self.commit(|tx, fx| {
            let mut account = primary_account(tx, owner_id)?;
            let before = balance_snapshot(&account);
            account.balance += amount;
            tx.save_account(&account)?;

            let row = ledger_row(
                &account,
                TransactionType::Deposit,
                amount,
                TransactionStatus::Completed,
                "Deposit",
                "deposit",
                now,
            );
            tx.insert_transaction(&row)?;
            fx.audit(
                owner_id,
                "deposit",
                "account",
                &account.account_id,
                Some(before),
                Some(balance_snapshot(&account)),
                AuditSeverity::Info,
            );
            fx.notify(
                owner_id,
                NotificationKind::Credit,
                format!("{} {amount} deposited to {}.", account.currency, account.account_number),
            );
            Ok(row)
        })?;
        debug!("deposit {} of {amount} for {owner_id}", row.transaction_id);
        Ok(row)
    }

    pub fn withdraw(&self, owner_id: &str, amount: Money) -> LedgerResult<TransactionRecord> {
        validate_amount(amount)?;
        let row = self.commit(|tx, fx| {
            self.limited_debit(
                tx,
                fx,
                owner_id,
                amount,
                TransactionType::Withdrawal,
                "Cash withdrawal",
                "Withdrawal",
                "withdrawal",
            )
        })?;
        debug!("withdrawal {} of {amount} for {owner_id}", row.transaction_id);
        Ok(row)
    }

    // ── Transfers ─────────────────────────────────────────────────

    /// Move money between two accounts held at this ledger.
    pub fn internal_transfer(&self, req: &TransferRequest) -> LedgerResult<TransferReceipt> {
        req.validate()?;
        let parties = self.resolve_parties(&req.sender_id, &req.receiver_account_number)?;
        let receiver = parties.receiver.ok_or_else(|| LedgerError::ReceiverNotFound {
            account_number: req.receiver_account_number.clone(),
        })?;
        ensure_debitable(&parties.sender)?;
        ensure_debitable(&receiver)?;
        if receiver.currency != parties.sender.currency {
            return Err(LedgerError::InvalidRequest(format!(
                "cannot transfer {} into a {} account",
                parties.sender.currency, receiver.currency
            )));
        }

        let screening = self.screen_transfer(&ScreeningRequest {
            user_id:           &req.sender_id,
            amount:            req.amount,
            counterparty_name: parties.receiver_name.as_deref(),
            country:           None,
        })?;

        let now = self.clock.now();
        let receipt = self.commit(|tx, fx| {
            let mut sender = account_by_id(tx, &parties.sender.account_id)?;
            let mut receiver = account_by_id(tx, &receiver.account_id)?;
            ensure_debitable(&receiver)?;
            let sender_before = balance_snapshot(&sender);
            let receiver_before = balance_snapshot(&receiver);

            apply_limited_debit(&mut sender, req.amount, now.date_naive())?;
            receiver.balance += req.amount;
            tx.save_account(&sender)?;
            tx.save_account(&receiver)?;

            let mut debit = ledger_row(
                &sender,
                TransactionType::Transfer,
                -req.amount,
                TransactionStatus::Completed,
                &req.description,
                "transfer",
                now,
            );
            debit.counterpart_name = parties.receiver_name.clone();
            debit.counterpart_account = Some(receiver.account_number.clone());
            screening.mark(&mut debit);

            let mut credit = ledger_row(
                &receiver,
                TransactionType::Transfer,
                req.amount,
                TransactionStatus::Completed,
                &req.description,
                "transfer",
                now,
            );
            credit.counterpart_account = Some(sender.account_number.clone());

            tx.insert_transaction(&debit)?;
            tx.insert_transaction(&credit)?;
            tx.link_suspicious_activities(&screening.activity_ids, &debit.transaction_id)?;

            fx.audit(
                &req.sender_id,
                "internal_transfer",
                "transaction",
                &debit.transaction_id,
                Some(json!({ "sender": sender_before, "receiver": receiver_before })),
                Some(json!({
                    "sender": balance_snapshot(&sender),
                    "receiver": balance_snapshot(&receiver),
                    "amount": req.amount,
                })),
                AuditSeverity::Info,
            );
            fx.notify(
                &sender.owner_id,
                NotificationKind::Debit,
                format!("{} {} sent to {}.", sender.currency, req.amount, receiver.account_number),
            );
            fx.notify(
                &receiver.owner_id,
                NotificationKind::Credit,
                format!("{} {} received from {}.", receiver.currency, req.amount, sender.account_number),
            );
            Ok(TransferReceipt { debit, credit })
        })?;
        info!(
            "transfer {} of {} from {} to {}",
            receipt.debit.transaction_id, req.amount, req.sender_id, req.receiver_account_number
        );
        Ok(receipt)
    }

    /// Send money to another bank.
    ///
    /// The sender is debited immediately and the row waits in `pending`
    /// until the simulated external rail settles it.
    pub fn external_bank_transfer(
        &self,
        req: &ExternalTransferRequest,
    ) -> LedgerResult<TransactionRecord> {
        req.validate()?;
        let sender = self.store.read(|tx| primary_account(tx, &req.sender_id))?;
        ensure_debitable(&sender)?;

        let screening = self.screen_transfer(&ScreeningRequest {
            user_id:           &req.sender_id,
            amount:            req.amount,
            counterparty_name: Some(&req.bank.account_holder),
            country:           req.bank.country.as_deref(),
        })?;

        let now = self.clock.now();
        let settles_at = now + Duration::minutes(self.config.limits.external_settlement_minutes);
        let row = self.commit(|tx, fx| {
            let mut sender = account_by_id(tx, &sender.account_id)?;
            let before = balance_snapshot(&sender);
            apply_limited_debit(&mut sender, req.amount, now.date_naive())?;
            tx.save_account(&sender)?;

            let mut row = ledger_row(
                &sender,
                TransactionType::Transfer,
                -req.amount,
                TransactionStatus::Pending,
                &req.description,
                "external_transfer",
                now,
            );
            row.counterpart_name = Some(req.bank.account_holder.clone());
            row.counterpart_account =
                Some(format!("{}/{}", req.bank.routing_code, req.bank.account_number));
            row.scheduled_date = Some(settles_at);
            row.settlement_mode = Some(SettlementMode::Reserved);
            screening.mark(&mut row);
            tx.insert_transaction(&row)?;
            tx.link_suspicious_activities(&screening.activity_ids, &row.transaction_id)?;

            fx.audit(
                &req.sender_id,
                "external_transfer",
                "transaction",
                &row.transaction_id,
                Some(before),
                Some(json!({
                    "account": balance_snapshot(&sender),
                    "bank_name": req.bank.bank_name,
                    "routing_code": req.bank.routing_code,
                })),
                AuditSeverity::Info,
            );
            fx.notify(
                &req.sender_id,
                NotificationKind::Debit,
                format!(
                    "{} {} sent to {} at {}; settles by {}.",
                    sender.currency,
                    req.amount,
                    req.bank.account_holder,
                    req.bank.bank_name,
                    settles_at.format("%Y-%m-%d %H:%M UTC"),
                ),
            );
            Ok(row)
        })?;
        info!("external transfer {} of {} queued", row.transaction_id, req.amount);
        Ok(row)
    }

    /// Record a transfer to run later. Nothing moves until settlement.
    pub fn scheduled_transfer(
        &self,
        req: &ScheduledTransferRequest,
    ) -> LedgerResult<TransactionRecord> {
        let now = self.clock.now();
        req.validate(now)?;
        let parties = self.resolve_parties(&req.sender_id, &req.receiver_account_number)?;
        ensure_debitable(&parties.sender)?;

        let screening = self.screen_transfer(&ScreeningRequest {
            user_id:           &req.sender_id,
            amount:            req.amount,
            counterparty_name: parties.receiver_name.as_deref(),
            country:           None,
        })?;

        let row = self.commit(|tx, fx| {
            let sender = account_by_id(tx, &parties.sender.account_id)?;
            ensure_debitable(&sender)?;
            let mut row = ledger_row(
                &sender,
                TransactionType::Transfer,
                -req.amount,
                TransactionStatus::Pending,
                &req.description,
                "scheduled_transfer",
                now,
            );
            row.counterpart_name = parties.receiver_name.clone();
            row.counterpart_account = Some(req.receiver_account_number.clone());
            row.scheduled_date = Some(req.scheduled_date);
            row.settlement_mode = Some(SettlementMode::Deferred);
            screening.mark(&mut row);
            tx.insert_transaction(&row)?;
            tx.link_suspicious_activities(&screening.activity_ids, &row.transaction_id)?;

            fx.audit(
                &req.sender_id,
                "transfer_scheduled",
                "transaction",
                &row.transaction_id,
                None,
                Some(serde_json::to_value(&row)?),
                AuditSeverity::Info,
            );
            fx.notify(
                &req.sender_id,
                NotificationKind::TransferScheduled,
                format!(
                    "{} {} to {} scheduled for {}.",
                    sender.currency,
                    req.amount,
                    req.receiver_account_number,
                    req.scheduled_date.format("%Y-%m-%d %H:%M UTC"),
                ),
            );
            Ok(row)
        })?;
        debug!("scheduled transfer {} due {}", row.transaction_id, req.scheduled_date);
        Ok(row)
    }

    // ── Purpose debits ────────────────────────────────────────────

    pub fn pay_bill(&self, req: &BillPaymentRequest) -> LedgerResult<BillRecord> {
        req.validate()?;
        let bill = self.commit(|tx, fx| {
            let row = self.limited_debit(
                tx,
                fx,
                &req.owner_id,
                req.amount,
                TransactionType::BillPayment,
                &req.biller_name,
                &format!("Bill payment {}", req.consumer_ref),
                "bill_payment",
            )?;
            let bill = BillRecord {
                bill_id:        new_id(),
                owner_id:       req.owner_id.clone(),
                transaction_id: row.transaction_id,
                biller_name:    req.biller_name.clone(),
                consumer_ref:   req.consumer_ref.clone(),
                amount:         req.amount,
                paid_at:        row.created_at,
            };
            tx.insert_bill(&bill)?;
            Ok(bill)
        })?;
        debug!("bill {} paid to {}", bill.bill_id, bill.biller_name);
        Ok(bill)
    }

    /// Prepay an approved loan from the owner's primary account.
    pub fn repay_loan(&self, req: &LoanRepaymentRequest) -> LedgerResult<TransactionRecord> {
        req.validate()?;
        let row = self.commit(|tx, fx| {
            let loan = tx
                .loan(&req.loan_id)?
                .filter(|l| l.owner_id == req.owner_id)
                .ok_or_else(|| LedgerError::LoanNotFound { loan_id: req.loan_id.clone() })?;
            if loan.status != LoanStatus::Approved {
                return Err(LedgerError::LoanNotRepayable {
                    loan_id: loan.loan_id,
                    status:  loan.status.to_string(),
                });
            }
            if req.amount > loan.remaining_balance {
                return Err(LedgerError::InvalidAmount {
                    amount: req.amount,
                    reason: "exceeds the outstanding loan balance",
                });
            }
            let row = self.limited_debit(
                tx,
                fx,
                &req.owner_id,
                req.amount,
                TransactionType::LoanRepayment,
                &format!("Loan {}", loan.loan_id),
                "Loan repayment",
                "loan_repayment",
            )?;
            let remaining = loan.remaining_balance - req.amount;
            tx.set_loan_remaining_balance(&loan.loan_id, remaining)?;
            fx.audit(
                &req.owner_id,
                "loan_repaid",
                "loan",
                &loan.loan_id,
                Some(json!({ "remaining_balance": loan.remaining_balance })),
                Some(json!({ "remaining_balance": remaining })),
                AuditSeverity::Info,
            );
            if remaining == Money::ZERO {
                fx.notify(
                    &req.owner_id,
                    NotificationKind::LoanUpdate,
                    format!("Loan {} is fully repaid.", loan.loan_id),
                );
            }
            Ok(row)
        })?;
        info!("loan {} repaid {}", req.loan_id, req.amount);
        Ok(row)
    }

    pub fn invest_deposit(&self, req: &InvestmentRequest) -> LedgerResult<InvestmentRecord> {
        req.validate()?;
        let maturity_date = self
            .clock
            .today()
            .checked_add_months(Months::new(req.tenure_months))
            .ok_or_else(|| LedgerError::InvalidRequest("tenure_months is out of range".into()))?;
        let investment = self.commit(|tx, fx| {
            let row = self.limited_debit(
                tx,
                fx,
                &req.owner_id,
                req.amount,
                TransactionType::Investment,
                &req.plan,
                &format!("Investment in {}", req.plan),
                "investment",
            )?;
            let investment = InvestmentRecord {
                investment_id:  new_id(),
                owner_id:       req.owner_id.clone(),
                transaction_id: row.transaction_id,
                plan:           req.plan.clone(),
                amount:         req.amount,
                tenure_months:  req.tenure_months,
                maturity_date,
                created_at:     row.created_at,
            };
            tx.insert_investment(&investment)?;
            Ok(investment)
        })?;
        debug!("investment {} in {} matures {}", investment.investment_id, investment.plan, maturity_date);
        Ok(investment)
    }

    pub fn bills_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<BillRecord>> {
        self.store.read(|tx| tx.bills_for_owner(owner_id))
    }

    pub fn investments_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<InvestmentRecord>> {
        self.store.read(|tx| tx.investments_for_owner(owner_id))
    }

    /// Ledger rows of one account, oldest first.
    pub fn account_statement(&self, account_number: &str) -> LedgerResult<Vec<TransactionRecord>> {
        self.store.read(|tx| {
            let account = tx.account_by_number(account_number)?.ok_or_else(|| {
                LedgerError::AccountNotFound { reference: account_number.to_string() }
            })?;
            tx.transactions_for_account(&account.account_id)
        })
    }
}
