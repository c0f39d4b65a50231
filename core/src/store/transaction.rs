use super::{decimal_at, enum_at, instant_at, millis, opt_enum_at, opt_instant_at, StoreTx};
use crate::{
    error::LedgerResult,
    event::Notification,
    model::{BillRecord, InvestmentRecord, TransactionRecord, TransactionStatus},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const TXN_COLUMNS: &str = "transaction_id, owner_id, account_id, txn_type, amount, currency,
     status, counterpart_name, counterpart_account, description, category, is_flagged,
     risk_score, scheduled_date, settlement_mode, created_at";

fn txn_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        transaction_id:      row.get(0)?,
        owner_id:            row.get(1)?,
        account_id:          row.get(2)?,
        txn_type:            enum_at(row, 3)?,
        amount:              decimal_at(row, 4)?,
        currency:            row.get(5)?,
        status:              enum_at(row, 6)?,
        counterpart_name:    row.get(7)?,
        counterpart_account: row.get(8)?,
        description:         row.get(9)?,
        category:            row.get(10)?,
        is_flagged:          row.get::<_, i32>(11)? != 0,
        risk_score:          row.get::<_, i64>(12)?.clamp(0, 100) as u8,
        scheduled_date:      opt_instant_at(row, 13)?,
        settlement_mode:     opt_enum_at(row, 14)?,
        created_at:          instant_at(row, 15)?,
    })
}

impl StoreTx<'_> {
    // ── Ledger rows ───────────────────────────────────────────────

    pub fn insert_transaction(&self, t: &TransactionRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO ledger_transaction (
                transaction_id, owner_id, account_id, txn_type, amount, currency, status,
                counterpart_name, counterpart_account, description, category, is_flagged,
                risk_score, scheduled_date, settlement_mode, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                t.transaction_id,
                t.owner_id,
                t.account_id,
                t.txn_type.as_str(),
                t.amount.to_string(),
                t.currency,
                t.status.as_str(),
                t.counterpart_name,
                t.counterpart_account,
                t.description,
                t.category,
                if t.is_flagged { 1 } else { 0 },
                t.risk_score as i64,
                t.scheduled_date.map(millis),
                t.settlement_mode.map(|m| m.as_str()),
                millis(t.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn transaction(&self, transaction_id: &str) -> LedgerResult<Option<TransactionRecord>> {
        let sql = format!("SELECT {TXN_COLUMNS} FROM ledger_transaction WHERE transaction_id = ?1");
        let txn = self
            .conn
            .query_row(&sql, params![transaction_id], txn_from_row)
            .optional()?;
        Ok(txn)
    }

    /// Move a row out of `pending`. Returns false if another sweep got there first.
    pub fn finish_pending(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE ledger_transaction SET status = ?1
             WHERE transaction_id = ?2 AND status = 'pending'",
            params![status.as_str(), transaction_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_transaction_flag(
        &self,
        transaction_id: &str,
        is_flagged: bool,
        risk_score: u8,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE ledger_transaction SET is_flagged = ?1, risk_score = ?2 WHERE transaction_id = ?3",
            params![if is_flagged { 1 } else { 0 }, risk_score as i64, transaction_id],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn transactions_for_owner(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM ledger_transaction WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id, limit as i64], txn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn transactions_for_account(&self, account_id: &str) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM ledger_transaction WHERE account_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id], txn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Outbound rows (any type and status) written for `owner_id` at or
    /// after `since`. Debit legs are the ones stored with a negative amount.
    pub fn count_outbound_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_transaction
             WHERE owner_id = ?1 AND created_at >= ?2 AND amount LIKE '-%'",
            params![owner_id, millis(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pending rows whose scheduled date has arrived, oldest due first.
    pub fn due_pending_transactions(&self, now: DateTime<Utc>) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM ledger_transaction
             WHERE status = 'pending' AND scheduled_date IS NOT NULL AND scheduled_date <= ?1
             ORDER BY scheduled_date ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![millis(now)], txn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn transactions_by_status(
        &self,
        status: TransactionStatus,
    ) -> LedgerResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TXN_COLUMNS} FROM ledger_transaction WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.as_str()], txn_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Side records ──────────────────────────────────────────────

    pub fn insert_bill(&self, bill: &BillRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO bill (bill_id, owner_id, transaction_id, biller_name, consumer_ref, amount, paid_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                bill.bill_id,
                bill.owner_id,
                bill.transaction_id,
                bill.biller_name,
                bill.consumer_ref,
                bill.amount.to_string(),
                millis(bill.paid_at),
            ],
        )?;
        Ok(())
    }

    pub fn bills_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<BillRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT bill_id, owner_id, transaction_id, biller_name, consumer_ref, amount, paid_at
             FROM bill WHERE owner_id = ?1 ORDER BY paid_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok(BillRecord {
                bill_id:        row.get(0)?,
                owner_id:       row.get(1)?,
                transaction_id: row.get(2)?,
                biller_name:    row.get(3)?,
                consumer_ref:   row.get(4)?,
                amount:         decimal_at(row, 5)?,
                paid_at:        instant_at(row, 6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_investment(&self, inv: &InvestmentRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO investment (
                investment_id, owner_id, transaction_id, plan, amount, tenure_months,
                maturity_date, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                inv.investment_id,
                inv.owner_id,
                inv.transaction_id,
                inv.plan,
                inv.amount.to_string(),
                inv.tenure_months as i64,
                inv.maturity_date,
                millis(inv.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn investments_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<InvestmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT investment_id, owner_id, transaction_id, plan, amount, tenure_months,
                    maturity_date, created_at
             FROM investment WHERE owner_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok(InvestmentRecord {
                investment_id:  row.get(0)?,
                owner_id:       row.get(1)?,
                transaction_id: row.get(2)?,
                plan:           row.get(3)?,
                amount:         decimal_at(row, 4)?,
                tenure_months:  row.get::<_, i64>(5)? as u32,
                maturity_date:  row.get(6)?,
                created_at:     instant_at(row, 7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Notifications ─────────────────────────────────────────────

    pub fn insert_notification(&self, n: &Notification) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO notification (user_id, kind, message) VALUES (?1, ?2, ?3)",
            params![n.user_id, n.kind.as_str(), n.message],
        )?;
        Ok(())
    }

    /// (kind, message) pairs in delivery order.
    pub fn notifications_for_user(&self, user_id: &str) -> LedgerResult<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT kind, message FROM notification WHERE user_id = ?1 ORDER BY notification_id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
