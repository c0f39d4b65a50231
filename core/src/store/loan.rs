use super::{decimal_at, enum_at, instant_at, json_at, millis, opt_instant_at, StoreTx};
use crate::{
    error::LedgerResult,
    model::{LoanRecord, LoanStatus},
    types::Money,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const LOAN_COLUMNS: &str = "loan_id, owner_id, loan_type, principal, tenure_months, interest_rate,
     emi, remaining_balance, status, risk_profile, emi_schedule, created_at, reviewed_by,
     reviewed_at";

fn loan_from_row(row: &Row<'_>) -> rusqlite::Result<LoanRecord> {
    Ok(LoanRecord {
        loan_id:           row.get(0)?,
        owner_id:          row.get(1)?,
        loan_type:         enum_at(row, 2)?,
        principal:         decimal_at(row, 3)?,
        tenure_months:     row.get::<_, i64>(4)? as u32,
        interest_rate:     decimal_at(row, 5)?,
        emi:               decimal_at(row, 6)?,
        remaining_balance: decimal_at(row, 7)?,
        status:            enum_at(row, 8)?,
        risk_profile:      json_at(row, 9)?,
        emi_schedule:      json_at(row, 10)?,
        created_at:        instant_at(row, 11)?,
        reviewed_by:       row.get(12)?,
        reviewed_at:       opt_instant_at(row, 13)?,
    })
}

impl StoreTx<'_> {
    pub fn insert_loan(&self, loan: &LoanRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO loan (
                loan_id, owner_id, loan_type, principal, tenure_months, interest_rate, emi,
                remaining_balance, status, risk_profile, emi_schedule, created_at,
                reviewed_by, reviewed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                loan.loan_id,
                loan.owner_id,
                loan.loan_type.as_str(),
                loan.principal.to_string(),
                loan.tenure_months as i64,
                loan.interest_rate.to_string(),
                loan.emi.to_string(),
                loan.remaining_balance.to_string(),
                loan.status.as_str(),
                serde_json::to_string(&loan.risk_profile)?,
                serde_json::to_string(&loan.emi_schedule)?,
                millis(loan.created_at),
                loan.reviewed_by,
                loan.reviewed_at.map(millis),
            ],
        )?;
        Ok(())
    }

    pub fn loan(&self, loan_id: &str) -> LedgerResult<Option<LoanRecord>> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM loan WHERE loan_id = ?1");
        let loan = self
            .conn
            .query_row(&sql, params![loan_id], loan_from_row)
            .optional()?;
        Ok(loan)
    }

    pub fn loans_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<LoanRecord>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM loan WHERE owner_id = ?1 ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], loan_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// EMIs of the owner's loans that still carry a balance (rejected loans excluded).
    pub fn outstanding_emis(&self, owner_id: &str) -> LedgerResult<Vec<Money>> {
        Ok(self
            .loans_for_owner(owner_id)?
            .into_iter()
            .filter(|l| l.status != LoanStatus::Rejected && l.remaining_balance > Money::ZERO)
            .map(|l| l.emi)
            .collect())
    }

    pub fn set_loan_review(
        &self,
        loan_id: &str,
        status: LoanStatus,
        reviewer: &str,
        at: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE loan SET status = ?1, reviewed_by = ?2, reviewed_at = ?3 WHERE loan_id = ?4",
            params![status.as_str(), reviewer, millis(at), loan_id],
        )?;
        Ok(())
    }

    pub fn set_loan_remaining_balance(&self, loan_id: &str, remaining: Money) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE loan SET remaining_balance = ?1 WHERE loan_id = ?2",
            params![remaining.to_string(), loan_id],
        )?;
        Ok(())
    }
}
