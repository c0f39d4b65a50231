//! Sanctions list and suspicious activity queries.

use super::{enum_at, instant_at, json_at, millis, StoreTx};
use crate::{
    error::LedgerResult,
    model::{ReviewStatus, SanctionEntry, SuspiciousActivityRecord},
};
use rusqlite::{params, OptionalExtension, Row};

const SA_COLUMNS: &str =
    "activity_id, user_id, transaction_id, rule, severity, status, metadata, remarks, created_at";

fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<SuspiciousActivityRecord> {
    Ok(SuspiciousActivityRecord {
        activity_id:    row.get(0)?,
        user_id:        row.get(1)?,
        transaction_id: row.get(2)?,
        rule:           enum_at(row, 3)?,
        severity:       enum_at(row, 4)?,
        status:         enum_at(row, 5)?,
        metadata:       json_at(row, 6)?,
        remarks:        row.get(7)?,
        created_at:     instant_at(row, 8)?,
    })
}

impl StoreTx<'_> {
    // ── Sanctions ─────────────────────────────────────────────────

    pub fn insert_sanction(&self, entry: &SanctionEntry) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sanction_entry (entry_id, name, program, country)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.entry_id, entry.name, entry.program, entry.country],
        )?;
        Ok(())
    }

    /// Listed entries whose name contains `name`, ignoring case.
    pub fn sanctions_matching(&self, name: &str) -> LedgerResult<Vec<SanctionEntry>> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        // instr() avoids LIKE wildcard handling of '%' and '_' in names.
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, name, program, country FROM sanction_entry
             WHERE instr(lower(name), ?1) > 0
             ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![needle], |row| {
            Ok(SanctionEntry {
                entry_id: row.get(0)?,
                name:     row.get(1)?,
                program:  row.get(2)?,
                country:  row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn sanction_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sanction_entry", [], |row| row.get(0))?;
        Ok(count)
    }

    // ── Suspicious activity ───────────────────────────────────────

    pub fn insert_suspicious_activity(&self, sa: &SuspiciousActivityRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO suspicious_activity (
                activity_id, user_id, transaction_id, rule, severity, status, metadata,
                remarks, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sa.activity_id,
                sa.user_id,
                sa.transaction_id,
                sa.rule.as_str(),
                sa.severity.as_str(),
                sa.status.as_str(),
                serde_json::to_string(&sa.metadata)?,
                sa.remarks,
                millis(sa.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn suspicious_activity(&self, activity_id: &str) -> LedgerResult<Option<SuspiciousActivityRecord>> {
        let sql = format!("SELECT {SA_COLUMNS} FROM suspicious_activity WHERE activity_id = ?1");
        let sa = self
            .conn
            .query_row(&sql, params![activity_id], activity_from_row)
            .optional()?;
        Ok(sa)
    }

    pub fn suspicious_activities_for_user(
        &self,
        user_id: &str,
    ) -> LedgerResult<Vec<SuspiciousActivityRecord>> {
        let sql = format!(
            "SELECT {SA_COLUMNS} FROM suspicious_activity WHERE user_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], activity_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn suspicious_activities_by_status(
        &self,
        status: ReviewStatus,
    ) -> LedgerResult<Vec<SuspiciousActivityRecord>> {
        let sql = format!(
            "SELECT {SA_COLUMNS} FROM suspicious_activity WHERE status = ?1
             ORDER BY created_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status.as_str()], activity_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn review_suspicious_activity(
        &self,
        activity_id: &str,
        status: ReviewStatus,
        remarks: &str,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE suspicious_activity SET status = ?1, remarks = ?2 WHERE activity_id = ?3",
            params![status.as_str(), remarks, activity_id],
        )?;
        Ok(())
    }

    /// Point screening hits at the ledger row they were raised for.
    pub fn link_suspicious_activities(
        &self,
        activity_ids: &[String],
        transaction_id: &str,
    ) -> LedgerResult<()> {
        let mut stmt = self.conn.prepare(
            "UPDATE suspicious_activity SET transaction_id = ?1
             WHERE activity_id = ?2 AND transaction_id IS NULL",
        )?;
        for id in activity_ids {
            stmt.execute(params![transaction_id, id])?;
        }
        Ok(())
    }
}
