use super::StoreTx;
use crate::{error::LedgerResult, event::AuditEntry};
use rusqlite::params;

/// A stored audit row as read back for inspection.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub audit_id:    i64,
    pub actor_id:    String,
    pub action:      String,
    pub entity_type: String,
    pub entity_id:   String,
    pub severity:    String,
}

impl StoreTx<'_> {
    /// Insert only. The schema rejects UPDATE and DELETE on audit_log.
    pub fn append_audit(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let before = entry.before.as_ref().map(serde_json::to_string).transpose()?;
        let after = entry.after.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            "INSERT INTO audit_log (actor_id, action, entity_type, entity_id, before_state, after_state, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.actor_id,
                entry.action,
                entry.entity_type,
                entry.entity_id,
                before,
                after,
                entry.severity.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn audit_for_entity(&self, entity_id: &str) -> LedgerResult<Vec<AuditRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT audit_id, actor_id, action, entity_type, entity_id, severity
             FROM audit_log WHERE entity_id = ?1 ORDER BY audit_id ASC",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(AuditRow {
                audit_id:    row.get(0)?,
                actor_id:    row.get(1)?,
                action:      row.get(2)?,
                entity_type: row.get(3)?,
                entity_id:   row.get(4)?,
                severity:    row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        event::{AuditEntry, AuditSeverity},
        store::LedgerStore,
    };
    use rusqlite::params;

    fn entry() -> AuditEntry {
        AuditEntry {
            actor_id:    "system".into(),
            action:      "account_frozen".into(),
            entity_type: "account".into(),
            entity_id:   "acc-1".into(),
            before:      Some(serde_json::json!({ "status": "active" })),
            after:       Some(serde_json::json!({ "status": "frozen" })),
            severity:    AuditSeverity::Destructive,
        }
    }

    #[test]
    fn audit_rows_cannot_be_updated_or_deleted() {
        let store = LedgerStore::in_memory().unwrap();
        store.migrate().unwrap();
        store.atomic(|tx| tx.append_audit(&entry())).unwrap();

        let rows = store.read(|tx| tx.audit_for_entity("acc-1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].severity, "destructive");
        let id = rows[0].audit_id;

        let update = store.atomic(|tx| {
            tx.conn
                .execute("UPDATE audit_log SET action = 'x' WHERE audit_id = ?1", params![id])?;
            Ok(())
        });
        assert!(update.is_err(), "audit_log accepted an UPDATE");

        let delete = store.atomic(|tx| {
            tx.conn
                .execute("DELETE FROM audit_log WHERE audit_id = ?1", params![id])?;
            Ok(())
        });
        assert!(delete.is_err(), "audit_log accepted a DELETE");

        let rows = store.read(|tx| tx.audit_for_entity("acc-1")).unwrap();
        assert_eq!(rows[0].action, "account_frozen");
    }
}
