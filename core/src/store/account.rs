use super::{decimal_at, enum_at, instant_at, millis, StoreTx};
use crate::{
    error::LedgerResult,
    model::{AccountRecord, AccountStatus, RiskLevel, UserAccountStatus, UserRecord},
    types::Money,
};
use rusqlite::{params, OptionalExtension, Row};

const ACCOUNT_COLUMNS: &str = "account_id, owner_id, account_number, account_type, balance,
     currency, status, daily_limit, used_limit, last_limit_reset_date, opened_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<AccountRecord> {
    Ok(AccountRecord {
        account_id:            row.get(0)?,
        owner_id:              row.get(1)?,
        account_number:        row.get(2)?,
        account_type:          enum_at(row, 3)?,
        balance:               decimal_at(row, 4)?,
        currency:              row.get(5)?,
        status:                enum_at(row, 6)?,
        daily_limit:           decimal_at(row, 7)?,
        used_limit:            decimal_at(row, 8)?,
        last_limit_reset_date: row.get(9)?,
        opened_at:             instant_at(row, 10)?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        user_id:        row.get(0)?,
        name:           row.get(1)?,
        risk_score:     row.get::<_, i64>(2)?.clamp(0, 100) as u8,
        risk_level:     enum_at(row, 3)?,
        is_pep:         row.get::<_, i32>(4)? != 0,
        account_status: enum_at(row, 5)?,
        created_at:     instant_at(row, 6)?,
    })
}

impl StoreTx<'_> {
    // ── Users ─────────────────────────────────────────────────────

    pub fn insert_user(&self, user: &UserRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO app_user (user_id, name, risk_score, risk_level, is_pep, account_status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.user_id,
                user.name,
                user.risk_score as i64,
                user.risk_level.as_str(),
                if user.is_pep { 1 } else { 0 },
                user.account_status.as_str(),
                millis(user.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn user(&self, user_id: &str) -> LedgerResult<Option<UserRecord>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id, name, risk_score, risk_level, is_pep, account_status, created_at
                 FROM app_user WHERE user_id = ?1",
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_user_risk(&self, user_id: &str, score: u8, level: RiskLevel) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE app_user SET risk_score = ?1, risk_level = ?2 WHERE user_id = ?3",
            params![score as i64, level.as_str(), user_id],
        )?;
        Ok(())
    }

    pub fn set_user_account_status(
        &self,
        user_id: &str,
        status: UserAccountStatus,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE app_user SET account_status = ?1 WHERE user_id = ?2",
            params![status.as_str(), user_id],
        )?;
        Ok(())
    }

    // ── Accounts ──────────────────────────────────────────────────

    pub fn insert_account(&self, account: &AccountRecord) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO account (
                account_id, owner_id, account_number, account_type, balance, currency,
                status, daily_limit, used_limit, last_limit_reset_date, opened_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                account.account_id,
                account.owner_id,
                account.account_number,
                account.account_type.as_str(),
                account.balance.to_string(),
                account.currency,
                account.status.as_str(),
                account.daily_limit.to_string(),
                account.used_limit.to_string(),
                account.last_limit_reset_date,
                millis(account.opened_at),
            ],
        )?;
        Ok(())
    }

    pub fn account_number_taken(&self, account_number: &str) -> LedgerResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM account WHERE account_number = ?1",
            params![account_number],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn account_by_number(&self, account_number: &str) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE account_number = ?1");
        let account = self
            .conn
            .query_row(&sql, params![account_number], account_from_row)
            .optional()?;
        Ok(account)
    }

    pub fn account_by_id(&self, account_id: &str) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE account_id = ?1");
        let account = self
            .conn
            .query_row(&sql, params![account_id], account_from_row)
            .optional()?;
        Ok(account)
    }

    /// The owner's primary account: the earliest one opened that is not closed.
    pub fn primary_account(&self, owner_id: &str) -> LedgerResult<Option<AccountRecord>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account
             WHERE owner_id = ?1 AND status != 'closed'
             ORDER BY opened_at ASC, rowid ASC LIMIT 1"
        );
        let account = self
            .conn
            .query_row(&sql, params![owner_id], account_from_row)
            .optional()?;
        Ok(account)
    }

    pub fn accounts_for_owner(&self, owner_id: &str) -> LedgerResult<Vec<AccountRecord>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE owner_id = ?1
             ORDER BY opened_at ASC, rowid ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner_id], account_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Persist the mutable fields of an account read earlier in this scope.
    pub fn save_account(&self, account: &AccountRecord) -> LedgerResult<()> {
        self.conn.execute(
            "UPDATE account
             SET balance = ?1, status = ?2, daily_limit = ?3, used_limit = ?4,
                 last_limit_reset_date = ?5
             WHERE account_id = ?6",
            params![
                account.balance.to_string(),
                account.status.as_str(),
                account.daily_limit.to_string(),
                account.used_limit.to_string(),
                account.last_limit_reset_date,
                account.account_id,
            ],
        )?;
        Ok(())
    }

    /// Freeze every open account of `owner_id`. Returns the numbers frozen.
    pub fn freeze_owner_accounts(&self, owner_id: &str) -> LedgerResult<Vec<String>> {
        let mut frozen = Vec::new();
        for mut account in self.accounts_for_owner(owner_id)? {
            if matches!(account.status, AccountStatus::Active | AccountStatus::Dormant) {
                account.status = AccountStatus::Frozen;
                self.save_account(&account)?;
                frozen.push(account.account_number);
            }
        }
        Ok(frozen)
    }

    /// Sum of all balances across the system.
    pub fn total_balance(&self) -> LedgerResult<Money> {
        let mut stmt = self.conn.prepare("SELECT balance FROM account")?;
        let rows = stmt.query_map([], |row| decimal_at(row, 0))?;
        let mut total = Money::ZERO;
        for balance in rows {
            total += balance?;
        }
        Ok(total)
    }

    pub fn owner_total_balance(&self, owner_id: &str) -> LedgerResult<Money> {
        Ok(self
            .accounts_for_owner(owner_id)?
            .iter()
            .map(|a| a.balance)
            .sum())
    }
}
