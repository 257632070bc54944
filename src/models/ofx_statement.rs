// 📄 OFX statement - one imported OFX file for one account

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::check_length;
use crate::db::{decimal_param, get_decimal};
use crate::error::{BudgetError, Result};

const COLUMNS: &str = "id, account_id, filename, file_sha256, imported_at, currency, acctid, \
    ledger_bal, ledger_bal_as_of, avail_bal, avail_bal_as_of";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfxStatement {
    pub id: i64,
    pub account_id: i64,
    pub filename: String,
    /// Hex SHA-256 of the file contents; re-imports of the same file are refused
    pub file_sha256: String,
    pub imported_at: DateTime<Utc>,
    pub currency: Option<String>,
    pub acctid: Option<String>,
    pub ledger_bal: Option<Decimal>,
    pub ledger_bal_as_of: Option<DateTime<Utc>>,
    pub avail_bal: Option<Decimal>,
    pub avail_bal_as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOfxStatement {
    pub account_id: i64,
    pub filename: String,
    pub file_sha256: String,
    pub currency: Option<String>,
    pub acctid: Option<String>,
    pub ledger_bal: Option<Decimal>,
    pub ledger_bal_as_of: Option<DateTime<Utc>>,
    pub avail_bal: Option<Decimal>,
    pub avail_bal_as_of: Option<DateTime<Utc>>,
}

impl OfxStatement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OfxStatement {
            id: row.get(0)?,
            account_id: row.get(1)?,
            filename: row.get(2)?,
            file_sha256: row.get(3)?,
            imported_at: row.get(4)?,
            currency: row.get(5)?,
            acctid: row.get(6)?,
            ledger_bal: get_decimal(row, 7)?,
            ledger_bal_as_of: row.get(8)?,
            avail_bal: get_decimal(row, 9)?,
            avail_bal_as_of: row.get(10)?,
        })
    }

    pub fn create(conn: &Connection, new: &NewOfxStatement) -> Result<OfxStatement> {
        check_length("filename", &new.filename, 254)?;
        if new.file_sha256.len() != 64 {
            return Err(BudgetError::Validation(
                "file_sha256 must be 64 hex characters".to_string(),
            ));
        }

        conn.execute(
            "INSERT INTO ofx_statements (
                account_id, filename, file_sha256, imported_at, currency, acctid,
                ledger_bal, ledger_bal_as_of, avail_bal, avail_bal_as_of
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.account_id,
                new.filename,
                new.file_sha256,
                Utc::now(),
                new.currency,
                new.acctid,
                decimal_param(new.ledger_bal),
                new.ledger_bal_as_of,
                decimal_param(new.avail_bal),
                new.avail_bal_as_of,
            ],
        )?;

        OfxStatement::get(conn, conn.last_insert_rowid())
    }

    pub fn get(conn: &Connection, id: i64) -> Result<OfxStatement> {
        conn.query_row(
            &format!("SELECT {} FROM ofx_statements WHERE id = ?1", COLUMNS),
            [id],
            OfxStatement::from_row,
        )
        .optional()?
        .ok_or_else(|| BudgetError::not_found("OfxStatement", id))
    }

    pub fn find_by_digest(conn: &Connection, account_id: i64, file_sha256: &str) -> Result<Option<OfxStatement>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM ofx_statements WHERE account_id = ?1 AND file_sha256 = ?2",
                    COLUMNS
                ),
                params![account_id, file_sha256],
                OfxStatement::from_row,
            )
            .optional()?)
    }

    /// Statement with the newest ledger balance date (falling back to import time)
    pub fn latest_for_account(conn: &Connection, account_id: i64) -> Result<Option<OfxStatement>> {
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {} FROM ofx_statements WHERE account_id = ?1
                     ORDER BY COALESCE(ledger_bal_as_of, imported_at) DESC, id DESC
                     LIMIT 1",
                    COLUMNS
                ),
                [account_id],
                OfxStatement::from_row,
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::AcctType;
    use chrono::TimeZone;

    fn new_statement(account_id: i64, digest: char, bal: i64, as_of: DateTime<Utc>) -> NewOfxStatement {
        NewOfxStatement {
            account_id,
            filename: "x.ofx".to_string(),
            file_sha256: digest.to_string().repeat(64),
            currency: Some("USD".to_string()),
            acctid: None,
            ledger_bal: Some(Decimal::from(bal)),
            ledger_bal_as_of: Some(as_of),
            avail_bal: None,
            avail_bal_as_of: None,
        }
    }

    #[test]
    fn test_latest_statement_drives_balance() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        assert_eq!(acct.balance(&conn).unwrap(), None);

        let older = Utc.with_ymd_and_hms(2017, 7, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2017, 8, 1, 0, 0, 0).unwrap();
        OfxStatement::create(&conn, &new_statement(acct.id, 'b', 200, newer)).unwrap();
        OfxStatement::create(&conn, &new_statement(acct.id, 'a', 100, older)).unwrap();

        assert_eq!(acct.balance(&conn).unwrap(), Some(Decimal::from(200)));
    }

    #[test]
    fn test_same_digest_twice_is_integrity_error() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let as_of = Utc.with_ymd_and_hms(2017, 7, 1, 0, 0, 0).unwrap();

        let first = OfxStatement::create(&conn, &new_statement(acct.id, 'c', 1, as_of)).unwrap();
        assert_eq!(
            OfxStatement::find_by_digest(&conn, acct.id, &first.file_sha256).unwrap(),
            Some(first)
        );
        assert!(OfxStatement::create(&conn, &new_statement(acct.id, 'c', 1, as_of))
            .unwrap_err()
            .is_integrity());
    }
}
