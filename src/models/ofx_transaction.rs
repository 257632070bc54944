// 🏦 OFX transaction - one bank-reported transaction, keyed by (account, FITID)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{check_length, check_optional_length, TxnReconcile};
use crate::db::get_decimal_required;
use crate::error::{BudgetError, Result};

pub(crate) const FITID_MAX: usize = 255;

const COLUMNS: &str = "account_id, fitid, statement_id, trans_type, date_posted, amount, \
    name, memo, notes, is_payment, is_interest_charge";

/// Composite primary key of an OFX transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OfxKey {
    pub account_id: i64,
    pub fitid: String,
}

impl OfxKey {
    pub fn new(account_id: i64, fitid: impl Into<String>) -> Self {
        OfxKey {
            account_id,
            fitid: fitid.into(),
        }
    }
}

impl fmt::Display for OfxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.fitid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfxTransaction {
    pub account_id: i64,
    pub fitid: String,
    pub statement_id: i64,
    pub trans_type: Option<String>,
    pub date_posted: DateTime<Utc>,
    /// Bank sign convention, after `negate_ofx_amounts` has been applied
    pub amount: Decimal,
    pub name: Option<String>,
    pub memo: Option<String>,
    pub notes: Option<String>,
    pub is_payment: bool,
    pub is_interest_charge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl OfxTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OfxTransaction {
            account_id: row.get(0)?,
            fitid: row.get(1)?,
            statement_id: row.get(2)?,
            trans_type: row.get(3)?,
            date_posted: row.get(4)?,
            amount: get_decimal_required(row, 5)?,
            name: row.get(6)?,
            memo: row.get(7)?,
            notes: row.get(8)?,
            is_payment: row.get(9)?,
            is_interest_charge: row.get(10)?,
        })
    }

    pub fn key(&self) -> OfxKey {
        OfxKey::new(self.account_id, self.fitid.clone())
    }

    pub fn get(conn: &Connection, key: &OfxKey) -> Result<Option<OfxTransaction>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM ofx_trans WHERE account_id = ?1 AND fitid = ?2", COLUMNS),
                params![key.account_id, key.fitid],
                OfxTransaction::from_row,
            )
            .optional()?)
    }

    pub fn require(conn: &Connection, key: &OfxKey) -> Result<OfxTransaction> {
        OfxTransaction::get(conn, key)?.ok_or_else(|| BudgetError::not_found("OfxTransaction", key))
    }

    pub fn for_account(conn: &Connection, account_id: i64) -> Result<Vec<OfxTransaction>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ofx_trans WHERE account_id = ?1 ORDER BY date_posted, fitid",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([account_id], OfxTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// OFX transactions not yet matched, in accounts that take part in reconciliation
    pub fn unreconciled(conn: &Connection) -> Result<Vec<OfxTransaction>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ofx_trans
             WHERE account_id IN (SELECT id FROM accounts WHERE reconcile_trans = 1)
               AND NOT EXISTS (
                   SELECT 1 FROM txn_reconciles r
                   WHERE r.ofx_account_id = ofx_trans.account_id AND r.ofx_fitid = ofx_trans.fitid
               )
             ORDER BY date_posted, account_id, fitid",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], OfxTransaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert, or refresh the bank-reported fields of an existing row.
    ///
    /// `notes` are user-owned and survive re-imports.
    pub fn upsert(conn: &Connection, ofx: &OfxTransaction) -> Result<UpsertOutcome> {
        check_length("fitid", &ofx.fitid, FITID_MAX)?;
        check_optional_length("name", ofx.name.as_deref(), 255)?;
        check_optional_length("memo", ofx.memo.as_deref(), 255)?;

        let updated = conn.execute(
            "UPDATE ofx_trans SET
                statement_id = ?3, trans_type = ?4, date_posted = ?5, amount = ?6,
                name = ?7, memo = ?8, is_payment = ?9, is_interest_charge = ?10
             WHERE account_id = ?1 AND fitid = ?2",
            params![
                ofx.account_id,
                ofx.fitid,
                ofx.statement_id,
                ofx.trans_type,
                ofx.date_posted,
                ofx.amount.to_string(),
                ofx.name,
                ofx.memo,
                ofx.is_payment,
                ofx.is_interest_charge,
            ],
        )?;
        if updated > 0 {
            return Ok(UpsertOutcome::Updated);
        }

        conn.execute(
            "INSERT INTO ofx_trans (
                account_id, fitid, statement_id, trans_type, date_posted, amount,
                name, memo, notes, is_payment, is_interest_charge
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ofx.account_id,
                ofx.fitid,
                ofx.statement_id,
                ofx.trans_type,
                ofx.date_posted,
                ofx.amount.to_string(),
                ofx.name,
                ofx.memo,
                ofx.notes,
                ofx.is_payment,
                ofx.is_interest_charge,
            ],
        )?;
        Ok(UpsertOutcome::Inserted)
    }

    /// The reconcile record pointing at this OFX transaction, if any
    pub fn reconcile(&self, conn: &Connection) -> Result<Option<TxnReconcile>> {
        TxnReconcile::for_ofx(conn, &self.key())
    }
}
