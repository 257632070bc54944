// 🔗 TxnReconcile - links one ledger transaction to its bank record
//
// A transaction is reconciled at most once and an OFX transaction is matched
// at most once; both are UNIQUE constraints in the schema, so a duplicate
// attempt comes back as `BudgetError::Integrity`. Rows are never updated in
// place and disappear only when their transaction is deleted (ON DELETE
// CASCADE).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ofx_transaction::FITID_MAX;
use super::{check_length, check_optional_length, OfxKey, OfxTransaction, ReconcileRule, Transaction};
use crate::error::{BudgetError, Result};

pub const NOTE_MAX: usize = 254;

const COLUMNS: &str = "id, txn_id, ofx_fitid, ofx_account_id, rule_id, note, reconciled_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxnReconcile {
    pub id: i64,
    pub txn_id: i64,
    pub ofx_fitid: Option<String>,
    pub ofx_account_id: Option<i64>,
    pub rule_id: Option<i64>,
    pub note: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewTxnReconcile {
    pub txn_id: i64,
    pub ofx: Option<OfxKey>,
    pub rule_id: Option<i64>,
    pub note: Option<String>,
    /// Defaults to now
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl fmt::Display for TxnReconcile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TxnReconcile(id={})>", self.id)
    }
}

impl TxnReconcile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TxnReconcile {
            id: row.get(0)?,
            txn_id: row.get(1)?,
            ofx_fitid: row.get(2)?,
            ofx_account_id: row.get(3)?,
            rule_id: row.get(4)?,
            note: row.get(5)?,
            reconciled_at: row.get(6)?,
        })
    }

    fn query_one(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Option<TxnReconcile>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM txn_reconciles WHERE {}", COLUMNS, filter),
                params,
                TxnReconcile::from_row,
            )
            .optional()?)
    }

    pub fn create(conn: &Connection, new: &NewTxnReconcile) -> Result<TxnReconcile> {
        check_optional_length("note", new.note.as_deref(), NOTE_MAX)?;
        if let Some(key) = &new.ofx {
            check_length("ofx_fitid", &key.fitid, FITID_MAX)?;
        }

        let reconciled_at = new.reconciled_at.unwrap_or_else(Utc::now);
        conn.execute(
            "INSERT INTO txn_reconciles (txn_id, ofx_fitid, ofx_account_id, rule_id, note, reconciled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.txn_id,
                new.ofx.as_ref().map(|k| k.fitid.as_str()),
                new.ofx.as_ref().map(|k| k.account_id),
                new.rule_id,
                new.note,
                reconciled_at,
            ],
        )?;

        let created = TxnReconcile::get(conn, conn.last_insert_rowid())?;
        tracing::info!(reconcile = %created, txn_id = new.txn_id, "reconciled transaction");
        Ok(created)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<TxnReconcile> {
        TxnReconcile::query_one(conn, "id = ?1", [id])?
            .ok_or_else(|| BudgetError::not_found("TxnReconcile", id))
    }

    pub fn all(conn: &Connection) -> Result<Vec<TxnReconcile>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM txn_reconciles ORDER BY id", COLUMNS))?;
        let rows = stmt
            .query_map([], TxnReconcile::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn for_transaction(conn: &Connection, txn_id: i64) -> Result<Option<TxnReconcile>> {
        TxnReconcile::query_one(conn, "txn_id = ?1", [txn_id])
    }

    pub fn for_ofx(conn: &Connection, key: &OfxKey) -> Result<Option<TxnReconcile>> {
        TxnReconcile::query_one(
            conn,
            "ofx_account_id = ?1 AND ofx_fitid = ?2",
            params![key.account_id, key.fitid],
        )
    }

    pub fn ofx_key(&self) -> Option<OfxKey> {
        match (self.ofx_account_id, &self.ofx_fitid) {
            (Some(account_id), Some(fitid)) => Some(OfxKey::new(account_id, fitid.clone())),
            _ => None,
        }
    }

    pub fn transaction(&self, conn: &Connection) -> Result<Transaction> {
        Transaction::get(conn, self.txn_id)
    }

    pub fn ofx_transaction(&self, conn: &Connection) -> Result<Option<OfxTransaction>> {
        match self.ofx_key() {
            Some(key) => Ok(Some(OfxTransaction::require(conn, &key)?)),
            None => Ok(None),
        }
    }

    pub fn rule(&self, conn: &Connection) -> Result<Option<ReconcileRule>> {
        self.rule_id.map(|id| ReconcileRule::get(conn, id)).transpose()
    }
}
