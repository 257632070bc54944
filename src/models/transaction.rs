// 💵 Transaction - a ledger entry against an account and (optionally) a budget

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{check_length, check_optional_length, require_non_empty, Account, Budget, TxnReconcile};
use crate::db::{decimal_param, get_decimal, get_decimal_required};
use crate::error::{BudgetError, Result};

const COLUMNS: &str =
    "id, date, actual_amount, budgeted_amount, description, notes, account_id, budget_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: NaiveDate,
    /// Budget sign convention: positive is money spent. The matching bank
    /// record carries the opposite sign.
    pub actual_amount: Decimal,
    pub budgeted_amount: Option<Decimal>,
    pub description: String,
    pub notes: Option<String>,
    pub account_id: i64,
    pub budget_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub actual_amount: Decimal,
    #[serde(default)]
    pub budgeted_amount: Option<Decimal>,
    pub description: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub account_id: i64,
    #[serde(default)]
    pub budget_id: Option<i64>,
}

impl Transaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            date: row.get(1)?,
            actual_amount: get_decimal_required(row, 2)?,
            budgeted_amount: get_decimal(row, 3)?,
            description: row.get(4)?,
            notes: row.get(5)?,
            account_id: row.get(6)?,
            budget_id: row.get(7)?,
        })
    }

    pub fn create(conn: &Connection, new: &NewTransaction) -> Result<Transaction> {
        require_non_empty("description", &new.description)?;
        check_length("description", &new.description, 254)?;
        check_optional_length("notes", new.notes.as_deref(), 254)?;

        conn.execute(
            "INSERT INTO transactions (date, actual_amount, budgeted_amount, description, notes, account_id, budget_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.date,
                new.actual_amount.to_string(),
                decimal_param(new.budgeted_amount),
                new.description,
                new.notes,
                new.account_id,
                new.budget_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!(txn_id = id, account_id = new.account_id, "created transaction");
        Transaction::get(conn, id)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Transaction> {
        conn.query_row(
            &format!("SELECT {} FROM transactions WHERE id = ?1", COLUMNS),
            [id],
            Transaction::from_row,
        )
        .optional()?
        .ok_or_else(|| BudgetError::not_found("Transaction", id))
    }

    pub fn all(conn: &Connection) -> Result<Vec<Transaction>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM transactions ORDER BY date, id", COLUMNS))?;
        let rows = stmt
            .query_map([], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn for_account(conn: &Connection, account_id: i64) -> Result<Vec<Transaction>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY date, id",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([account_id], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions with no reconcile, in accounts that take part in reconciliation
    pub fn unreconciled(conn: &Connection) -> Result<Vec<Transaction>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE id NOT IN (SELECT txn_id FROM txn_reconciles)
               AND account_id IN (SELECT id FROM accounts WHERE reconcile_trans = 1)
             ORDER BY date, id",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map([], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a transaction; its reconcile (if any) goes with it
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        let deleted = conn.execute("DELETE FROM transactions WHERE id = ?1", [id])?;
        if deleted == 0 {
            return Err(BudgetError::not_found("Transaction", id));
        }
        tracing::info!(txn_id = id, "deleted transaction");
        Ok(())
    }

    pub fn account(&self, conn: &Connection) -> Result<Account> {
        Account::get(conn, self.account_id)
    }

    pub fn budget(&self, conn: &Connection) -> Result<Option<Budget>> {
        self.budget_id.map(|id| Budget::get(conn, id)).transpose()
    }

    /// The reconcile record for this transaction, if any
    pub fn reconcile(&self, conn: &Connection) -> Result<Option<TxnReconcile>> {
        TxnReconcile::for_transaction(conn, self.id)
    }
}
