// Entity models - one module per table
//
// Each entity is a plain struct with a `from_row` mapper plus the inserts and
// lookups the rest of the application needs. Relationships are methods that
// take the connection and run the join/lookup on demand.

pub mod account;
pub mod budget;
pub mod ofx_statement;
pub mod ofx_transaction;
pub mod reconcile_rule;
pub mod transaction;
pub mod txn_reconcile;

pub use account::{AcctType, Account, InterestSettings, NewAccount, PayoffReport};
pub use budget::{Budget, NewBudget};
pub use ofx_statement::{NewOfxStatement, OfxStatement};
pub use ofx_transaction::{OfxKey, OfxTransaction, UpsertOutcome};
pub use reconcile_rule::ReconcileRule;
pub use transaction::{NewTransaction, Transaction};
pub use txn_reconcile::{NewTxnReconcile, TxnReconcile};

use crate::error::{BudgetError, Result};

/// SQLite does not enforce VARCHAR(n); lengths are checked before writes
pub(crate) fn check_length(field: &str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(BudgetError::Validation(format!(
            "{} is {} characters; maximum is {}",
            field, len, max
        )));
    }
    Ok(())
}

pub(crate) fn check_optional_length(field: &str, value: Option<&str>, max: usize) -> Result<()> {
    match value {
        Some(v) => check_length(field, v, max),
        None => Ok(()),
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(BudgetError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared setup for model and service tests

    use chrono::NaiveDate;
    use rusqlite::Connection;
    use rust_decimal::Decimal;

    use super::*;
    use crate::{db, migrations};

    pub fn migrated_db() -> Connection {
        let mut conn = db::open_in_memory().unwrap();
        migrations::upgrade_to_head(&mut conn).unwrap();
        conn
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn account(conn: &Connection, name: &str, acct_type: AcctType) -> Account {
        Account::create(conn, &NewAccount::new(name, acct_type)).unwrap()
    }

    pub fn transaction(conn: &Connection, account_id: i64, amount: Decimal, on: NaiveDate) -> Transaction {
        Transaction::create(
            conn,
            &NewTransaction {
                date: on,
                actual_amount: amount,
                budgeted_amount: None,
                description: format!("txn {}", amount),
                notes: None,
                account_id,
                budget_id: None,
            },
        )
        .unwrap()
    }

    pub fn statement(conn: &Connection, account_id: i64) -> OfxStatement {
        OfxStatement::create(
            conn,
            &NewOfxStatement {
                account_id,
                filename: "stmt.ofx".to_string(),
                file_sha256: format!("{:064}", account_id),
                currency: Some("USD".to_string()),
                acctid: Some("1234".to_string()),
                ledger_bal: None,
                ledger_bal_as_of: None,
                avail_bal: None,
                avail_bal_as_of: None,
            },
        )
        .unwrap()
    }

    pub fn ofx_trans(
        conn: &Connection,
        statement: &OfxStatement,
        fitid: &str,
        amount: Decimal,
        on: NaiveDate,
    ) -> OfxTransaction {
        let ofx = OfxTransaction {
            account_id: statement.account_id,
            fitid: fitid.to_string(),
            statement_id: statement.id,
            trans_type: Some("DEBIT".to_string()),
            date_posted: on.and_hms_opt(12, 0, 0).unwrap().and_utc(),
            amount,
            name: Some(format!("OFX {}", fitid)),
            memo: None,
            notes: None,
            is_payment: false,
            is_interest_charge: false,
        };
        OfxTransaction::upsert(conn, &ofx).unwrap();
        ofx
    }
}
