// Base schema: budgets, accounts, OFX statements/transactions, ledger
// transactions, reconcile rules and transaction reconciles.

use super::SchemaManager;
use crate::error::Result;

pub struct Migration;

const UPGRADE: &str = "
CREATE TABLE budgets (
    id INTEGER PRIMARY KEY,
    is_periodic BOOLEAN NOT NULL DEFAULT 1,
    name VARCHAR(50) NOT NULL UNIQUE,
    description VARCHAR(254),
    starting_balance NUMERIC(10,4),
    current_balance NUMERIC(10,4),
    is_active BOOLEAN NOT NULL DEFAULT 1,
    is_income BOOLEAN NOT NULL DEFAULT 0
);

CREATE TABLE accounts (
    id INTEGER PRIMARY KEY,
    name VARCHAR(50) NOT NULL UNIQUE,
    description VARCHAR(254),
    acct_type VARCHAR(20) NOT NULL,
    ofx_cat_memo_to_name BOOLEAN NOT NULL DEFAULT 0,
    negate_ofx_amounts BOOLEAN NOT NULL DEFAULT 0,
    reconcile_trans BOOLEAN NOT NULL DEFAULT 1,
    credit_limit NUMERIC(10,4),
    is_active BOOLEAN NOT NULL DEFAULT 1,
    re_interest_charge VARCHAR(254),
    re_payment VARCHAR(254)
);

CREATE TABLE ofx_statements (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    filename VARCHAR(254) NOT NULL,
    file_sha256 CHAR(64) NOT NULL,
    imported_at DATETIME NOT NULL,
    currency VARCHAR(10),
    acctid VARCHAR(255),
    ledger_bal NUMERIC(10,4),
    ledger_bal_as_of DATETIME,
    avail_bal NUMERIC(10,4),
    avail_bal_as_of DATETIME,
    CONSTRAINT uq_ofx_statements_account_file UNIQUE (account_id, file_sha256)
);

CREATE TABLE ofx_trans (
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    fitid VARCHAR(255) NOT NULL,
    statement_id INTEGER NOT NULL REFERENCES ofx_statements(id),
    trans_type VARCHAR(50),
    date_posted DATETIME NOT NULL,
    amount NUMERIC(10,4) NOT NULL,
    name VARCHAR(255),
    memo VARCHAR(255),
    notes TEXT,
    is_payment BOOLEAN NOT NULL DEFAULT 0,
    is_interest_charge BOOLEAN NOT NULL DEFAULT 0,
    PRIMARY KEY (account_id, fitid)
);

CREATE TABLE transactions (
    id INTEGER PRIMARY KEY,
    date DATE NOT NULL,
    actual_amount NUMERIC(10,4) NOT NULL,
    budgeted_amount NUMERIC(10,4),
    description VARCHAR(254) NOT NULL,
    notes VARCHAR(254),
    account_id INTEGER NOT NULL REFERENCES accounts(id),
    budget_id INTEGER REFERENCES budgets(id)
);

CREATE TABLE reconcile_rules (
    id INTEGER PRIMARY KEY,
    name VARCHAR(254) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1
);

CREATE TABLE txn_reconciles (
    id INTEGER PRIMARY KEY,
    txn_id INTEGER NOT NULL REFERENCES transactions(id) ON DELETE CASCADE,
    ofx_fitid VARCHAR(255),
    ofx_account_id INTEGER,
    rule_id INTEGER REFERENCES reconcile_rules(id),
    note VARCHAR(254),
    reconciled_at DATETIME,
    FOREIGN KEY (ofx_account_id, ofx_fitid) REFERENCES ofx_trans(account_id, fitid),
    CONSTRAINT uq_txn_reconciles_txn_id UNIQUE (txn_id),
    CONSTRAINT uq_txn_reconciles_ofx UNIQUE (ofx_account_id, ofx_fitid)
);

CREATE INDEX fk_txn_reconciles_txn_id_transactions
    ON txn_reconciles (txn_id);
CREATE INDEX fk_txn_reconciles_ofx_account_id_ofx_trans
    ON txn_reconciles (ofx_account_id, ofx_fitid);
CREATE INDEX idx_transactions_account_date ON transactions (account_id, date);
CREATE INDEX idx_ofx_trans_statement ON ofx_trans (statement_id);
";

const DOWNGRADE: &str = "
DROP TABLE txn_reconciles;
DROP TABLE reconcile_rules;
DROP TABLE transactions;
DROP TABLE ofx_trans;
DROP TABLE ofx_statements;
DROP TABLE accounts;
DROP TABLE budgets;
";

impl super::Migration for Migration {
    fn revision(&self) -> &'static str {
        "ceb73ddf66eb"
    }

    fn down_revision(&self) -> Option<&'static str> {
        None
    }

    fn description(&self) -> &'static str {
        "initial schema"
    }

    fn upgrade(&self, schema: &SchemaManager<'_>) -> Result<()> {
        schema.execute_batch(UPGRADE)
    }

    fn downgrade(&self, schema: &SchemaManager<'_>) -> Result<()> {
        schema.execute_batch(DOWNGRADE)
    }
}
