// biweeklybudget - Core Library
// Exposes all modules for use in the CLI, web server, release tool and tests

pub mod config;
pub mod db;
pub mod error;
pub mod importer;
pub mod interest;
pub mod logging;
pub mod migrations;
pub mod models;
pub mod ofx;
pub mod reconcile;

#[cfg(feature = "server")]
pub mod web;

#[cfg(feature = "release")]
pub mod release;

// Re-export commonly used types
pub use error::{BudgetError, Result};
pub use interest::{
    BillingPeriod, BillingPeriodRule, InterestCalculation, MinPaymentFormula,
    PaymentPlan, PayoffCalculator, PayoffOutcome,
};
pub use models::{
    Account, AcctType, Budget, InterestSettings, NewAccount, NewBudget,
    NewTransaction, NewTxnReconcile, OfxKey, OfxStatement, OfxTransaction,
    PayoffReport, ReconcileRule, Transaction, TxnReconcile,
};
pub use reconcile::{Matcher, ReconcileRequest, Suggestion};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
