// 🤝 Reconciliation - match ledger transactions to imported OFX records
// Two strategies: exact date, near date (within a tolerance)
//
// A ledger transaction matches an OFX record when both are in the same
// account and the transaction amount is the negated OFX amount (budget sign
// convention vs. bank sign convention).

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BudgetError, Result};
use crate::models::{
    NewTxnReconcile, OfxKey, OfxTransaction, ReconcileRule, Transaction, TxnReconcile,
};

// ============================================================================
// MANUAL RECONCILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub txn_id: i64,
    #[serde(default)]
    pub ofx: Option<OfxKey>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Unreconciled {
    pub transactions: Vec<Transaction>,
    pub ofx: Vec<OfxTransaction>,
}

pub fn unreconciled_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    Transaction::unreconciled(conn)
}

pub fn unreconciled_ofx(conn: &Connection) -> Result<Vec<OfxTransaction>> {
    OfxTransaction::unreconciled(conn)
}

pub fn unreconciled(conn: &Connection) -> Result<Unreconciled> {
    Ok(Unreconciled {
        transactions: unreconciled_transactions(conn)?,
        ofx: unreconciled_ofx(conn)?,
    })
}

/// Reconcile a transaction by hand.
///
/// With an OFX record, both must belong to the same account. Without one,
/// a note explaining why there is no bank record is required.
pub fn reconcile(conn: &Connection, request: &ReconcileRequest) -> Result<TxnReconcile> {
    let txn = Transaction::get(conn, request.txn_id)?;
    let note = request.note.clone().filter(|n| !n.trim().is_empty());

    match &request.ofx {
        Some(key) => {
            let ofx = OfxTransaction::require(conn, key)?;
            if ofx.account_id != txn.account_id {
                return Err(BudgetError::Validation(format!(
                    "transaction {} is in account {} but OFX {} is in account {}",
                    txn.id, txn.account_id, key, ofx.account_id
                )));
            }
        }
        None if note.is_none() => {
            return Err(BudgetError::Validation(
                "a note is required when reconciling without an OFX transaction".to_string(),
            ))
        }
        None => {}
    }

    TxnReconcile::create(
        conn,
        &NewTxnReconcile {
            txn_id: txn.id,
            ofx: request.ofx.clone(),
            rule_id: None,
            note,
            reconciled_at: None,
        },
    )
}

// ============================================================================
// MATCH SUGGESTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStrategy {
    /// Same account, opposite amount, same day
    ExactDate,

    /// Same account, opposite amount, posted within the date tolerance
    NearDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub txn_id: i64,
    pub ofx: OfxKey,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f64,

    pub strategy: MatchStrategy,

    /// Human-readable reason
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Matcher {
    /// Maximum days between ledger date and posting date (default: 3)
    pub date_tolerance_days: i64,

    /// Confidence for same-day matches (default: 0.95)
    pub exact_confidence: f64,

    /// Confidence for a one-day gap, reduced 0.05 per further day (default: 0.85)
    pub near_confidence: f64,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher {
            date_tolerance_days: 3,
            exact_confidence: 0.95,
            near_confidence: 0.85,
        }
    }

    pub fn with_tolerance(days: i64) -> Self {
        Matcher {
            date_tolerance_days: days.max(0),
            ..Matcher::new()
        }
    }

    /// Name of the reconcile rule auto-reconciles are attributed to
    pub fn rule_name(&self) -> String {
        format!("amount match within {} days", self.date_tolerance_days)
    }

    fn check(&self, txn: &Transaction, ofx: &OfxTransaction) -> Option<Suggestion> {
        if txn.account_id != ofx.account_id || txn.actual_amount != -ofx.amount {
            return None;
        }

        let posted: NaiveDate = ofx.date_posted.date_naive();
        let days = (posted - txn.date).num_days().abs();

        let (strategy, confidence, reason) = if days == 0 {
            (
                MatchStrategy::ExactDate,
                self.exact_confidence,
                format!("amount {} posted the same day", txn.actual_amount),
            )
        } else if days <= self.date_tolerance_days {
            (
                MatchStrategy::NearDate,
                (self.near_confidence - 0.05 * (days - 1) as f64).max(0.0),
                format!("amount {} posted {} day(s) apart", txn.actual_amount, days),
            )
        } else {
            return None;
        };

        Some(Suggestion {
            txn_id: txn.id,
            ofx: ofx.key(),
            confidence,
            strategy,
            reason,
        })
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidate matches between unreconciled transactions and OFX records,
/// best first
pub fn suggest_matches(conn: &Connection, matcher: &Matcher) -> Result<Vec<Suggestion>> {
    let txns = unreconciled_transactions(conn)?;
    let ofx = unreconciled_ofx(conn)?;

    let mut suggestions: Vec<Suggestion> = txns
        .iter()
        .flat_map(|t| ofx.iter().filter_map(move |o| matcher.check(t, o)))
        .collect();

    suggestions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.txn_id.cmp(&b.txn_id))
            .then_with(|| a.ofx.cmp(&b.ofx))
    });
    Ok(suggestions)
}

/// Reconcile every unambiguous suggestion: the transaction and the OFX
/// record each appear in exactly one candidate pair. Runs in one database
/// transaction.
pub fn auto_reconcile(conn: &mut Connection, matcher: &Matcher) -> Result<Vec<TxnReconcile>> {
    let suggestions = suggest_matches(conn, matcher)?;

    let mut per_txn: HashMap<i64, usize> = HashMap::new();
    let mut per_ofx: HashMap<&OfxKey, usize> = HashMap::new();
    for s in &suggestions {
        *per_txn.entry(s.txn_id).or_default() += 1;
        *per_ofx.entry(&s.ofx).or_default() += 1;
    }

    let unambiguous: Vec<&Suggestion> = suggestions
        .iter()
        .filter(|s| per_txn.get(&s.txn_id) == Some(&1) && per_ofx.get(&s.ofx) == Some(&1))
        .collect();

    if unambiguous.is_empty() {
        tracing::info!(candidates = suggestions.len(), "no unambiguous matches to reconcile");
        return Ok(Vec::new());
    }

    let tx = conn.transaction()?;
    let rule = ReconcileRule::find_or_create(&tx, &matcher.rule_name())?;

    let mut created = Vec::with_capacity(unambiguous.len());
    for s in unambiguous {
        created.push(TxnReconcile::create(
            &tx,
            &NewTxnReconcile {
                txn_id: s.txn_id,
                ofx: Some(s.ofx.clone()),
                rule_id: Some(rule.id),
                note: Some(s.reason.clone()),
                reconciled_at: None,
            },
        )?);
    }
    tx.commit()?;

    tracing::info!(
        reconciled = created.len(),
        skipped = suggestions.len() - created.len(),
        rule = %rule.name,
        "auto-reconciled transactions"
    );
    Ok(created)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{AcctType, Account, NewAccount};
    use rust_decimal::Decimal;

    fn dollars(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_reconcile_with_ofx() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        let txn = transaction(&conn, acct.id, dollars(1999), date(2017, 7, 3));
        let ofx = ofx_trans(&conn, &stmt, "F1", dollars(-1999), date(2017, 7, 3));

        let rec = reconcile(
            &conn,
            &ReconcileRequest {
                txn_id: txn.id,
                ofx: Some(ofx.key()),
                note: None,
            },
        )
        .unwrap();

        assert_eq!(rec.txn_id, txn.id);
        assert_eq!(rec.ofx_key(), Some(ofx.key()));
        assert!(unreconciled_transactions(&conn).unwrap().is_empty());
        assert!(unreconciled_ofx(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_twice_is_integrity_error() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        let txn = transaction(&conn, acct.id, dollars(500), date(2017, 7, 3));
        let ofx = ofx_trans(&conn, &stmt, "F1", dollars(-500), date(2017, 7, 3));
        let request = ReconcileRequest {
            txn_id: txn.id,
            ofx: Some(ofx.key()),
            note: None,
        };

        reconcile(&conn, &request).unwrap();
        assert!(reconcile(&conn, &request).unwrap_err().is_integrity());
    }

    #[test]
    fn test_reconcile_requires_note_without_ofx() {
        let conn = migrated_db();
        let acct = account(&conn, "Cash", AcctType::Cash);
        let txn = transaction(&conn, acct.id, dollars(300), date(2017, 7, 3));

        let bare = ReconcileRequest {
            txn_id: txn.id,
            ofx: None,
            note: Some("  ".to_string()),
        };
        assert!(matches!(reconcile(&conn, &bare), Err(BudgetError::Validation(_))));

        let noted = ReconcileRequest {
            note: Some("paid in cash".to_string()),
            ..bare
        };
        let rec = reconcile(&conn, &noted).unwrap();
        assert_eq!(rec.note.as_deref(), Some("paid in cash"));
    }

    #[test]
    fn test_reconcile_rejects_other_account() {
        let conn = migrated_db();
        let checking = account(&conn, "Checking", AcctType::Bank);
        let visa = account(&conn, "Visa", AcctType::Credit);
        let stmt = statement(&conn, visa.id);
        let txn = transaction(&conn, checking.id, dollars(100), date(2017, 7, 3));
        let ofx = ofx_trans(&conn, &stmt, "V1", dollars(-100), date(2017, 7, 3));

        let err = reconcile(
            &conn,
            &ReconcileRequest {
                txn_id: txn.id,
                ofx: Some(ofx.key()),
                note: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BudgetError::Validation(_)));
    }

    #[test]
    fn test_accounts_without_reconcile_trans_are_skipped() {
        let conn = migrated_db();
        let mut new = NewAccount::new("Brokerage", AcctType::Investment);
        new.reconcile_trans = false;
        let acct = Account::create(&conn, &new).unwrap();
        transaction(&conn, acct.id, dollars(100), date(2017, 7, 3));

        assert!(unreconciled(&conn).unwrap().transactions.is_empty());
    }

    #[test]
    fn test_suggestions_rank_exact_before_near() {
        let conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        let exact = transaction(&conn, acct.id, dollars(4200), date(2017, 7, 10));
        let near = transaction(&conn, acct.id, dollars(1500), date(2017, 7, 10));
        let far = transaction(&conn, acct.id, dollars(900), date(2017, 7, 1));
        ofx_trans(&conn, &stmt, "E", dollars(-4200), date(2017, 7, 10));
        ofx_trans(&conn, &stmt, "N", dollars(-1500), date(2017, 7, 12));
        ofx_trans(&conn, &stmt, "F", dollars(-900), date(2017, 7, 9));
        // wrong sign never matches
        ofx_trans(&conn, &stmt, "S", dollars(4200), date(2017, 7, 10));

        let suggestions = suggest_matches(&conn, &Matcher::new()).unwrap();

        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].txn_id, exact.id);
        assert_eq!(suggestions[0].strategy, MatchStrategy::ExactDate);
        assert_eq!(suggestions[0].ofx.fitid, "E");
        assert_eq!(suggestions[1].txn_id, near.id);
        assert_eq!(suggestions[1].strategy, MatchStrategy::NearDate);
        assert!((suggestions[1].confidence - 0.80).abs() < 1e-9);
        assert!(suggestions.iter().all(|s| s.txn_id != far.id));
    }

    #[test]
    fn test_auto_reconcile_skips_ambiguous() {
        let mut conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let stmt = statement(&conn, acct.id);
        let single = transaction(&conn, acct.id, dollars(1234), date(2017, 7, 3));
        // two identical ledger entries competing for one bank record
        transaction(&conn, acct.id, dollars(5000), date(2017, 7, 5));
        transaction(&conn, acct.id, dollars(5000), date(2017, 7, 5));
        ofx_trans(&conn, &stmt, "ONE", dollars(-1234), date(2017, 7, 4));
        ofx_trans(&conn, &stmt, "TWO", dollars(-5000), date(2017, 7, 5));

        let matcher = Matcher::new();
        let created = auto_reconcile(&mut conn, &matcher).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].txn_id, single.id);
        let rule = created[0].rule(&conn).unwrap().unwrap();
        assert_eq!(rule.name, matcher.rule_name());
        assert_eq!(unreconciled_transactions(&conn).unwrap().len(), 2);

        // nothing left that is unambiguous
        assert!(auto_reconcile(&mut conn, &matcher).unwrap().is_empty());
    }
}
