// 📦 Importers - OFX statements and CSV ledger transactions
//
// OFX files are fingerprinted with SHA-256; the same file is never imported
// twice for one account. OFX transactions are upserted by (account, FITID),
// so overlapping statements refresh rather than duplicate.

use chrono::NaiveDate;
use regex::Regex;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{BudgetError, Result};
use crate::models::{
    Account, Budget, NewOfxStatement, NewTransaction, OfxStatement, OfxTransaction, Transaction,
    UpsertOutcome,
};
use crate::ofx::{self, ParsedStatement, ParsedTransaction};

const OFX_TEXT_MAX: usize = 255;

// ============================================================================
// OFX IMPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfxImportSummary {
    pub statement_id: i64,
    pub new: usize,
    pub updated: usize,
}

/// Hex SHA-256 of the file contents
pub fn file_sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn import_ofx(conn: &mut Connection, account: &Account, path: &Path) -> Result<OfxImportSummary> {
    let bytes = std::fs::read(path)?;
    let digest = file_sha256(&bytes);

    if let Some(existing) = OfxStatement::find_by_digest(conn, account.id, &digest)? {
        return Err(BudgetError::Integrity(format!(
            "{} was already imported for account {} (statement {})",
            path.display(),
            account.name,
            existing.id
        )));
    }

    let parsed = ofx::parse_str(&String::from_utf8_lossy(&bytes))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    import_statement(conn, account, &filename, &digest, &parsed)
}

/// Store an already parsed statement in one database transaction
pub fn import_statement(
    conn: &mut Connection,
    account: &Account,
    filename: &str,
    digest: &str,
    parsed: &ParsedStatement,
) -> Result<OfxImportSummary> {
    let options = ImportOptions::for_account(account)?;
    let tx = conn.transaction()?;

    let statement = OfxStatement::create(
        &tx,
        &NewOfxStatement {
            account_id: account.id,
            filename: filename.to_string(),
            file_sha256: digest.to_string(),
            currency: parsed.currency.clone(),
            acctid: parsed.acctid.clone(),
            ledger_bal: parsed.ledger_bal,
            ledger_bal_as_of: parsed.ledger_bal_as_of,
            avail_bal: parsed.avail_bal,
            avail_bal_as_of: parsed.avail_bal_as_of,
        },
    )?;

    let mut summary = OfxImportSummary {
        statement_id: statement.id,
        new: 0,
        updated: 0,
    };

    for parsed_trn in &parsed.transactions {
        let record = options.apply(account.id, statement.id, parsed_trn);
        match OfxTransaction::upsert(&tx, &record)? {
            UpsertOutcome::Inserted => summary.new += 1,
            UpsertOutcome::Updated => summary.updated += 1,
        }
    }

    tx.commit()?;

    tracing::info!(
        account = %account.name,
        filename,
        statement_id = summary.statement_id,
        new = summary.new,
        updated = summary.updated,
        "imported OFX statement"
    );
    Ok(summary)
}

/// Per-account rules applied to every imported OFX transaction
struct ImportOptions {
    negate_amounts: bool,
    cat_memo_to_name: bool,
    interest_charge: Option<Regex>,
    payment: Option<Regex>,
}

impl ImportOptions {
    fn for_account(account: &Account) -> Result<Self> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .map(|p| Regex::new(p).map_err(|e| BudgetError::Validation(format!("invalid regex {:?}: {}", p, e))))
                .transpose()
        };

        Ok(ImportOptions {
            negate_amounts: account.negate_ofx_amounts,
            cat_memo_to_name: account.ofx_cat_memo_to_name,
            interest_charge: compile(&account.re_interest_charge)?,
            payment: compile(&account.re_payment)?,
        })
    }

    fn apply(&self, account_id: i64, statement_id: i64, trn: &ParsedTransaction) -> OfxTransaction {
        let amount = if self.negate_amounts { -trn.amount } else { trn.amount };

        let name = match (&trn.name, &trn.memo) {
            (Some(name), Some(memo)) if self.cat_memo_to_name => Some(format!("{} {}", name, memo)),
            (None, Some(memo)) if self.cat_memo_to_name => Some(memo.clone()),
            (name, _) => name.clone(),
        };
        let name = name.map(|n| truncate(&n, OFX_TEXT_MAX));

        let matches = |re: &Option<Regex>| match (re, &name) {
            (Some(re), Some(name)) => re.is_match(name),
            _ => false,
        };

        OfxTransaction {
            account_id,
            fitid: trn.fitid.clone(),
            statement_id,
            trans_type: trn.trans_type.clone(),
            date_posted: trn.date_posted,
            amount,
            is_payment: matches(&self.payment),
            is_interest_charge: matches(&self.interest_charge),
            name,
            memo: trn.memo.as_deref().map(|m| truncate(m, OFX_TEXT_MAX)),
            notes: None,
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

// ============================================================================
// CSV TRANSACTION IMPORT
// ============================================================================

/// One row of a transactions CSV: `date,amount,description,account,budget,notes`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransactionRow {
    pub date: NaiveDate,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub description: String,
    pub account: String,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

pub fn load_transactions_csv(path: &Path) -> Result<Vec<TransactionRow>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: TransactionRow = result?;
        rows.push(row);
    }
    Ok(rows)
}

/// Insert every row or none; account and budget are looked up by name
pub fn import_transactions(conn: &mut Connection, rows: &[TransactionRow]) -> Result<Vec<Transaction>> {
    let tx = conn.transaction()?;
    let mut created = Vec::with_capacity(rows.len());

    for row in rows {
        let account = Account::find_by_name(&tx, &row.account)?
            .ok_or_else(|| BudgetError::not_found("Account", &row.account))?;
        let budget_id = match row.budget.as_deref().filter(|b| !b.is_empty()) {
            Some(name) => Some(
                Budget::find_by_name(&tx, name)?
                    .ok_or_else(|| BudgetError::not_found("Budget", name))?
                    .id,
            ),
            None => None,
        };

        created.push(Transaction::create(
            &tx,
            &NewTransaction {
                date: row.date,
                actual_amount: row.amount,
                budgeted_amount: None,
                description: row.description.clone(),
                notes: row.notes.clone().filter(|n| !n.is_empty()),
                account_id: account.id,
                budget_id,
            },
        )?);
    }

    tx.commit()?;
    tracing::info!(count = created.len(), "imported transactions");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;
    use crate::models::{AcctType, NewAccount, NewBudget};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const STATEMENT: &str = "OFXHEADER:100
DATA:OFXSGML

<OFX><CREDITCARDMSGSRSV1><CCSTMTTRNRS><CCSTMTRS>
<CURDEF>USD
<CCACCTFROM><ACCTID>4111</CCACCTFROM>
<BANKTRANLIST>
<STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20170703<TRNAMT>-12.34<FITID>A1<NAME>COFFEE<MEMO>POS 123</STMTTRN>
<STMTTRN><TRNTYPE>CREDIT<DTPOSTED>20170710<TRNAMT>200.00<FITID>A2<NAME>PAYMENT - THANK YOU</STMTTRN>
<STMTTRN><TRNTYPE>DEBIT<DTPOSTED>20170731<TRNAMT>-4.56<FITID>A3<NAME>INTEREST CHARGE ON PURCHASES</STMTTRN>
</BANKTRANLIST>
<LEDGERBAL><BALAMT>-512.00<DTASOF>20170731</LEDGERBAL>
</CCSTMTRS></CCSTMTTRNRS></CREDITCARDMSGSRSV1></OFX>
";

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn credit_account(conn: &Connection) -> Account {
        let mut new = NewAccount::new("Visa", AcctType::Credit);
        new.negate_ofx_amounts = true;
        new.ofx_cat_memo_to_name = true;
        new.re_payment = Some("^PAYMENT".to_string());
        new.re_interest_charge = Some("INTEREST CHARGE".to_string());
        Account::create(conn, &new).unwrap()
    }

    #[test]
    fn test_import_applies_account_options() {
        let mut conn = migrated_db();
        let acct = credit_account(&conn);
        let file = write_temp(STATEMENT);

        let summary = import_ofx(&mut conn, &acct, file.path()).unwrap();
        assert_eq!(summary.new, 3);
        assert_eq!(summary.updated, 0);

        let rows = OfxTransaction::for_account(&conn, acct.id).unwrap();
        let coffee = rows.iter().find(|r| r.fitid == "A1").unwrap();
        assert_eq!(coffee.amount, Decimal::new(1234, 2));
        assert_eq!(coffee.name.as_deref(), Some("COFFEE POS 123"));
        assert!(!coffee.is_payment);

        let payment = rows.iter().find(|r| r.fitid == "A2").unwrap();
        assert!(payment.is_payment);
        assert!(!payment.is_interest_charge);

        let interest = rows.iter().find(|r| r.fitid == "A3").unwrap();
        assert!(interest.is_interest_charge);

        assert_eq!(acct.balance(&conn).unwrap(), Some(Decimal::from(-512)));
    }

    #[test]
    fn test_same_file_is_rejected() {
        let mut conn = migrated_db();
        let acct = credit_account(&conn);
        let file = write_temp(STATEMENT);

        import_ofx(&mut conn, &acct, file.path()).unwrap();
        let err = import_ofx(&mut conn, &acct, file.path()).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_overlapping_statement_updates() {
        let mut conn = migrated_db();
        let acct = credit_account(&conn);
        import_ofx(&mut conn, &acct, write_temp(STATEMENT).path()).unwrap();

        // same transactions, different balance line => different digest
        let second = STATEMENT.replace("-512.00", "-500.00");
        let summary = import_ofx(&mut conn, &acct, write_temp(&second).path()).unwrap();

        assert_eq!(summary.new, 0);
        assert_eq!(summary.updated, 3);
        assert_eq!(OfxTransaction::for_account(&conn, acct.id).unwrap().len(), 3);
    }

    #[test]
    fn test_file_sha256() {
        assert_eq!(
            file_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_csv_import_resolves_names() {
        let mut conn = migrated_db();
        let acct = account(&conn, "Checking", AcctType::Bank);
        let food = Budget::create(
            &conn,
            &NewBudget {
                name: "Food".to_string(),
                description: None,
                is_periodic: true,
                balance: Decimal::from(300),
                is_income: false,
            },
        )
        .unwrap();

        let file = write_temp(
            "date,amount,description,account,budget,notes\n\
             2017-07-03,12.34,Coffee,Checking,Food,\n\
             2017-07-04,100.10,Rent share,Checking,,split\n",
        );
        let rows = load_transactions_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].amount, Decimal::new(10010, 2));

        let created = import_transactions(&mut conn, &rows).unwrap();
        assert_eq!(created[0].budget_id, Some(food.id));
        assert_eq!(created[0].account_id, acct.id);
        assert_eq!(created[0].notes, None);
        assert_eq!(created[1].budget_id, None);
        assert_eq!(created[1].notes.as_deref(), Some("split"));
        assert_eq!(created[1].date, date(2017, 7, 4));
    }

    #[test]
    fn test_csv_import_is_all_or_nothing() {
        let mut conn = migrated_db();
        account(&conn, "Checking", AcctType::Bank);

        let file = write_temp(
            "date,amount,description,account,budget,notes\n\
             2017-07-03,1.00,ok,Checking,,\n\
             2017-07-04,2.00,bad,Savings,,\n",
        );
        let rows = load_transactions_csv(file.path()).unwrap();

        let err = import_transactions(&mut conn, &rows).unwrap_err();
        assert!(err.is_not_found());
        assert!(Transaction::all(&conn).unwrap().is_empty());
    }
}
