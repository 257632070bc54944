// 💳 Account - bank, credit, investment or cash account
//
// Besides the OFX import options, credit accounts carry their APR and the
// names of the strategies used to project interest, minimum payments and
// billing periods (see `crate::interest`).

use chrono::NaiveDate;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{check_length, check_optional_length, require_non_empty, OfxStatement};
use crate::db::{decimal_param, get_decimal};
use crate::error::{BudgetError, Result};
use crate::interest::{
    BillingPeriodRule, InterestCalculation, MinPaymentFormula, PaymentPlan, PayoffCalculator, PayoffOutcome,
};

const NAME_MAX: usize = 50;
const DESCRIPTION_MAX: usize = 254;
const CLASS_NAME_MAX: usize = 70;

const COLUMNS: &str = "id, name, description, acct_type, ofx_cat_memo_to_name, \
    negate_ofx_amounts, reconcile_trans, credit_limit, is_active, re_interest_charge, \
    re_payment, apr, billing_period_class_args, billing_period_class_name, \
    interest_class_name, min_payment_class_name";

// ============================================================================
// ACCOUNT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcctType {
    Bank,
    Credit,
    Investment,
    Cash,
}

impl AcctType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcctType::Bank => "Bank",
            AcctType::Credit => "Credit",
            AcctType::Investment => "Investment",
            AcctType::Cash => "Cash",
        }
    }
}

impl fmt::Display for AcctType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcctType {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bank" => Ok(AcctType::Bank),
            "credit" => Ok(AcctType::Credit),
            "investment" => Ok(AcctType::Investment),
            "cash" => Ok(AcctType::Cash),
            other => Err(BudgetError::Validation(format!("unknown account type: {}", other))),
        }
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub acct_type: AcctType,

    /// Append the OFX memo to the OFX name on import
    pub ofx_cat_memo_to_name: bool,

    /// Flip the sign of OFX amounts on import
    pub negate_ofx_amounts: bool,

    /// Whether transactions in this account take part in reconciliation
    pub reconcile_trans: bool,

    pub credit_limit: Option<Decimal>,
    pub is_active: bool,

    /// Regex on OFX name marking interest charges
    pub re_interest_charge: Option<String>,

    /// Regex on OFX name marking payments
    pub re_payment: Option<String>,

    // interest and payoff attributes
    pub apr: Option<Decimal>,
    pub billing_period_class_args: Option<String>,
    pub billing_period_class_name: Option<String>,
    pub interest_class_name: Option<String>,
    pub min_payment_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub name: String,
    pub description: Option<String>,
    pub acct_type: AcctType,
    pub ofx_cat_memo_to_name: bool,
    pub negate_ofx_amounts: bool,
    pub reconcile_trans: bool,
    pub credit_limit: Option<Decimal>,
    pub re_interest_charge: Option<String>,
    pub re_payment: Option<String>,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, acct_type: AcctType) -> Self {
        NewAccount {
            name: name.into(),
            description: None,
            acct_type,
            ofx_cat_memo_to_name: false,
            negate_ofx_amounts: false,
            reconcile_trans: true,
            credit_limit: None,
            re_interest_charge: None,
            re_payment: None,
        }
    }
}

/// Payoff projection for one credit account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoffReport {
    pub account_id: i64,
    /// Amount owed at the latest statement
    pub balance: Decimal,
    pub as_of: NaiveDate,
    pub minimum: PayoffOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_payment: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed: Option<PayoffOutcome>,
}

/// The five interest/payoff attributes, written together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestSettings {
    pub apr: Option<Decimal>,
    pub interest_class_name: Option<String>,
    pub min_payment_class_name: Option<String>,
    pub billing_period_class_name: Option<String>,
    pub billing_period_class_args: Option<String>,
}

impl InterestSettings {
    /// Check lengths, the NUMERIC(5,4) range of `apr`, and that every class
    /// name resolves in the strategy registry.
    pub fn validate(&self) -> Result<()> {
        if let Some(apr) = self.apr {
            if apr < Decimal::ZERO || apr >= Decimal::from(10) || apr.scale() > 4 {
                return Err(BudgetError::Validation(format!(
                    "apr {} does not fit NUMERIC(5,4) as a non-negative rate",
                    apr
                )));
            }
        }

        check_optional_length("interest_class_name", self.interest_class_name.as_deref(), CLASS_NAME_MAX)?;
        check_optional_length("min_payment_class_name", self.min_payment_class_name.as_deref(), CLASS_NAME_MAX)?;
        check_optional_length(
            "billing_period_class_name",
            self.billing_period_class_name.as_deref(),
            CLASS_NAME_MAX,
        )?;

        if let Some(name) = &self.interest_class_name {
            InterestCalculation::from_class_name(name)?;
        }
        if let Some(name) = &self.min_payment_class_name {
            MinPaymentFormula::from_class_name(name)?;
        }
        match (&self.billing_period_class_name, &self.billing_period_class_args) {
            (Some(name), args) => {
                BillingPeriodRule::from_class_name(name, args.as_deref())?;
            }
            (None, Some(_)) => {
                return Err(BudgetError::Validation(
                    "billing_period_class_args given without billing_period_class_name".to_string(),
                ))
            }
            (None, None) => {}
        }

        Ok(())
    }
}

impl Account {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let acct_type: String = row.get(3)?;
        Ok(Account {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            acct_type: acct_type.parse().map_err(|e: BudgetError| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
            })?,
            ofx_cat_memo_to_name: row.get(4)?,
            negate_ofx_amounts: row.get(5)?,
            reconcile_trans: row.get(6)?,
            credit_limit: get_decimal(row, 7)?,
            is_active: row.get(8)?,
            re_interest_charge: row.get(9)?,
            re_payment: row.get(10)?,
            apr: get_decimal(row, 11)?,
            billing_period_class_args: row.get(12)?,
            billing_period_class_name: row.get(13)?,
            interest_class_name: row.get(14)?,
            min_payment_class_name: row.get(15)?,
        })
    }

    pub fn create(conn: &Connection, new: &NewAccount) -> Result<Account> {
        require_non_empty("name", &new.name)?;
        check_length("name", &new.name, NAME_MAX)?;
        check_optional_length("description", new.description.as_deref(), DESCRIPTION_MAX)?;
        for pattern in [&new.re_interest_charge, &new.re_payment].into_iter().flatten() {
            Regex::new(pattern)
                .map_err(|e| BudgetError::Validation(format!("invalid regex {:?}: {}", pattern, e)))?;
        }

        conn.execute(
            "INSERT INTO accounts (
                name, description, acct_type, ofx_cat_memo_to_name, negate_ofx_amounts,
                reconcile_trans, credit_limit, is_active, re_interest_charge, re_payment
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)",
            params![
                new.name,
                new.description,
                new.acct_type.as_str(),
                new.ofx_cat_memo_to_name,
                new.negate_ofx_amounts,
                new.reconcile_trans,
                decimal_param(new.credit_limit),
                new.re_interest_charge,
                new.re_payment,
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(account_id = id, name = %new.name, "created account");
        Account::get(conn, id)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Account> {
        conn.query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?1", COLUMNS),
            [id],
            Account::from_row,
        )
        .optional()?
        .ok_or_else(|| BudgetError::not_found("Account", id))
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Account>> {
        let account = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE name = ?1", COLUMNS),
                [name],
                Account::from_row,
            )
            .optional()?;
        Ok(account)
    }

    pub fn all(conn: &Connection) -> Result<Vec<Account>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM accounts ORDER BY name", COLUMNS))?;
        let accounts = stmt
            .query_map([], Account::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Replace the interest/payoff attributes of an account
    pub fn set_interest_settings(conn: &Connection, id: i64, settings: &InterestSettings) -> Result<Account> {
        settings.validate()?;

        let updated = conn.execute(
            "UPDATE accounts SET
                apr = ?1,
                interest_class_name = ?2,
                min_payment_class_name = ?3,
                billing_period_class_name = ?4,
                billing_period_class_args = ?5
             WHERE id = ?6",
            params![
                decimal_param(settings.apr),
                settings.interest_class_name,
                settings.min_payment_class_name,
                settings.billing_period_class_name,
                settings.billing_period_class_args,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(BudgetError::not_found("Account", id));
        }

        tracing::info!(account_id = id, "updated interest settings");
        Account::get(conn, id)
    }

    pub fn is_credit(&self) -> bool {
        self.acct_type == AcctType::Credit
    }

    pub fn interest_calculation(&self) -> Result<Option<InterestCalculation>> {
        self.interest_class_name
            .as_deref()
            .map(InterestCalculation::from_class_name)
            .transpose()
    }

    pub fn min_payment_formula(&self) -> Result<Option<MinPaymentFormula>> {
        self.min_payment_class_name
            .as_deref()
            .map(MinPaymentFormula::from_class_name)
            .transpose()
    }

    pub fn billing_period(&self) -> Result<Option<BillingPeriodRule>> {
        self.billing_period_class_name
            .as_deref()
            .map(|name| BillingPeriodRule::from_class_name(name, self.billing_period_class_args.as_deref()))
            .transpose()
    }

    /// Calculator for payoff projections; `None` unless all four attributes
    /// (APR and the three strategies) are set.
    pub fn payoff_calculator(&self) -> Result<Option<PayoffCalculator>> {
        let (Some(apr), Some(interest), Some(min_payment), Some(billing)) = (
            self.apr,
            self.interest_calculation()?,
            self.min_payment_formula()?,
            self.billing_period()?,
        ) else {
            return Ok(None);
        };

        Ok(Some(PayoffCalculator {
            apr,
            interest,
            min_payment,
            billing,
        }))
    }

    /// Project payoff of the latest statement balance, paying the minimum
    /// and, when given, a fixed amount per period.
    pub fn payoff(&self, conn: &Connection, as_of: NaiveDate, payment: Option<Decimal>) -> Result<PayoffReport> {
        if !self.is_credit() {
            return Err(BudgetError::Validation(format!("{} is not a credit account", self.name)));
        }
        let calculator = self.payoff_calculator()?.ok_or_else(|| {
            BudgetError::Validation(format!("{} has incomplete interest settings", self.name))
        })?;
        let ledger = self
            .balance(conn)?
            .ok_or_else(|| BudgetError::Validation(format!("{} has no OFX statement balance", self.name)))?;

        // credit statements report debt as a negative ledger balance
        let owed = (-ledger).max(Decimal::ZERO);

        Ok(PayoffReport {
            account_id: self.id,
            balance: owed,
            as_of,
            minimum: calculator.project(owed, as_of, PaymentPlan::Minimum)?,
            fixed_payment: payment,
            fixed: payment
                .map(|p| calculator.project(owed, as_of, PaymentPlan::Fixed(p)))
                .transpose()?,
        })
    }

    pub fn latest_statement(&self, conn: &Connection) -> Result<Option<OfxStatement>> {
        OfxStatement::latest_for_account(conn, self.id)
    }

    /// Ledger balance from the most recent OFX statement
    pub fn balance(&self, conn: &Connection) -> Result<Option<Decimal>> {
        Ok(self.latest_statement(conn)?.and_then(|s| s.ledger_bal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::*;

    fn credit_settings() -> InterestSettings {
        InterestSettings {
            apr: Some(Decimal::new(1999, 4)),
            interest_class_name: Some("AdbCompoundedDaily".to_string()),
            min_payment_class_name: Some("MinPaymentAmEx".to_string()),
            billing_period_class_name: Some("BillingPeriodNumDays".to_string()),
            billing_period_class_args: Some(r#"{"end_date": "2017-08-15", "num_days": 30}"#.to_string()),
        }
    }

    #[test]
    fn test_create_and_lookup() {
        let conn = migrated_db();
        let created = account(&conn, "Checking", AcctType::Bank);

        assert_eq!(created.name, "Checking");
        assert!(created.is_active);
        assert!(created.reconcile_trans);
        assert_eq!(created.apr, None);

        assert_eq!(Account::get(&conn, created.id).unwrap(), created);
        assert_eq!(Account::find_by_name(&conn, "Checking").unwrap(), Some(created));
        assert!(Account::find_by_name(&conn, "Nope").unwrap().is_none());
        assert!(Account::get(&conn, 999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_name_is_integrity_error() {
        let conn = migrated_db();
        account(&conn, "Visa", AcctType::Credit);
        let err = Account::create(&conn, &NewAccount::new("Visa", AcctType::Credit)).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_create_rejects_bad_regex_and_long_name() {
        let conn = migrated_db();

        let mut bad = NewAccount::new("Visa", AcctType::Credit);
        bad.re_payment = Some("(unclosed".to_string());
        assert!(matches!(Account::create(&conn, &bad), Err(BudgetError::Validation(_))));

        let long = NewAccount::new("x".repeat(51), AcctType::Bank);
        assert!(matches!(Account::create(&conn, &long), Err(BudgetError::Validation(_))));
    }

    #[test]
    fn test_interest_settings_roundtrip() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);

        let updated = Account::set_interest_settings(&conn, visa.id, &credit_settings()).unwrap();

        assert_eq!(updated.apr, Some(Decimal::new(1999, 4)));
        assert_eq!(updated.interest_calculation().unwrap(), Some(InterestCalculation::AdbCompoundedDaily));
        assert_eq!(updated.min_payment_formula().unwrap(), Some(MinPaymentFormula::AmEx));
        assert!(matches!(
            updated.billing_period().unwrap(),
            Some(BillingPeriodRule::NumDays { num_days: 30, .. })
        ));
        assert!(updated.payoff_calculator().unwrap().is_some());
    }

    #[test]
    fn test_interest_settings_validation() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);

        let mut unknown = credit_settings();
        unknown.interest_class_name = Some("Bogus".to_string());
        assert!(matches!(
            Account::set_interest_settings(&conn, visa.id, &unknown),
            Err(BudgetError::UnknownStrategy { .. })
        ));

        let mut too_big = credit_settings();
        too_big.apr = Some(Decimal::from(10));
        assert!(matches!(
            Account::set_interest_settings(&conn, visa.id, &too_big),
            Err(BudgetError::Validation(_))
        ));

        let mut endless_period = credit_settings();
        endless_period.billing_period_class_args =
            Some(r#"{"end_date": "2017-08-15", "num_days": 1000000000}"#.to_string());
        assert!(matches!(
            Account::set_interest_settings(&conn, visa.id, &endless_period),
            Err(BudgetError::InvalidStrategyArgs(_))
        ));

        let orphan_args = InterestSettings {
            billing_period_class_args: Some("{}".to_string()),
            ..Default::default()
        };
        assert!(orphan_args.validate().is_err());

        assert!(Account::set_interest_settings(&conn, 999, &credit_settings())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_clearing_settings_disables_payoff() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);
        Account::set_interest_settings(&conn, visa.id, &credit_settings()).unwrap();

        let cleared = Account::set_interest_settings(&conn, visa.id, &InterestSettings::default()).unwrap();
        assert_eq!(cleared.apr, None);
        assert_eq!(cleared.interest_class_name, None);
        assert!(cleared.payoff_calculator().unwrap().is_none());
    }

    #[test]
    fn test_payoff_report() {
        let conn = migrated_db();
        let visa = account(&conn, "Visa", AcctType::Credit);
        let visa = Account::set_interest_settings(&conn, visa.id, &credit_settings()).unwrap();
        let as_of = date(2017, 8, 20);

        // no statement yet
        assert!(matches!(visa.payoff(&conn, as_of, None), Err(BudgetError::Validation(_))));

        conn.execute(
            "INSERT INTO ofx_statements (account_id, filename, file_sha256, imported_at, ledger_bal)
             VALUES (?1, 'v.ofx', ?2, '2017-08-15 00:00:00+00:00', '-1000.00')",
            params![visa.id, "d".repeat(64)],
        )
        .unwrap();

        let report = visa.payoff(&conn, as_of, Some(Decimal::from(200))).unwrap();
        assert_eq!(report.balance, Decimal::from(1000));
        assert!(matches!(report.minimum, PayoffOutcome::PaidOff { .. }));
        match (report.minimum, report.fixed) {
            (
                PayoffOutcome::PaidOff { periods: min_periods, .. },
                Some(PayoffOutcome::PaidOff { periods: fixed_periods, .. }),
            ) => assert!(fixed_periods < min_periods),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let checking = account(&conn, "Checking", AcctType::Bank);
        assert!(checking.payoff(&conn, as_of, None).is_err());
    }

    #[test]
    fn test_acct_type_parse() {
        assert_eq!("credit".parse::<AcctType>().unwrap(), AcctType::Credit);
        assert_eq!("Bank".parse::<AcctType>().unwrap(), AcctType::Bank);
        assert!("savings".parse::<AcctType>().is_err());
    }
}
