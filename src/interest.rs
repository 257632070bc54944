// 💰 Interest, billing period and minimum payment strategies
//
// Accounts name their strategies in the `interest_class_name`,
// `billing_period_class_name` and `min_payment_class_name` columns. Each
// family is a closed enum here; `from_class_name` is the registry lookup.
//
// Sign convention: balances are amounts OWED (positive = debt). Activity
// amounts are charges (positive) and payments/credits (negative).

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BudgetError, Result};

const DAYS_PER_YEAR: i64 = 365;
const MONTHS_PER_YEAR: i64 = 12;

/// Payoff projections give up after this many billing periods (100 years)
pub const MAX_PAYOFF_PERIODS: u32 = 1200;

/// Longest billing period `BillingPeriodNumDays` accepts
pub const MAX_PERIOD_DAYS: i64 = 366;

fn cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn pct(hundredths: i64) -> Decimal {
    Decimal::new(hundredths, 2)
}

fn shift(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    Duration::try_days(days)
        .and_then(|d| date.checked_add_signed(d))
        .ok_or_else(|| {
            BudgetError::InvalidStrategyArgs(format!("{} plus {} days is out of range", date, days))
        })
}

fn check_num_days(num_days: i64) -> Result<()> {
    if !(1..=MAX_PERIOD_DAYS).contains(&num_days) {
        return Err(BudgetError::InvalidStrategyArgs(format!(
            "num_days must be between 1 and {}, got {}",
            MAX_PERIOD_DAYS, num_days
        )));
    }
    Ok(())
}

// ============================================================================
// BILLING PERIODS
// ============================================================================

/// Inclusive date range covered by one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Period of the same length starting the day after this one ends
    pub fn next(&self) -> Result<BillingPeriod> {
        let start = shift(self.end, 1)?;
        Ok(BillingPeriod {
            start,
            end: shift(start, self.num_days() - 1)?,
        })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.num_days()).map(move |i| self.start + Duration::days(i))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct NumDaysArgs {
    end_date: NaiveDate,
    num_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BillingPeriodRule {
    /// Fixed-length periods, one of which ends on `end_date`
    NumDays { end_date: NaiveDate, num_days: i64 },
}

impl BillingPeriodRule {
    pub const CLASS_NAMES: [&'static str; 1] = ["BillingPeriodNumDays"];

    pub fn class_name(&self) -> &'static str {
        match self {
            BillingPeriodRule::NumDays { .. } => "BillingPeriodNumDays",
        }
    }

    /// Resolve a class name plus its JSON-serialized arguments
    pub fn from_class_name(name: &str, args: Option<&str>) -> Result<Self> {
        match name {
            "BillingPeriodNumDays" => {
                let raw = args.filter(|a| !a.trim().is_empty()).ok_or_else(|| {
                    BudgetError::InvalidStrategyArgs(
                        "BillingPeriodNumDays requires end_date and num_days".to_string(),
                    )
                })?;
                let parsed: NumDaysArgs = serde_json::from_str(raw).map_err(|e| {
                    BudgetError::InvalidStrategyArgs(format!("BillingPeriodNumDays: {}", e))
                })?;
                check_num_days(parsed.num_days)?;
                Ok(BillingPeriodRule::NumDays {
                    end_date: parsed.end_date,
                    num_days: parsed.num_days,
                })
            }
            other => Err(BudgetError::UnknownStrategy {
                kind: "billing period",
                name: other.to_string(),
            }),
        }
    }

    /// Arguments in the form stored in `billing_period_class_args`
    pub fn args_json(&self) -> String {
        match self {
            BillingPeriodRule::NumDays { end_date, num_days } => serde_json::json!({
                "end_date": end_date.format("%Y-%m-%d").to_string(),
                "num_days": num_days,
            })
            .to_string(),
        }
    }

    pub fn period_containing(&self, date: NaiveDate) -> Result<BillingPeriod> {
        match *self {
            BillingPeriodRule::NumDays { end_date, num_days } => {
                check_num_days(num_days)?;
                let diff = (date - end_date).num_days();
                let k = (diff + num_days - 1).div_euclid(num_days);
                let end = shift(end_date, k * num_days)?;
                Ok(BillingPeriod {
                    start: shift(end, 1 - num_days)?,
                    end,
                })
            }
        }
    }
}

// ============================================================================
// INTEREST CALCULATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterestResult {
    pub interest: Decimal,
    pub end_balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestCalculation {
    /// Average daily balance, interest compounded daily at APR/365
    AdbCompoundedDaily,
    /// Average daily balance times APR/12, charged once per period
    SimpleMonthlyInterest,
}

impl InterestCalculation {
    pub const ALL: [InterestCalculation; 2] = [
        InterestCalculation::AdbCompoundedDaily,
        InterestCalculation::SimpleMonthlyInterest,
    ];

    pub fn class_name(&self) -> &'static str {
        match self {
            InterestCalculation::AdbCompoundedDaily => "AdbCompoundedDaily",
            InterestCalculation::SimpleMonthlyInterest => "SimpleMonthlyInterest",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            InterestCalculation::AdbCompoundedDaily => {
                "Average Daily Balance method, compounded daily (like American Express)"
            }
            InterestCalculation::SimpleMonthlyInterest => {
                "Average Daily Balance times monthly rate, not compounded"
            }
        }
    }

    pub fn from_class_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.class_name() == name)
            .ok_or_else(|| BudgetError::UnknownStrategy {
                kind: "interest",
                name: name.to_string(),
            })
    }

    /// Interest for one billing period.
    ///
    /// `activity` is applied on its date before that day's balance accrues.
    /// Activity dated outside the period is ignored.
    pub fn calculate(
        &self,
        apr: Decimal,
        start_balance: Decimal,
        period: &BillingPeriod,
        activity: &[(NaiveDate, Decimal)],
    ) -> InterestResult {
        let daily_rate = apr / Decimal::from(DAYS_PER_YEAR);
        let mut balance = start_balance;
        let mut accrued = Decimal::ZERO;
        let mut balance_sum = Decimal::ZERO;

        for day in period.days() {
            balance += activity
                .iter()
                .filter(|(d, _)| *d == day)
                .map(|(_, amt)| *amt)
                .sum::<Decimal>();

            match self {
                InterestCalculation::AdbCompoundedDaily => {
                    if balance > Decimal::ZERO {
                        let daily = balance * daily_rate;
                        balance += daily;
                        accrued += daily;
                    }
                }
                InterestCalculation::SimpleMonthlyInterest => {
                    balance_sum += balance;
                }
            }
        }

        let interest = match self {
            InterestCalculation::AdbCompoundedDaily => cents(accrued),
            InterestCalculation::SimpleMonthlyInterest => {
                let adb = balance_sum / Decimal::from(period.num_days());
                if adb > Decimal::ZERO {
                    cents(adb * apr / Decimal::from(MONTHS_PER_YEAR))
                } else {
                    Decimal::ZERO
                }
            }
        };

        // compounded accrual was already folded into the running balance
        let end_balance = match self {
            InterestCalculation::AdbCompoundedDaily => cents(balance - accrued + interest),
            InterestCalculation::SimpleMonthlyInterest => cents(balance + interest),
        };

        InterestResult {
            interest,
            end_balance,
        }
    }
}

// ============================================================================
// MINIMUM PAYMENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinPaymentFormula {
    /// Greater of $35 or 1% of balance plus interest
    AmEx,
    /// Greater of $35, 2% of balance, or $20 plus interest
    Discover,
    /// Greater of $25, 1.5% of balance, or 1% of balance plus interest
    Citi,
}

impl MinPaymentFormula {
    pub const ALL: [MinPaymentFormula; 3] = [
        MinPaymentFormula::AmEx,
        MinPaymentFormula::Discover,
        MinPaymentFormula::Citi,
    ];

    pub fn class_name(&self) -> &'static str {
        match self {
            MinPaymentFormula::AmEx => "MinPaymentAmEx",
            MinPaymentFormula::Discover => "MinPaymentDiscover",
            MinPaymentFormula::Citi => "MinPaymentCiti",
        }
    }

    pub fn from_class_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.class_name() == name)
            .ok_or_else(|| BudgetError::UnknownStrategy {
                kind: "minimum payment",
                name: name.to_string(),
            })
    }

    /// Minimum due on a statement with `balance` owed (interest included)
    pub fn calculate(&self, balance: Decimal, interest: Decimal) -> Decimal {
        if balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let amount = match self {
            MinPaymentFormula::AmEx => Decimal::from(35).max(balance * pct(1) + interest),
            MinPaymentFormula::Discover => Decimal::from(35)
                .max(balance * pct(2))
                .max(Decimal::from(20) + interest),
            MinPaymentFormula::Citi => Decimal::from(25)
                .max(balance * Decimal::new(15, 3))
                .max(balance * pct(1) + interest),
        };

        cents(amount.min(balance))
    }
}

// ============================================================================
// PAYOFF PROJECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentPlan {
    /// Pay exactly the minimum each period
    Minimum,
    /// Pay a fixed amount each period (never less than the minimum)
    Fixed(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoffOutcome {
    PaidOff {
        periods: u32,
        payoff_date: NaiveDate,
        total_paid: Decimal,
        total_interest: Decimal,
    },
    Never {
        reason: String,
    },
}

/// Everything needed to project a balance forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoffCalculator {
    pub apr: Decimal,
    pub interest: InterestCalculation,
    pub min_payment: MinPaymentFormula,
    pub billing: BillingPeriodRule,
}

impl PayoffCalculator {
    /// Project `balance` forward from the period containing `from`, one
    /// payment per period at the end of the period.
    ///
    /// Every minimum payment formula exceeds the period's interest, so the
    /// only way not to pay off is running into `MAX_PAYOFF_PERIODS`.
    pub fn project(&self, balance: Decimal, from: NaiveDate, plan: PaymentPlan) -> Result<PayoffOutcome> {
        let mut period = self.billing.period_containing(from)?;
        let mut balance = balance;
        let mut periods = 0u32;
        let mut total_paid = Decimal::ZERO;
        let mut total_interest = Decimal::ZERO;

        if balance <= Decimal::ZERO {
            return Ok(PayoffOutcome::PaidOff {
                periods: 0,
                payoff_date: from,
                total_paid,
                total_interest,
            });
        }

        while balance > Decimal::ZERO {
            if periods >= MAX_PAYOFF_PERIODS {
                return Ok(PayoffOutcome::Never {
                    reason: format!("not paid off within {} periods", MAX_PAYOFF_PERIODS),
                });
            }

            let result = self.interest.calculate(self.apr, balance, &period, &[]);
            balance = result.end_balance;
            total_interest += result.interest;

            let minimum = self.min_payment.calculate(balance, result.interest);
            let payment = match plan {
                PaymentPlan::Minimum => minimum,
                PaymentPlan::Fixed(amount) => amount.max(minimum).min(balance),
            };

            balance -= payment;
            total_paid += payment;
            periods += 1;

            if balance > Decimal::ZERO {
                period = period.next()?;
            }
        }

        Ok(PayoffOutcome::PaidOff {
            periods,
            payoff_date: period.end,
            total_paid,
            total_interest,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
