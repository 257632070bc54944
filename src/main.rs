// biweeklybudget - command line
//
// Schema migrations, account/budget setup, OFX and CSV import,
// reconciliation and credit card payoff projections.

use anyhow::{bail, Context, Result};
use biweeklybudget::config::Settings;
use biweeklybudget::interest::PayoffOutcome;
use biweeklybudget::migrations::{self, Migrator, Target};
use biweeklybudget::models::{Account, AcctType, Budget, InterestSettings, NewAccount, NewBudget};
use biweeklybudget::reconcile::{self, Matcher};
use biweeklybudget::{db, importer, logging};
use chrono::Local;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "budget")]
#[command(about = "Biweekly personal finance budgeting", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database (overrides BIWEEKLYBUDGET_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade, downgrade or inspect the database schema
    Migrate {
        #[command(subcommand)]
        command: MigrateCommands,
    },
    /// Manage accounts
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Manage budgets
    Budgets {
        #[command(subcommand)]
        command: BudgetsCommands,
    },
    /// Import an OFX/QFX statement into an account
    ImportOfx {
        /// Statement file
        file: PathBuf,
        /// Account name
        #[arg(long)]
        account: String,
    },
    /// Import ledger transactions from CSV (date,amount,description,account,budget,notes)
    ImportTransactions {
        /// CSV file
        csv: PathBuf,
    },
    /// Reconcile transactions against OFX records
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Project credit card payoff from the latest statement
    Payoff {
        /// Account name
        account: String,
        /// Fixed payment per billing period
        #[arg(long)]
        payment: Option<Decimal>,
    },
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply migrations up to a revision
    Upgrade {
        /// Revision id, prefix, or "head"
        #[arg(default_value = "head")]
        target: String,
    },
    /// Revert migrations down to a revision
    Downgrade {
        /// Revision id, prefix, or "base"
        target: String,
    },
    /// Show the applied revision
    Current,
    /// List all revisions, oldest first
    History,
}

#[derive(Subcommand)]
enum AccountsCommands {
    /// List all accounts
    List,
    /// Add an account
    Add {
        name: String,
        /// bank, credit, investment or cash
        #[arg(long = "type", value_parser = parse_acct_type)]
        acct_type: AcctType,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        credit_limit: Option<Decimal>,
        /// Flip the sign of OFX amounts on import
        #[arg(long)]
        negate_ofx_amounts: bool,
        /// Append the OFX memo to the name on import
        #[arg(long)]
        ofx_cat_memo_to_name: bool,
        /// Leave this account out of reconciliation
        #[arg(long)]
        no_reconcile: bool,
        /// Regex on OFX name marking payments
        #[arg(long)]
        re_payment: Option<String>,
        /// Regex on OFX name marking interest charges
        #[arg(long)]
        re_interest_charge: Option<String>,
    },
    /// Set the interest and payoff attributes of an account
    SetInterest {
        /// Account name
        account: String,
        /// Annual percentage rate as a fraction (0.1999 for 19.99%)
        #[arg(long)]
        apr: Option<Decimal>,
        #[arg(long)]
        interest_class: Option<String>,
        #[arg(long)]
        min_payment_class: Option<String>,
        #[arg(long)]
        billing_period_class: Option<String>,
        /// JSON arguments for the billing period class
        #[arg(long)]
        billing_period_args: Option<String>,
    },
}

#[derive(Subcommand)]
enum BudgetsCommands {
    /// List all budgets
    List,
    /// Add a budget
    Add {
        name: String,
        /// Starting balance (periodic) or current balance (standing)
        #[arg(long)]
        balance: Decimal,
        #[arg(long)]
        description: Option<String>,
        /// Carry the balance forward instead of resetting each period
        #[arg(long)]
        standing: bool,
        #[arg(long)]
        income: bool,
    },
}

#[derive(Subcommand)]
enum ReconcileCommands {
    /// Show unreconciled transactions and OFX records
    List,
    /// Suggest amount matches without applying them
    Match {
        /// Maximum days between ledger and posting date
        #[arg(long, default_value_t = 3)]
        days: i64,
    },
    /// Apply unambiguous amount matches
    Auto {
        #[arg(long, default_value_t = 3)]
        days: i64,
    },
}

fn parse_acct_type(s: &str) -> std::result::Result<AcctType, String> {
    s.parse().map_err(|e: biweeklybudget::BudgetError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    logging::init(&settings.log_filter);

    let mut conn = db::open(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;

    if !matches!(cli.command, Commands::Migrate { .. }) {
        let applied = migrations::upgrade_to_head(&mut conn)?;
        if !applied.is_empty() {
            tracing::info!(?applied, "database upgraded to head");
        }
    }

    run(&mut conn, cli.command)
}

fn run(conn: &mut Connection, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate { command } => run_migrate(conn, command),
        Commands::Accounts { command } => run_accounts(conn, command),
        Commands::Budgets { command } => run_budgets(conn, command),
        Commands::ImportOfx { file, account } => {
            let account = require_account(conn, &account)?;
            println!("📂 Importing {} into {}...", file.display(), account.name);
            let summary = importer::import_ofx(conn, &account, &file)?;
            println!(
                "✓ Statement {}: {} new, {} updated",
                summary.statement_id, summary.new, summary.updated
            );
            Ok(())
        }
        Commands::ImportTransactions { csv } => {
            println!("📂 Loading {}...", csv.display());
            let rows = importer::load_transactions_csv(&csv)?;
            let created = importer::import_transactions(conn, &rows)?;
            println!("✓ Imported {} transactions", created.len());
            Ok(())
        }
        Commands::Reconcile { command } => run_reconcile(conn, command),
        Commands::Payoff { account, payment } => {
            let account = require_account(conn, &account)?;
            let report = account.payoff(conn, Local::now().date_naive(), payment)?;

            println!("💳 {} owes {} as of {}", account.name, report.balance, report.as_of);
            println!("   Minimum payment: {}", describe_outcome(&report.minimum));
            if let (Some(amount), Some(fixed)) = (report.fixed_payment, &report.fixed) {
                println!("   Paying {}: {}", amount, describe_outcome(fixed));
            }
            Ok(())
        }
    }
}

fn run_migrate(conn: &mut Connection, command: MigrateCommands) -> Result<()> {
    let migrator = Migrator::new()?;

    match command {
        MigrateCommands::Upgrade { target } => {
            let target: Target = target.parse()?;
            let applied = migrator.upgrade(conn, &target)?;
            if applied.is_empty() {
                println!("✓ Already at {}", target);
            }
            for revision in applied {
                println!("⬆️  Upgraded to {}", revision);
            }
        }
        MigrateCommands::Downgrade { target } => {
            let target: Target = target.parse()?;
            let reverted = migrator.downgrade(conn, &target)?;
            if reverted.is_empty() {
                println!("✓ Already at {}", target);
            }
            for revision in reverted {
                println!("⬇️  Reverted {}", revision);
            }
        }
        MigrateCommands::Current => match migrator.current(conn)? {
            Some(revision) if migrator.head() == Some(revision.as_str()) => {
                println!("{} (head)", revision)
            }
            Some(revision) => println!("{}", revision),
            None => println!("(base)"),
        },
        MigrateCommands::History => {
            for info in migrator.history() {
                println!(
                    "{} -> {}, {}",
                    info.down_revision.unwrap_or("<base>"),
                    info.revision,
                    info.description
                );
            }
        }
    }
    Ok(())
}

fn run_accounts(conn: &mut Connection, command: AccountsCommands) -> Result<()> {
    match command {
        AccountsCommands::List => {
            let accounts = Account::all(conn)?;
            if accounts.is_empty() {
                println!("No accounts.");
            }
            for account in accounts {
                let balance = account
                    .balance(conn)?
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let apr = account
                    .apr
                    .map(|a| format!("  apr {}", a))
                    .unwrap_or_default();
                println!(
                    "{:>4}  {:<24} {:<10} {:>12}{}",
                    account.id, account.name, account.acct_type, balance, apr
                );
            }
        }
        AccountsCommands::Add {
            name,
            acct_type,
            description,
            credit_limit,
            negate_ofx_amounts,
            ofx_cat_memo_to_name,
            no_reconcile,
            re_payment,
            re_interest_charge,
        } => {
            let new = NewAccount {
                description,
                credit_limit,
                negate_ofx_amounts,
                ofx_cat_memo_to_name,
                reconcile_trans: !no_reconcile,
                re_payment,
                re_interest_charge,
                ..NewAccount::new(name, acct_type)
            };
            let account = Account::create(conn, &new)?;
            println!("✓ Created account {} ({})", account.name, account.id);
        }
        AccountsCommands::SetInterest {
            account,
            apr,
            interest_class,
            min_payment_class,
            billing_period_class,
            billing_period_args,
        } => {
            let account = require_account(conn, &account)?;
            let settings = InterestSettings {
                apr,
                interest_class_name: interest_class,
                min_payment_class_name: min_payment_class,
                billing_period_class_name: billing_period_class,
                billing_period_class_args: billing_period_args,
            };
            let updated = Account::set_interest_settings(conn, account.id, &settings)?;
            println!("✓ Updated interest settings for {}", updated.name);
        }
    }
    Ok(())
}

fn run_budgets(conn: &mut Connection, command: BudgetsCommands) -> Result<()> {
    match command {
        BudgetsCommands::List => {
            for budget in Budget::all(conn)? {
                let (kind, balance) = if budget.is_periodic {
                    ("periodic", budget.starting_balance)
                } else {
                    ("standing", budget.current_balance)
                };
                println!(
                    "{:>4}  {:<24} {:<9} {:>12}{}",
                    budget.id,
                    budget.name,
                    kind,
                    balance.unwrap_or_default(),
                    if budget.is_income { "  income" } else { "" }
                );
            }
        }
        BudgetsCommands::Add {
            name,
            balance,
            description,
            standing,
            income,
        } => {
            let budget = Budget::create(
                conn,
                &NewBudget {
                    name,
                    description,
                    is_periodic: !standing,
                    balance,
                    is_income: income,
                },
            )?;
            println!("✓ Created budget {} ({})", budget.name, budget.id);
        }
    }
    Ok(())
}

fn run_reconcile(conn: &mut Connection, command: ReconcileCommands) -> Result<()> {
    match command {
        ReconcileCommands::List => {
            let pending = reconcile::unreconciled(conn)?;

            println!("📒 Unreconciled transactions: {}", pending.transactions.len());
            for txn in &pending.transactions {
                println!(
                    "   #{:<5} {} {:>12}  {} (account {})",
                    txn.id, txn.date, txn.actual_amount, txn.description, txn.account_id
                );
            }

            println!("🏦 Unreconciled OFX records: {}", pending.ofx.len());
            for ofx in &pending.ofx {
                println!(
                    "   {:<20} {} {:>12}  {}",
                    ofx.key(),
                    ofx.date_posted.date_naive(),
                    ofx.amount,
                    ofx.name.as_deref().unwrap_or("")
                );
            }
        }
        ReconcileCommands::Match { days } => {
            let suggestions = reconcile::suggest_matches(conn, &Matcher::with_tolerance(days))?;
            if suggestions.is_empty() {
                println!("No matches found.");
            }
            for s in suggestions {
                println!(
                    "   txn #{:<5} <-> {:<20} {:.0}%  {}",
                    s.txn_id,
                    s.ofx,
                    s.confidence * 100.0,
                    s.reason
                );
            }
        }
        ReconcileCommands::Auto { days } => {
            let applied = reconcile::auto_reconcile(conn, &Matcher::with_tolerance(days))?;
            println!("✓ Reconciled {} transactions", applied.len());
            for rec in applied {
                println!("   {}", rec);
            }
        }
    }
    Ok(())
}

fn require_account(conn: &Connection, name: &str) -> Result<Account> {
    match Account::find_by_name(conn, name)? {
        Some(account) => Ok(account),
        None => bail!("no account named {:?}", name),
    }
}

fn describe_outcome(outcome: &PayoffOutcome) -> String {
    match outcome {
        PayoffOutcome::PaidOff {
            periods,
            payoff_date,
            total_paid,
            total_interest,
        } => format!(
            "paid off {} after {} periods, {} paid ({} interest)",
            payoff_date, periods, total_paid, total_interest
        ),
        PayoffOutcome::Never { reason } => format!("never paid off: {}", reason),
    }
}
