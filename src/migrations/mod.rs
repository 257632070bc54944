// 🧱 Schema migrations
// Ordered revisions chained by `down_revision`, each with an upgrade and a
// downgrade step. The applied revision is stored in `schema_revision`.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BudgetError, Result};

pub mod m0001_initial_schema;
pub mod m0002_account_interest_and_payoff_attributes;

const VERSION_TABLE: &str = "schema_revision";

/// Every revision the application knows about, in any order
pub fn all_migrations() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(m0001_initial_schema::Migration),
        Box::new(m0002_account_interest_and_payoff_attributes::Migration),
    ]
}

// ============================================================================
// MIGRATION TRAIT
// ============================================================================

pub trait Migration: Send + Sync {
    /// Unique revision id
    fn revision(&self) -> &'static str;

    /// Revision this one applies on top of (`None` for the base revision)
    fn down_revision(&self) -> Option<&'static str>;

    /// One-line human description
    fn description(&self) -> &'static str;

    fn upgrade(&self, schema: &SchemaManager<'_>) -> Result<()>;

    fn downgrade(&self, schema: &SchemaManager<'_>) -> Result<()>;
}

// ============================================================================
// SCHEMA MANAGER
// ============================================================================

/// Column definition used by `add_column`
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub nullable: bool,
}

impl Column {
    /// Nullable column of the given SQL type
    pub fn new(name: &'static str, sql_type: &'static str) -> Self {
        Column {
            name,
            sql_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A column as reported by `PRAGMA table_info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// DDL operations available to a migration step.
///
/// Wraps the connection (in practice an open SQL transaction) the step runs in.
pub struct SchemaManager<'c> {
    conn: &'c Connection,
}

impl<'c> SchemaManager<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SchemaManager { conn }
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        table_columns(self.conn, table)
    }

    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self.columns(table)?.iter().any(|c| c.name == column))
    }

    /// `ALTER TABLE .. ADD COLUMN`; a column that already exists is left alone
    pub fn add_column(&self, table: &str, column: &Column) -> Result<()> {
        if self.has_column(table, column.name)? {
            tracing::debug!(table, column = column.name, "column already present, skipping add");
            return Ok(());
        }

        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(column.name),
            column.sql_type
        );
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }

        self.conn.execute_batch(&sql)?;
        tracing::debug!(table, column = column.name, "added column");
        Ok(())
    }

    /// `ALTER TABLE .. DROP COLUMN`; a missing column is left alone
    pub fn drop_column(&self, table: &str, column: &str) -> Result<()> {
        if !self.has_column(table, column)? {
            tracing::debug!(table, column, "column not present, skipping drop");
            return Ok(());
        }

        self.conn.execute_batch(&format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        ))?;
        tracing::debug!(table, column, "dropped column");
        Ok(())
    }
}

/// `PRAGMA table_info` for any connection
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;

    let columns = stmt
        .query_map([], |row| {
            let notnull: i64 = row.get(3)?;
            let pk: i64 = row.get(5)?;
            Ok(ColumnInfo {
                name: row.get(1)?,
                sql_type: row.get(2)?,
                nullable: notnull == 0,
                primary_key: pk > 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(columns)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

// ============================================================================
// TARGETS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Latest revision
    Head,
    /// Nothing applied
    Base,
    /// A revision id, or an unambiguous prefix of one
    Revision(String),
}

impl FromStr for Target {
    type Err = BudgetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(BudgetError::Migration("empty revision target".to_string())),
            "head" | "heads" => Ok(Target::Head),
            "base" => Ok(Target::Base),
            other => Ok(Target::Revision(other.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => write!(f, "head"),
            Target::Base => write!(f, "base"),
            Target::Revision(rev) => write!(f, "{}", rev),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub revision: &'static str,
    pub down_revision: Option<&'static str>,
    pub description: &'static str,
}

// ============================================================================
// MIGRATOR
// ============================================================================

pub struct Migrator {
    /// Ordered base -> head
    steps: Vec<Box<dyn Migration>>,
}

impl Migrator {
    /// Migrator over every revision shipped with the application
    pub fn new() -> Result<Self> {
        Self::from_migrations(all_migrations())
    }

    /// Order migrations by following the `down_revision` chain from the base.
    ///
    /// Fails on zero or several bases, branches (several heads), duplicate
    /// ids, and revisions whose parent is unknown.
    pub fn from_migrations(migrations: Vec<Box<dyn Migration>>) -> Result<Self> {
        let total = migrations.len();
        let mut by_parent: HashMap<Option<&'static str>, Box<dyn Migration>> = HashMap::new();

        for migration in migrations {
            let parent = migration.down_revision();
            if let Some(existing) = by_parent.get(&parent) {
                return Err(BudgetError::Migration(format!(
                    "revisions {} and {} both revise {}; multiple heads are not supported",
                    existing.revision(),
                    migration.revision(),
                    parent.unwrap_or("base")
                )));
            }
            by_parent.insert(parent, migration);
        }

        if total > 0 && !by_parent.contains_key(&None) {
            return Err(BudgetError::Migration("no base revision".to_string()));
        }

        let mut steps: Vec<Box<dyn Migration>> = Vec::with_capacity(total);
        let mut parent: Option<&'static str> = None;
        while let Some(next) = by_parent.remove(&parent) {
            parent = Some(next.revision());
            steps.push(next);
        }

        if let Some(orphan) = by_parent.values().next() {
            return Err(BudgetError::Migration(format!(
                "revision {} revises unknown revision {}",
                orphan.revision(),
                orphan.down_revision().unwrap_or("base")
            )));
        }

        Ok(Migrator { steps })
    }

    pub fn history(&self) -> Vec<RevisionInfo> {
        self.steps
            .iter()
            .map(|m| RevisionInfo {
                revision: m.revision(),
                down_revision: m.down_revision(),
                description: m.description(),
            })
            .collect()
    }

    pub fn head(&self) -> Option<&'static str> {
        self.steps.last().map(|m| m.revision())
    }

    /// Revision currently applied to the database (`None` = base)
    pub fn current(&self, conn: &Connection) -> Result<Option<String>> {
        ensure_version_table(conn)?;
        let current = conn
            .query_row(
                &format!("SELECT version_num FROM {} LIMIT 1", VERSION_TABLE),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(current)
    }

    /// Apply every revision after the current one up to and including `target`.
    ///
    /// Returns the revisions applied, in order. Already at (or past) an
    /// equal target is a no-op; a target older than the current revision is
    /// an error.
    pub fn upgrade(&self, conn: &mut Connection, target: &Target) -> Result<Vec<&'static str>> {
        let current = self.current_index(conn)?;
        let wanted = self.resolve(target)?;

        if wanted < current {
            return Err(BudgetError::Migration(format!(
                "target {} is older than the current revision; use downgrade",
                target
            )));
        }

        let start = current.map_or(0, |i| i + 1);
        let end = match wanted {
            Some(i) => i + 1,
            None => 0,
        };

        let mut applied = Vec::new();
        for step in &self.steps[start.min(end)..end] {
            tracing::info!(revision = step.revision(), "upgrading: {}", step.description());
            let tx = conn.transaction()?;
            step.upgrade(&SchemaManager::new(&tx))?;
            set_version(&tx, Some(step.revision()))?;
            tx.commit()?;
            applied.push(step.revision());
        }

        Ok(applied)
    }

    /// Revert revisions, newest first, until `target` is the current one.
    pub fn downgrade(&self, conn: &mut Connection, target: &Target) -> Result<Vec<&'static str>> {
        let current = self.current_index(conn)?;
        let wanted = self.resolve(target)?;

        if wanted > current {
            return Err(BudgetError::Migration(format!(
                "target {} is newer than the current revision; use upgrade",
                target
            )));
        }

        let Some(current) = current else {
            return Ok(Vec::new());
        };
        let stop = wanted.map_or(0, |i| i + 1);

        let mut reverted = Vec::new();
        for step in self.steps[stop..=current].iter().rev() {
            tracing::info!(revision = step.revision(), "downgrading: {}", step.description());
            let tx = conn.transaction()?;
            step.downgrade(&SchemaManager::new(&tx))?;
            set_version(&tx, step.down_revision())?;
            tx.commit()?;
            reverted.push(step.revision());
        }

        Ok(reverted)
    }

    fn current_index(&self, conn: &Connection) -> Result<Option<usize>> {
        match self.current(conn)? {
            None => Ok(None),
            Some(rev) => self
                .steps
                .iter()
                .position(|m| m.revision() == rev)
                .map(Some)
                .ok_or_else(|| {
                    BudgetError::Migration(format!("database is at unknown revision {}", rev))
                }),
        }
    }

    fn resolve(&self, target: &Target) -> Result<Option<usize>> {
        match target {
            Target::Base => Ok(None),
            Target::Head => Ok(self.steps.len().checked_sub(1)),
            Target::Revision(rev) => {
                if let Some(i) = self.steps.iter().position(|m| m.revision() == rev) {
                    return Ok(Some(i));
                }
                let matches: Vec<usize> = self
                    .steps
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.revision().starts_with(rev.as_str()))
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [i] => Ok(Some(*i)),
                    [] => Err(BudgetError::Migration(format!("unknown revision {}", rev))),
                    _ => Err(BudgetError::Migration(format!("ambiguous revision {}", rev))),
                }
            }
        }
    }
}

/// Bring a database to the latest schema
pub fn upgrade_to_head(conn: &mut Connection) -> Result<Vec<&'static str>> {
    Migrator::new()?.upgrade(conn, &Target::Head)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            version_num VARCHAR(32) NOT NULL,
            CONSTRAINT {}_pkc PRIMARY KEY (version_num)
        )",
        VERSION_TABLE, VERSION_TABLE
    ))?;
    Ok(())
}

fn set_version(conn: &Connection, revision: Option<&str>) -> Result<()> {
    ensure_version_table(conn)?;
    conn.execute(&format!("DELETE FROM {}", VERSION_TABLE), [])?;
    if let Some(rev) = revision {
        conn.execute(
            &format!("INSERT INTO {} (version_num) VALUES (?1)", VERSION_TABLE),
            params![rev],
        )?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn column_names(conn: &Connection, table: &str) -> Vec<String> {
        table_columns(conn, table)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    struct Fake {
        rev: &'static str,
        down: Option<&'static str>,
    }

    impl Migration for Fake {
        fn revision(&self) -> &'static str {
            self.rev
        }
        fn down_revision(&self) -> Option<&'static str> {
            self.down
        }
        fn description(&self) -> &'static str {
            "fake"
        }
        fn upgrade(&self, _: &SchemaManager<'_>) -> Result<()> {
            Ok(())
        }
        fn downgrade(&self, _: &SchemaManager<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn fake(rev: &'static str, down: Option<&'static str>) -> Box<dyn Migration> {
        Box::new(Fake { rev, down })
    }

    #[test]
    fn test_history_follows_down_revision_chain() {
        let migrator = Migrator::new().unwrap();
        let history = migrator.history();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision, "ceb73ddf66eb");
        assert_eq!(history[0].down_revision, None);
        assert_eq!(history[1].revision, "9dc8545963be");
        assert_eq!(history[1].down_revision, Some("ceb73ddf66eb"));
        assert_eq!(migrator.head(), Some("9dc8545963be"));
    }

    #[test]
    fn test_ordering_is_independent_of_input_order() {
        let migrator =
            Migrator::from_migrations(vec![fake("c", Some("b")), fake("a", None), fake("b", Some("a"))])
                .unwrap();
        let revs: Vec<_> = migrator.history().iter().map(|r| r.revision).collect();
        assert_eq!(revs, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rejects_branches_and_orphans() {
        let branched =
            Migrator::from_migrations(vec![fake("a", None), fake("b", Some("a")), fake("c", Some("a"))]);
        assert!(matches!(branched, Err(BudgetError::Migration(_))));

        let orphan = Migrator::from_migrations(vec![fake("a", None), fake("c", Some("zzz"))]);
        assert!(matches!(orphan, Err(BudgetError::Migration(_))));

        let no_base = Migrator::from_migrations(vec![fake("b", Some("a"))]);
        assert!(matches!(no_base, Err(BudgetError::Migration(_))));
    }

    #[test]
    fn test_upgrade_to_head_creates_schema() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();

        assert_eq!(migrator.current(&conn).unwrap(), None);
        let applied = migrator.upgrade(&mut conn, &Target::Head).unwrap();
        assert_eq!(applied, vec!["ceb73ddf66eb", "9dc8545963be"]);
        assert_eq!(migrator.current(&conn).unwrap().as_deref(), Some("9dc8545963be"));

        for table in [
            "budgets",
            "accounts",
            "ofx_statements",
            "ofx_trans",
            "transactions",
            "reconcile_rules",
            "txn_reconciles",
        ] {
            assert!(!column_names(&conn, table).is_empty(), "missing table: {table}");
        }
    }

    #[test]
    fn test_upgrade_twice_is_noop() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();

        migrator.upgrade(&mut conn, &Target::Head).unwrap();
        let second = migrator.upgrade(&mut conn, &Target::Head).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_interest_columns_added_with_types() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();
        migrator
            .upgrade(&mut conn, &Target::Revision("ceb73ddf66eb".into()))
            .unwrap();
        let before = table_columns(&conn, "accounts").unwrap();

        migrator.upgrade(&mut conn, &Target::Head).unwrap();
        let after = table_columns(&conn, "accounts").unwrap();

        let added: Vec<&ColumnInfo> = after.iter().filter(|c| !before.contains(c)).collect();
        let expected = [
            ("apr", "NUMERIC(5,4)"),
            ("billing_period_class_args", "TEXT"),
            ("billing_period_class_name", "VARCHAR(70)"),
            ("interest_class_name", "VARCHAR(70)"),
            ("min_payment_class_name", "VARCHAR(70)"),
        ];

        assert_eq!(added.len(), expected.len());
        for (col, (name, sql_type)) in added.iter().zip(expected.iter()) {
            assert_eq!(col.name, *name);
            assert_eq!(col.sql_type, *sql_type);
            assert!(col.nullable, "{} should be nullable", col.name);
        }
    }

    #[test]
    fn test_downgrade_restores_original_columns() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();
        migrator
            .upgrade(&mut conn, &Target::Revision("ceb73ddf66eb".into()))
            .unwrap();
        let original = table_columns(&conn, "accounts").unwrap();

        migrator.upgrade(&mut conn, &Target::Head).unwrap();
        let reverted = migrator
            .downgrade(&mut conn, &Target::Revision("ceb73ddf66eb".into()))
            .unwrap();

        assert_eq!(reverted, vec!["9dc8545963be"]);
        assert_eq!(table_columns(&conn, "accounts").unwrap(), original);
        assert_eq!(migrator.current(&conn).unwrap().as_deref(), Some("ceb73ddf66eb"));
        for gone in ["apr", "billing_period_class_args", "interest_class_name"] {
            assert!(!column_names(&conn, "accounts").contains(&gone.to_string()));
        }
    }

    #[test]
    fn test_downgrade_to_base_drops_everything() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();
        migrator.upgrade(&mut conn, &Target::Head).unwrap();

        let reverted = migrator.downgrade(&mut conn, &Target::Base).unwrap();
        assert_eq!(reverted, vec!["9dc8545963be", "ceb73ddf66eb"]);
        assert_eq!(migrator.current(&conn).unwrap(), None);
        assert!(column_names(&conn, "txn_reconciles").is_empty());
        assert!(column_names(&conn, "accounts").is_empty());
    }

    #[test]
    fn test_direction_mismatch_is_an_error() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();
        migrator.upgrade(&mut conn, &Target::Head).unwrap();

        let err = migrator.upgrade(&mut conn, &Target::Base).unwrap_err();
        assert!(matches!(err, BudgetError::Migration(_)));

        migrator.downgrade(&mut conn, &Target::Base).unwrap();
        let err = migrator.downgrade(&mut conn, &Target::Head).unwrap_err();
        assert!(matches!(err, BudgetError::Migration(_)));
    }

    #[test]
    fn test_revision_prefix_resolution() {
        let mut conn = db::open_in_memory().unwrap();
        let migrator = Migrator::new().unwrap();

        migrator
            .upgrade(&mut conn, &"ceb7".parse().unwrap())
            .unwrap();
        assert_eq!(migrator.current(&conn).unwrap().as_deref(), Some("ceb73ddf66eb"));

        let err = migrator
            .upgrade(&mut conn, &Target::Revision("nope".into()))
            .unwrap_err();
        assert!(err.to_string().contains("unknown revision"));
    }

    #[test]
    fn test_add_column_skips_existing() {
        let conn = db::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, x TEXT)").unwrap();
        let schema = SchemaManager::new(&conn);

        schema.add_column("t", &Column::new("x", "TEXT")).unwrap();
        schema.add_column("t", &Column::new("y", "VARCHAR(70)")).unwrap();
        schema.drop_column("t", "missing").unwrap();

        assert_eq!(column_names(&conn, "t"), vec!["id", "x", "y"]);
    }
}
