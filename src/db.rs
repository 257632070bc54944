// 🗄️ Database connection + column helpers
// SQLite with WAL and enforced foreign keys. Schema lives in `migrations`.

use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;

use crate::error::Result;

/// Every NUMERIC column in the schema has 4 decimal places
pub const DECIMAL_SCALE: u32 = 4;

/// Open (or create) a database file
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure(&conn)?;

    tracing::debug!(path = %path.display(), "opened database");
    Ok(conn)
}

/// Fresh in-memory database (tests, throwaway tooling)
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // SQLite ships with FK enforcement off; composite FKs and cascades need it
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

// ============================================================================
// NUMERIC <-> Decimal
// ============================================================================

/// Read a NUMERIC column as a Decimal.
///
/// NUMERIC affinity means SQLite may hand back INTEGER, REAL or TEXT for the
/// same column depending on the stored value.
pub fn get_decimal(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let value = row.get_ref(idx)?;
    let parsed = match value {
        ValueRef::Null => return Ok(None),
        ValueRef::Integer(i) => Some(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::from_f64_retain(f).map(|d| d.round_dp(DECIMAL_SCALE)),
        ValueRef::Text(t) => std::str::from_utf8(t)
            .ok()
            .and_then(|s| Decimal::from_str(s.trim()).ok()),
        ValueRef::Blob(_) => None,
    };

    parsed.map(Some).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            value.data_type(),
            "value is not a decimal number".into(),
        )
    })
}

/// Same as `get_decimal`, for NOT NULL columns
pub fn get_decimal_required(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    get_decimal(row, idx)?
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, "NULL".to_string(), Type::Null))
}

/// Bind form for NUMERIC columns
pub fn decimal_param(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}
