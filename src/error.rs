// ⚠️ Error types for the budget library
// Constraint violations are kept apart from other driver errors so callers
// (CLI, web) can tell "already reconciled" from "database is broken".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BudgetError {
    /// Any SQLite error that is not a constraint violation
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// UNIQUE / FOREIGN KEY / NOT NULL / CHECK violation
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Unknown {kind} class: {name}")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("Invalid strategy arguments: {0}")]
    InvalidStrategyArgs(String),

    #[error("OFX error: {0}")]
    Ofx(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl BudgetError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<rusqlite::Error> for BudgetError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, ref msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::Integrity(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            other => Self::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, BudgetError>;
