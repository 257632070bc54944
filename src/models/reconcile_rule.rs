// Reconcile rule - names the automatic matcher that produced a reconcile

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{check_length, require_non_empty};
use crate::error::{BudgetError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRule {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

impl ReconcileRule {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ReconcileRule {
            id: row.get(0)?,
            name: row.get(1)?,
            is_active: row.get(2)?,
        })
    }

    pub fn create(conn: &Connection, name: &str) -> Result<ReconcileRule> {
        require_non_empty("name", name)?;
        check_length("name", name, 254)?;
        conn.execute(
            "INSERT INTO reconcile_rules (name, is_active) VALUES (?1, 1)",
            params![name],
        )?;
        ReconcileRule::get(conn, conn.last_insert_rowid())
    }

    pub fn get(conn: &Connection, id: i64) -> Result<ReconcileRule> {
        conn.query_row(
            "SELECT id, name, is_active FROM reconcile_rules WHERE id = ?1",
            [id],
            ReconcileRule::from_row,
        )
        .optional()?
        .ok_or_else(|| BudgetError::not_found("ReconcileRule", id))
    }

    pub fn find_or_create(conn: &Connection, name: &str) -> Result<ReconcileRule> {
        let existing = conn
            .query_row(
                "SELECT id, name, is_active FROM reconcile_rules WHERE name = ?1 ORDER BY id LIMIT 1",
                [name],
                ReconcileRule::from_row,
            )
            .optional()?;
        match existing {
            Some(rule) => Ok(rule),
            None => ReconcileRule::create(conn, name),
        }
    }
}
