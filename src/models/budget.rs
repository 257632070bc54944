// 📊 Budget - periodic (per pay period) or standing

use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{check_length, check_optional_length, require_non_empty};
use crate::db::{decimal_param, get_decimal};
use crate::error::{BudgetError, Result};

const COLUMNS: &str =
    "id, name, description, is_periodic, starting_balance, current_balance, is_active, is_income";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,

    /// Periodic budgets reset to `starting_balance` every pay period;
    /// standing budgets carry `current_balance` forward.
    pub is_periodic: bool,
    pub starting_balance: Option<Decimal>,
    pub current_balance: Option<Decimal>,
    pub is_active: bool,
    pub is_income: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBudget {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_periodic")]
    pub is_periodic: bool,
    /// Starting balance for periodic budgets, current balance for standing ones
    pub balance: Decimal,
    #[serde(default)]
    pub is_income: bool,
}

fn default_periodic() -> bool {
    true
}

impl Budget {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Budget {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            is_periodic: row.get(3)?,
            starting_balance: get_decimal(row, 4)?,
            current_balance: get_decimal(row, 5)?,
            is_active: row.get(6)?,
            is_income: row.get(7)?,
        })
    }

    pub fn create(conn: &Connection, new: &NewBudget) -> Result<Budget> {
        require_non_empty("name", &new.name)?;
        check_length("name", &new.name, 50)?;
        check_optional_length("description", new.description.as_deref(), 254)?;

        let (starting, current) = if new.is_periodic {
            (Some(new.balance), None)
        } else {
            (None, Some(new.balance))
        };

        conn.execute(
            "INSERT INTO budgets (name, description, is_periodic, starting_balance, current_balance, is_income)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.name,
                new.description,
                new.is_periodic,
                decimal_param(starting),
                decimal_param(current),
                new.is_income,
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::info!(budget_id = id, name = %new.name, "created budget");
        Budget::get(conn, id)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Budget> {
        conn.query_row(
            &format!("SELECT {} FROM budgets WHERE id = ?1", COLUMNS),
            [id],
            Budget::from_row,
        )
        .optional()?
        .ok_or_else(|| BudgetError::not_found("Budget", id))
    }

    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Budget>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM budgets WHERE name = ?1", COLUMNS),
                [name],
                Budget::from_row,
            )
            .optional()?)
    }

    pub fn all(conn: &Connection) -> Result<Vec<Budget>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM budgets ORDER BY name", COLUMNS))?;
        let budgets = stmt
            .query_map([], Budget::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(budgets)
    }
}
