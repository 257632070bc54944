// Account interest and payoff attributes: APR plus the names of the
// billing-period, interest and minimum-payment strategies.

use super::{Column, SchemaManager};
use crate::error::Result;

pub struct Migration;

fn columns() -> [Column; 5] {
    [
        Column::new("apr", "NUMERIC(5,4)"),
        Column::new("billing_period_class_args", "TEXT"),
        Column::new("billing_period_class_name", "VARCHAR(70)"),
        Column::new("interest_class_name", "VARCHAR(70)"),
        Column::new("min_payment_class_name", "VARCHAR(70)"),
    ]
}

impl super::Migration for Migration {
    fn revision(&self) -> &'static str {
        "9dc8545963be"
    }

    fn down_revision(&self) -> Option<&'static str> {
        Some("ceb73ddf66eb")
    }

    fn description(&self) -> &'static str {
        "account interest and payoff attributes"
    }

    fn upgrade(&self, schema: &SchemaManager<'_>) -> Result<()> {
        for column in columns() {
            schema.add_column("accounts", &column)?;
        }
        Ok(())
    }

    fn downgrade(&self, schema: &SchemaManager<'_>) -> Result<()> {
        // strict reverse of upgrade
        for column in columns().iter().rev() {
            schema.drop_column("accounts", column.name)?;
        }
        Ok(())
    }
}
