use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

const FIFO_LEDGER_SCHEMA: &str = include_str!("../../../migrations/0001_fifo_ledger.sql");

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Creates the lot, line, consumption and audit tables if they are missing.
pub async fn apply_schema(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(FIFO_LEDGER_SCHEMA)
        .execute(pool)
        .await
        .context("failed to apply fifo ledger schema")?;
    info!("fifo ledger schema applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_type(table: &str, column: &str) -> &'static str {
        let start = FIFO_LEDGER_SCHEMA
            .find(&format!("CREATE TABLE IF NOT EXISTS {table} ("))
            .expect("table is declared");
        let body = &FIFO_LEDGER_SCHEMA[start..];
        let body = &body[..body.find(");").expect("table is closed")];
        body.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix(&format!("{column} ")))
            .expect("column is declared")
    }

    #[test]
    fn test_quantities_and_unit_costs_are_not_scale_limited() {
        for (table, column) in [
            ("products", "cost"),
            ("stock_lots", "unit_cost"),
            ("stock_lots", "initial_quantity"),
            ("stock_lots", "remaining_quantity"),
            ("invoice_items", "quantity"),
            ("debit_note_items", "quantity"),
            ("stock_lot_consumptions", "quantity_consumed"),
            ("stock_lot_consumptions", "unit_cost"),
            ("debit_note_lot_consumptions", "quantity_consumed"),
            ("debit_note_lot_consumptions", "unit_cost"),
        ] {
            let declared = column_type(table, column);
            assert!(
                declared.starts_with("NUMERIC NOT NULL"),
                "{table}.{column} is declared as {declared}"
            );
        }
    }

    #[test]
    fn test_consuming_lines_carry_their_own_date() {
        assert!(column_type("invoice_items", "transaction_date").starts_with("DATE NOT NULL"));
        assert!(column_type("debit_note_items", "transaction_date").starts_with("DATE NOT NULL"));
    }
}
