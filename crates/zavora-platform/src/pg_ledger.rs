use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;
use zavora_core::{
    ConsumingLine, CostAuditLog, DatedConsumption, InventoryError, LineKind, LineRef,
    LotConsumption, LotSource, NewConsumingLine, NewStockLot, Result, StockLedger, StockLot,
};

const LOT_COLUMNS: &str = "id, seq, product_id, source_kind, source_ref, lot_date, unit_cost, \
     initial_quantity, remaining_quantity, warehouse_id, created_at";

const LINE_KINDS: [LineKind; 2] = [LineKind::Sale, LineKind::PurchaseReturn];

/// Where each line kind keeps its items, owning documents and lot draws.
struct LineTables {
    items: &'static str,
    documents: &'static str,
    document_fk: &'static str,
    consumptions: &'static str,
    line_fk: &'static str,
}

fn tables(kind: LineKind) -> LineTables {
    match kind {
        LineKind::Sale => LineTables {
            items: "invoice_items",
            documents: "invoices",
            document_fk: "invoice_id",
            consumptions: "stock_lot_consumptions",
            line_fk: "invoice_item_id",
        },
        LineKind::PurchaseReturn => LineTables {
            items: "debit_note_items",
            documents: "debit_notes",
            document_fk: "debit_note_id",
            consumptions: "debit_note_lot_consumptions",
            line_fk: "debit_note_item_id",
        },
    }
}

fn line_select(tables: &LineTables) -> String {
    format!(
        "SELECT i.id, i.product_id, i.{fk} AS document_id, i.transaction_date, \
         i.seq, i.quantity, i.cogs \
         FROM {items} i",
        fk = tables.document_fk,
        items = tables.items,
    )
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name).map_err(InventoryError::storage)
}

fn lot_from_row(row: &PgRow) -> Result<StockLot> {
    let source: String = col(row, "source_kind")?;
    Ok(StockLot {
        id: col(row, "id")?,
        sequence: col(row, "seq")?,
        product_id: col(row, "product_id")?,
        source: LotSource::parse(&source)?,
        source_ref: col(row, "source_ref")?,
        lot_date: col(row, "lot_date")?,
        unit_cost: col(row, "unit_cost")?,
        initial_quantity: col(row, "initial_quantity")?,
        remaining_quantity: col(row, "remaining_quantity")?,
        warehouse_id: col(row, "warehouse_id")?,
        created_at: col(row, "created_at")?,
    })
}

fn line_from_row(kind: LineKind, row: &PgRow) -> Result<ConsumingLine> {
    Ok(ConsumingLine {
        id: col(row, "id")?,
        kind,
        product_id: col(row, "product_id")?,
        document_id: col(row, "document_id")?,
        transaction_date: col(row, "transaction_date")?,
        sequence: col(row, "seq")?,
        quantity: col(row, "quantity")?,
        cogs: col(row, "cogs")?,
    })
}

fn consumption_from_row(kind: LineKind, row: &PgRow) -> Result<LotConsumption> {
    Ok(LotConsumption {
        id: col(row, "id")?,
        lot_id: col(row, "lot_id")?,
        line: LineRef {
            kind,
            id: col(row, "line_id")?,
        },
        quantity_consumed: col(row, "quantity_consumed")?,
        unit_cost: col(row, "unit_cost")?,
        total_cost: col(row, "total_cost")?,
        created_at: col(row, "created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<CostAuditLog> {
    let kind: String = col(row, "line_kind")?;
    Ok(CostAuditLog {
        id: col(row, "id")?,
        product_id: col(row, "product_id")?,
        line: LineRef {
            kind: LineKind::parse(&kind)?,
            id: col(row, "line_id")?,
        },
        old_cogs: col(row, "old_cogs")?,
        new_cogs: col(row, "new_cogs")?,
        delta: col(row, "delta")?,
        reason: col(row, "reason")?,
        actor: col(row, "actor")?,
        created_at: col(row, "created_at")?,
    })
}

/// Stock ledger backed by one Postgres transaction. Dropping the value
/// without calling [`PgStockLedger::commit`] rolls every write back.
pub struct PgStockLedger {
    tx: Transaction<'static, Postgres>,
}

impl PgStockLedger {
    pub async fn begin(pool: &PgPool, statement_timeout: Duration) -> anyhow::Result<Self> {
        let mut tx = pool.begin().await?;
        // SET does not take bind parameters.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(Self { tx })
    }

    pub async fn commit(self) -> anyhow::Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> anyhow::Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn line_has_consumptions(&mut self, line: LineRef) -> Result<bool> {
        let t = tables(line.kind);
        let row = sqlx::query(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1) AS drawn",
            t.consumptions, t.line_fk
        ))
        .bind(line.id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        col(&row, "drawn")
    }

    async fn bound_violation(&mut self, lot_id: Uuid, detail: String) -> InventoryError {
        match self.lot(lot_id).await {
            Ok(Some(lot)) => InventoryError::InvariantViolation(format!(
                "lot {} {detail} (remaining {}, initial {})",
                lot.id, lot.remaining_quantity, lot.initial_quantity
            )),
            Ok(None) => InventoryError::not_found("stock lot", lot_id),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn lock_product(&mut self, product_id: Uuid) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(product_id)
            .execute(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;
        debug!(%product_id, "product lock acquired");
        Ok(())
    }

    async fn fallback_unit_cost(&mut self, product_id: Uuid) -> Result<Decimal> {
        let row = sqlx::query("SELECT cost FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?
            .ok_or_else(|| InventoryError::not_found("product", product_id))?;
        col(&row, "cost")
    }

    async fn insert_lot(&mut self, lot: NewStockLot) -> Result<StockLot> {
        lot.validate()?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO stock_lots (
                id, product_id, source_kind, source_ref, lot_date, unit_cost,
                initial_quantity, remaining_quantity, warehouse_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $8, NOW())
            RETURNING {LOT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(lot.product_id)
        .bind(lot.source.as_str())
        .bind(lot.source_ref)
        .bind(lot.lot_date)
        .bind(lot.unit_cost)
        .bind(lot.quantity)
        .bind(lot.warehouse_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        lot_from_row(&row)
    }

    async fn lot(&mut self, lot_id: Uuid) -> Result<Option<StockLot>> {
        let row = sqlx::query(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE id = $1"
        ))
        .bind(lot_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        row.as_ref().map(lot_from_row).transpose()
    }

    async fn lots_for_product(&mut self, product_id: Uuid) -> Result<Vec<StockLot>> {
        let rows = sqlx::query(&format!(
            "SELECT {LOT_COLUMNS} FROM stock_lots WHERE product_id = $1 ORDER BY lot_date, seq"
        ))
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        rows.iter().map(lot_from_row).collect()
    }

    async fn available_lots(
        &mut self,
        product_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<StockLot>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {LOT_COLUMNS} FROM stock_lots
            WHERE product_id = $1 AND remaining_quantity > 0 AND lot_date <= $2
            ORDER BY lot_date, seq
            FOR UPDATE
            "#
        ))
        .bind(product_id)
        .bind(as_of)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        rows.iter().map(lot_from_row).collect()
    }

    async fn adjust_lot_remaining(&mut self, lot_id: Uuid, delta: Decimal) -> Result<StockLot> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE stock_lots SET remaining_quantity = remaining_quantity + $2
            WHERE id = $1
              AND remaining_quantity + $2 >= 0
              AND remaining_quantity + $2 <= initial_quantity
            RETURNING {LOT_COLUMNS}
            "#
        ))
        .bind(lot_id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;

        match row {
            Some(row) => lot_from_row(&row),
            None => Err(self
                .bound_violation(lot_id, format!("cannot move by {delta}"))
                .await),
        }
    }

    async fn set_lot_remaining(&mut self, lot_id: Uuid, remaining: Decimal) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_lots SET remaining_quantity = $2
            WHERE id = $1 AND $2 >= 0 AND $2 <= initial_quantity
            "#,
        )
        .bind(lot_id)
        .bind(remaining)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?
        .rows_affected();

        if updated == 0 {
            return Err(self
                .bound_violation(lot_id, format!("cannot be reset to {remaining}"))
                .await);
        }
        Ok(())
    }

    async fn delete_lot(&mut self, lot_id: Uuid) -> Result<()> {
        if !self.consumptions_for_lot(lot_id).await?.is_empty() {
            return Err(InventoryError::InvariantViolation(format!(
                "lot {lot_id} still has consumptions"
            )));
        }
        let deleted = sqlx::query("DELETE FROM stock_lots WHERE id = $1")
            .bind(lot_id)
            .execute(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?
            .rows_affected();
        if deleted == 0 {
            return Err(InventoryError::not_found("stock lot", lot_id));
        }
        Ok(())
    }

    async fn insert_consumption(&mut self, consumption: LotConsumption) -> Result<()> {
        let t = tables(consumption.line.kind);
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (
                id, lot_id, {}, quantity_consumed, unit_cost, total_cost, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            t.consumptions, t.line_fk
        ))
        .bind(consumption.id)
        .bind(consumption.lot_id)
        .bind(consumption.line.id)
        .bind(consumption.quantity_consumed)
        .bind(consumption.unit_cost)
        .bind(consumption.total_cost)
        .bind(consumption.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        Ok(())
    }

    async fn consumptions_for_line(&mut self, line: LineRef) -> Result<Vec<LotConsumption>> {
        let t = tables(line.kind);
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, lot_id, {fk} AS line_id, quantity_consumed, unit_cost, total_cost, created_at
            FROM {table} WHERE {fk} = $1
            ORDER BY created_at, id
            "#,
            fk = t.line_fk,
            table = t.consumptions,
        ))
        .bind(line.id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        rows.iter()
            .map(|row| consumption_from_row(line.kind, row))
            .collect()
    }

    async fn consumptions_for_lot(&mut self, lot_id: Uuid) -> Result<Vec<LotConsumption>> {
        let mut consumptions = Vec::new();
        for kind in LINE_KINDS {
            let t = tables(kind);
            let rows = sqlx::query(&format!(
                r#"
                SELECT id, lot_id, {fk} AS line_id, quantity_consumed, unit_cost, total_cost, created_at
                FROM {table} WHERE lot_id = $1
                "#,
                fk = t.line_fk,
                table = t.consumptions,
            ))
            .bind(lot_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;
            for row in &rows {
                consumptions.push(consumption_from_row(kind, row)?);
            }
        }
        Ok(consumptions)
    }

    async fn delete_consumptions_for_line(&mut self, line: LineRef) -> Result<u64> {
        let t = tables(line.kind);
        let deleted = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1",
            t.consumptions, t.line_fk
        ))
        .bind(line.id)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?
        .rows_affected();
        Ok(deleted)
    }

    async fn consumption_history(&mut self, product_id: Uuid) -> Result<Vec<DatedConsumption>> {
        let mut history = Vec::new();
        for kind in LINE_KINDS {
            let t = tables(kind);
            let rows = sqlx::query(&format!(
                r#"
                SELECT c.id, c.lot_id, c.{line_fk} AS line_id, c.quantity_consumed,
                       c.unit_cost, c.total_cost, c.created_at,
                       i.transaction_date
                FROM {consumptions} c
                JOIN stock_lots l ON l.id = c.lot_id
                JOIN {items} i ON i.id = c.{line_fk}
                WHERE l.product_id = $1
                "#,
                line_fk = t.line_fk,
                consumptions = t.consumptions,
                items = t.items,
            ))
            .bind(product_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;

            for row in &rows {
                history.push(DatedConsumption {
                    consumption: consumption_from_row(kind, row)?,
                    transaction_date: col(row, "transaction_date")?,
                });
            }
        }
        Ok(history)
    }

    async fn insert_line(&mut self, line: NewConsumingLine) -> Result<ConsumingLine> {
        if line.quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(line.quantity));
        }
        let t = tables(line.kind);

        // The header keeps the date of its first line; each line carries its own.
        sqlx::query(&format!(
            "INSERT INTO {} (id, issue_date) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
            t.documents
        ))
        .bind(line.document_id)
        .bind(line.transaction_date)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;

        sqlx::query(&format!(
            "INSERT INTO {} (id, {}, product_id, transaction_date, quantity) \
             VALUES ($1, $2, $3, $4, $5)",
            t.items, t.document_fk
        ))
        .bind(line.id)
        .bind(line.document_id)
        .bind(line.product_id)
        .bind(line.transaction_date)
        .bind(line.quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;

        let key = LineRef {
            kind: line.kind,
            id: line.id,
        };
        self.line(key)
            .await?
            .ok_or_else(|| InventoryError::not_found("consuming line", line.id))
    }

    async fn line(&mut self, line: LineRef) -> Result<Option<ConsumingLine>> {
        let t = tables(line.kind);
        let row = sqlx::query(&format!("{} WHERE i.id = $1", line_select(&t)))
            .bind(line.id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;
        row.map(|row| line_from_row(line.kind, &row)).transpose()
    }

    async fn update_line(
        &mut self,
        line: LineRef,
        quantity: Decimal,
        transaction_date: NaiveDate,
    ) -> Result<ConsumingLine> {
        if quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        let t = tables(line.kind);

        // Only this line moves; siblings on the document keep their dates.
        let updated = sqlx::query(&format!(
            "UPDATE {} SET quantity = $2, transaction_date = $3 WHERE id = $1",
            t.items
        ))
        .bind(line.id)
        .bind(quantity)
        .bind(transaction_date)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?
        .rows_affected();
        if updated == 0 {
            return Err(InventoryError::not_found("consuming line", line.id));
        }

        self.line(line)
            .await?
            .ok_or_else(|| InventoryError::not_found("consuming line", line.id))
    }

    async fn delete_line(&mut self, line: LineRef) -> Result<()> {
        if self.line_has_consumptions(line).await? {
            return Err(InventoryError::InvariantViolation(format!(
                "line {line} still has consumptions"
            )));
        }
        let t = tables(line.kind);
        let deleted = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", t.items))
            .bind(line.id)
            .execute(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?
            .rows_affected();
        if deleted == 0 {
            return Err(InventoryError::not_found("consuming line", line.id));
        }
        Ok(())
    }

    async fn set_line_cogs(&mut self, line: LineRef, cogs: Decimal) -> Result<()> {
        let t = tables(line.kind);
        let updated = sqlx::query(&format!("UPDATE {} SET cogs = $2 WHERE id = $1", t.items))
            .bind(line.id)
            .bind(cogs)
            .execute(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?
            .rows_affected();
        if updated == 0 {
            return Err(InventoryError::not_found("consuming line", line.id));
        }
        Ok(())
    }

    async fn lines_from(
        &mut self,
        product_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<ConsumingLine>> {
        let mut lines = Vec::new();
        for kind in LINE_KINDS {
            let t = tables(kind);
            let rows = sqlx::query(&format!(
                "{} WHERE i.product_id = $1 AND i.transaction_date >= $2",
                line_select(&t)
            ))
            .bind(product_id)
            .bind(from)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;
            for row in &rows {
                lines.push(line_from_row(kind, row)?);
            }
        }
        lines.sort_by_key(ConsumingLine::replay_key);
        Ok(lines)
    }

    async fn latest_line_date(&mut self, product_id: Uuid) -> Result<Option<NaiveDate>> {
        let mut latest: Option<NaiveDate> = None;
        for kind in LINE_KINDS {
            let t = tables(kind);
            let row = sqlx::query(&format!(
                r#"
                SELECT MAX(transaction_date) AS latest
                FROM {items}
                WHERE product_id = $1
                "#,
                items = t.items,
            ))
            .bind(product_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(InventoryError::storage)?;
            let candidate: Option<NaiveDate> = col(&row, "latest")?;
            latest = latest.max(candidate);
        }
        Ok(latest)
    }

    async fn append_audit(&mut self, entry: CostAuditLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cost_audit_logs (
                id, product_id, line_kind, line_id, old_cogs, new_cogs, delta,
                reason, actor, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_id)
        .bind(entry.line.kind.as_str())
        .bind(entry.line.id)
        .bind(entry.old_cogs)
        .bind(entry.new_cogs)
        .bind(entry.delta)
        .bind(&entry.reason)
        .bind(&entry.actor)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        Ok(())
    }

    async fn audit_for_product(&mut self, product_id: Uuid) -> Result<Vec<CostAuditLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, product_id, line_kind, line_id, old_cogs, new_cogs, delta,
                   reason, actor, created_at
            FROM cost_audit_logs
            WHERE product_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(InventoryError::storage)?;
        rows.iter().map(audit_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_kinds_map_to_their_own_tables() {
        let sale = tables(LineKind::Sale);
        let purchase_return = tables(LineKind::PurchaseReturn);

        assert_eq!(sale.consumptions, "stock_lot_consumptions");
        assert_eq!(purchase_return.consumptions, "debit_note_lot_consumptions");
        assert_ne!(sale.items, purchase_return.items);
    }

    #[test]
    fn test_line_date_is_read_from_the_line_not_its_document() {
        let sql = line_select(&tables(LineKind::PurchaseReturn));
        assert!(sql.contains("i.transaction_date"));
        assert!(sql.contains("i.debit_note_id AS document_id"));
        assert!(!sql.contains("issue_date"));
    }
}
