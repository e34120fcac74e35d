//! Document-level workflows built on the FIFO and recalculation engines.
//!
//! Each function is one business operation and expects to run inside a
//! single unit of work. They decide when a write reaches into history and
//! trigger the replay themselves, so callers only have to commit or roll back.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use zavora_core::{
    ConsumingLine, InventoryError, LineKind, LineRef, LotSource, NewConsumingLine, NewStockLot,
    Result, StockLedger, StockLot,
};

use crate::fifo;
use crate::recalculation::{
    RecalculationSummary, has_lines_on_or_after, is_backdated, recalculate_from_date, replay_from,
};

pub const REASON_BACKDATED_ENTRY: &str = "backdated_entry";
pub const REASON_LINE_EDITED: &str = "line_edited";
pub const REASON_LINE_DELETED: &str = "line_deleted";
pub const REASON_LOT_CHANGED: &str = "lot_changed";

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentOutcome {
    pub lines: Vec<ConsumingLine>,
    pub warnings: Vec<String>,
    pub recalculations: Vec<RecalculationSummary>,
}

impl DocumentOutcome {
    fn absorb(&mut self, summary: RecalculationSummary) {
        self.warnings.extend(summary.warnings.iter().cloned());
        self.recalculations.push(summary);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LotReceipt {
    pub lot: StockLot,
    pub recalculation: Option<RecalculationSummary>,
}

/// A customer return of previously sold stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditNoteLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub original_sale_line: Option<Uuid>,
    pub return_date: NaiveDate,
    pub quantity: Decimal,
    pub warehouse_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotRevision {
    pub lot_date: NaiveDate,
    pub unit_cost: Decimal,
    pub quantity: Decimal,
}

pub async fn record_sale<L>(
    ledger: &mut L,
    lines: Vec<NewConsumingLine>,
    actor: Option<&str>,
) -> Result<DocumentOutcome>
where
    L: StockLedger + ?Sized,
{
    post_lines(ledger, LineKind::Sale, lines, actor).await
}

/// Returns stock to a supplier. Unlike a sale, any line that cannot be
/// covered by stock on hand fails the whole note.
pub async fn issue_debit_note<L>(
    ledger: &mut L,
    lines: Vec<NewConsumingLine>,
    actor: Option<&str>,
) -> Result<DocumentOutcome>
where
    L: StockLedger + ?Sized,
{
    post_lines(ledger, LineKind::PurchaseReturn, lines, actor).await
}

async fn post_lines<L>(
    ledger: &mut L,
    kind: LineKind,
    lines: Vec<NewConsumingLine>,
    actor: Option<&str>,
) -> Result<DocumentOutcome>
where
    L: StockLedger + ?Sized,
{
    if let Some(line) = lines.iter().find(|line| line.kind != kind) {
        return Err(InventoryError::Validation(format!(
            "line {} is {} but the document posts {}",
            line.id,
            line.kind.as_str(),
            kind.as_str()
        )));
    }

    let mut by_product: BTreeMap<Uuid, Vec<ConsumingLine>> = BTreeMap::new();
    let mut order = Vec::with_capacity(lines.len());
    for line in lines {
        let stored = ledger.insert_line(line).await?;
        order.push(stored.line_ref());
        by_product.entry(stored.product_id).or_default().push(stored);
    }

    let mut outcome = DocumentOutcome::default();
    for (product_id, mut posted) in by_product {
        posted.sort_by_key(ConsumingLine::replay_key);
        let earliest = posted[0].transaction_date;

        if is_backdated(ledger, product_id, earliest).await? {
            // Replay covers the new lines as well; drawing them live first
            // would see stock already taken by later lines.
            let fresh: BTreeSet<LineRef> = posted.iter().map(ConsumingLine::line_ref).collect();
            let summary = replay_from(
                ledger,
                product_id,
                earliest,
                REASON_BACKDATED_ENTRY,
                actor,
                &fresh,
            )
            .await?;
            outcome.absorb(summary);
            continue;
        }

        for line in &posted {
            let result = fifo::consume(
                ledger,
                product_id,
                line.quantity,
                line.line_ref(),
                line.transaction_date,
            )
            .await?;
            ledger.set_line_cogs(line.line_ref(), result.total_cogs).await?;
            outcome.warnings.extend(result.warning);
        }
    }

    for line_ref in order {
        let stored = ledger
            .line(line_ref)
            .await?
            .ok_or_else(|| InventoryError::not_found("consuming line", line_ref.id))?;
        outcome.lines.push(stored);
    }

    info!(
        kind = kind.as_str(),
        lines = outcome.lines.len(),
        warnings = outcome.warnings.len(),
        "document posted"
    );
    Ok(outcome)
}

/// Changes a posted line's quantity or date and re-costs it along with
/// everything it may have displaced.
pub async fn edit_line<L>(
    ledger: &mut L,
    line: LineRef,
    quantity: Decimal,
    transaction_date: NaiveDate,
    actor: Option<&str>,
) -> Result<DocumentOutcome>
where
    L: StockLedger + ?Sized,
{
    let before = ledger
        .line(line)
        .await?
        .ok_or_else(|| InventoryError::not_found("consuming line", line.id))?;
    let product_id = before.product_id;

    fifo::restore(ledger, line).await?;
    let updated = ledger.update_line(line, quantity, transaction_date).await?;

    let from = before.transaction_date.min(transaction_date);
    let mut outcome = DocumentOutcome::default();

    if other_lines_from(ledger, product_id, from, line).await? {
        let summary =
            recalculate_from_date(ledger, product_id, from, REASON_LINE_EDITED, actor).await?;
        outcome.absorb(summary);
    } else {
        let result = fifo::consume(
            ledger,
            product_id,
            updated.quantity,
            line,
            updated.transaction_date,
        )
        .await?;
        ledger.set_line_cogs(line, result.total_cogs).await?;
        outcome.warnings.extend(result.warning);
    }

    let stored = ledger
        .line(line)
        .await?
        .ok_or_else(|| InventoryError::not_found("consuming line", line.id))?;
    outcome.lines.push(stored);
    Ok(outcome)
}

/// Removes a posted line, giving its stock back and re-costing later lines.
pub async fn delete_line<L>(
    ledger: &mut L,
    line: LineRef,
    actor: Option<&str>,
) -> Result<Option<RecalculationSummary>>
where
    L: StockLedger + ?Sized,
{
    let stored = ledger
        .line(line)
        .await?
        .ok_or_else(|| InventoryError::not_found("consuming line", line.id))?;

    fifo::restore(ledger, line).await?;
    ledger.delete_line(line).await?;

    if !has_lines_on_or_after(ledger, stored.product_id, stored.transaction_date).await? {
        return Ok(None);
    }
    recalculate_from_date(
        ledger,
        stored.product_id,
        stored.transaction_date,
        REASON_LINE_DELETED,
        actor,
    )
    .await
    .map(Some)
}

pub async fn receive_purchase<L>(
    ledger: &mut L,
    lot: NewStockLot,
    actor: Option<&str>,
) -> Result<LotReceipt>
where
    L: StockLedger + ?Sized,
{
    expect_source(&lot, LotSource::Purchase)?;
    record_lot(ledger, lot, actor).await
}

pub async fn record_opening_stock<L>(
    ledger: &mut L,
    lot: NewStockLot,
    actor: Option<&str>,
) -> Result<LotReceipt>
where
    L: StockLedger + ?Sized,
{
    expect_source(&lot, LotSource::OpeningStock)?;
    record_lot(ledger, lot, actor).await
}

/// Puts returned stock back into FIFO order at the return date, valued at
/// what the original sale was costed at per unit.
pub async fn record_credit_note<L>(
    ledger: &mut L,
    credit: CreditNoteLine,
    actor: Option<&str>,
) -> Result<LotReceipt>
where
    L: StockLedger + ?Sized,
{
    let original = original_unit_cogs(ledger, credit.product_id, credit.original_sale_line);
    let unit_cost = match original.await? {
        Some(cost) => cost,
        None => ledger.fallback_unit_cost(credit.product_id).await?,
    };

    let lot = NewStockLot {
        product_id: credit.product_id,
        source: LotSource::CreditNote,
        source_ref: credit.id,
        lot_date: credit.return_date,
        unit_cost,
        quantity: credit.quantity,
        warehouse_id: credit.warehouse_id,
    };
    record_lot(ledger, lot, actor).await
}

/// Deletes a lot together with its source document's claim on stock. Every
/// line that drew from it is restored and replayed against what is left.
pub async fn remove_lot_source<L>(
    ledger: &mut L,
    lot_id: Uuid,
    actor: Option<&str>,
) -> Result<Option<RecalculationSummary>>
where
    L: StockLedger + ?Sized,
{
    let lot = detach_lot(ledger, lot_id).await?;
    if !has_lines_on_or_after(ledger, lot.product_id, lot.lot_date).await? {
        return Ok(None);
    }
    recalculate_from_date(
        ledger,
        lot.product_id,
        lot.lot_date,
        REASON_LOT_CHANGED,
        actor,
    )
    .await
    .map(Some)
}

/// Replaces a lot's date, cost and quantity. The revised lot keeps its
/// source but is re-queued behind lots already received on its new date.
pub async fn revise_lot<L>(
    ledger: &mut L,
    lot_id: Uuid,
    revision: LotRevision,
    actor: Option<&str>,
) -> Result<LotReceipt>
where
    L: StockLedger + ?Sized,
{
    let old = detach_lot(ledger, lot_id).await?;
    let lot = ledger
        .insert_lot(NewStockLot {
            product_id: old.product_id,
            source: old.source,
            source_ref: old.source_ref,
            lot_date: revision.lot_date,
            unit_cost: revision.unit_cost,
            quantity: revision.quantity,
            warehouse_id: old.warehouse_id,
        })
        .await?;

    let from = old.lot_date.min(lot.lot_date);
    let recalculation = if has_lines_on_or_after(ledger, lot.product_id, from).await? {
        Some(
            recalculate_from_date(ledger, lot.product_id, from, REASON_LOT_CHANGED, actor)
                .await?,
        )
    } else {
        None
    };
    Ok(LotReceipt { lot, recalculation })
}

async fn record_lot<L>(
    ledger: &mut L,
    lot: NewStockLot,
    actor: Option<&str>,
) -> Result<LotReceipt>
where
    L: StockLedger + ?Sized,
{
    ledger.lock_product(lot.product_id).await?;
    let lot = ledger.insert_lot(lot).await?;
    info!(
        product_id = %lot.product_id,
        lot_id = %lot.id,
        source = lot.source.as_str(),
        quantity = %lot.initial_quantity,
        "stock lot recorded"
    );

    let recalculation = if has_lines_on_or_after(ledger, lot.product_id, lot.lot_date).await? {
        Some(
            recalculate_from_date(
                ledger,
                lot.product_id,
                lot.lot_date,
                REASON_BACKDATED_ENTRY,
                actor,
            )
            .await?,
        )
    } else {
        None
    };
    Ok(LotReceipt { lot, recalculation })
}

/// Restores every line that drew from the lot, then deletes it.
async fn detach_lot<L>(ledger: &mut L, lot_id: Uuid) -> Result<StockLot>
where
    L: StockLedger + ?Sized,
{
    let lot = ledger
        .lot(lot_id)
        .await?
        .ok_or_else(|| InventoryError::not_found("stock lot", lot_id))?;
    ledger.lock_product(lot.product_id).await?;

    let consumers: BTreeSet<LineRef> = ledger
        .consumptions_for_lot(lot_id)
        .await?
        .into_iter()
        .map(|row| row.line)
        .collect();
    for line in consumers {
        fifo::restore(ledger, line).await?;
    }

    ledger.delete_lot(lot_id).await?;
    Ok(lot)
}

async fn other_lines_from<L>(
    ledger: &mut L,
    product_id: Uuid,
    from: NaiveDate,
    exclude: LineRef,
) -> Result<bool>
where
    L: StockLedger + ?Sized,
{
    Ok(ledger
        .lines_from(product_id, from)
        .await?
        .iter()
        .any(|line| line.line_ref() != exclude))
}

/// Unit COGS of the referenced sale line at full precision. A line for
/// another product is rejected.
async fn original_unit_cogs<L>(
    ledger: &mut L,
    product_id: Uuid,
    sale_line: Option<Uuid>,
) -> Result<Option<Decimal>>
where
    L: StockLedger + ?Sized,
{
    let Some(id) = sale_line else {
        return Ok(None);
    };
    let Some(line) = ledger.line(LineRef::sale(id)).await? else {
        return Ok(None);
    };
    if line.product_id != product_id {
        return Err(InventoryError::Validation(format!(
            "sale line {id} is for product {}, not {product_id}",
            line.product_id
        )));
    }
    if line.quantity <= Decimal::ZERO {
        return Ok(None);
    }
    Ok(Some((line.cogs / line.quantity).normalize()))
}

fn expect_source(lot: &NewStockLot, source: LotSource) -> Result<()> {
    if lot.source != source {
        return Err(InventoryError::Validation(format!(
            "expected a {} lot, got {}",
            source.as_str(),
            lot.source.as_str()
        )));
    }
    Ok(())
}
