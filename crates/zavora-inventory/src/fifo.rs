use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use zavora_core::{
    InventoryError, LineKind, LineRef, LotConsumption, Result, StockLedger, StockLot, round_cost,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDraw {
    pub lot_id: Uuid,
    pub lot_date: NaiveDate,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub line_cost: Decimal,
}

/// Read-only projection of how a quantity would be drawn from stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionPlan {
    pub product_id: Uuid,
    pub requested: Decimal,
    pub as_of: NaiveDate,
    pub draws: Vec<PlannedDraw>,
    pub total_cost: Decimal,
    pub available_quantity: Decimal,
    pub shortfall: Decimal,
    pub insufficient_stock: bool,
}

impl ConsumptionPlan {
    pub fn drawn_quantity(&self) -> Decimal {
        self.draws.iter().map(|draw| draw.quantity).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumptionResult {
    pub line: LineRef,
    pub draws: Vec<PlannedDraw>,
    pub lot_cost: Decimal,
    pub shortfall: Decimal,
    pub fallback_unit_cost: Decimal,
    pub fallback_cost: Decimal,
    pub total_cogs: Decimal,
    pub insufficient_stock: bool,
    pub used_fallback_cost: bool,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub rows_removed: u64,
    pub quantity_restored: Decimal,
}

/// Greedy oldest-first draw over `lots`.
///
/// Only lots with stock left and a `lot_date` on or before `as_of` are
/// eligible; a lot dated later is never touched even when everything older is
/// exhausted. Ties on date fall back to the lot's creation sequence.
pub fn plan_consumption(
    product_id: Uuid,
    lots: &[StockLot],
    needed: Decimal,
    as_of: NaiveDate,
) -> Result<ConsumptionPlan> {
    if needed <= Decimal::ZERO {
        return Err(InventoryError::InvalidQuantity(needed));
    }

    let mut eligible: Vec<&StockLot> = lots
        .iter()
        .filter(|lot| {
            lot.product_id == product_id
                && lot.remaining_quantity > Decimal::ZERO
                && lot.lot_date <= as_of
        })
        .collect();
    eligible.sort_by_key(|lot| lot.fifo_key());

    let available_quantity: Decimal = eligible.iter().map(|lot| lot.remaining_quantity).sum();

    let mut still_needed = needed;
    let mut draws = Vec::new();
    for lot in eligible {
        if still_needed.is_zero() {
            break;
        }
        let take = lot.remaining_quantity.min(still_needed);
        draws.push(PlannedDraw {
            lot_id: lot.id,
            lot_date: lot.lot_date,
            quantity: take,
            unit_cost: lot.unit_cost,
            line_cost: round_cost(take * lot.unit_cost),
        });
        still_needed -= take;
    }

    let total_cost: Decimal = draws.iter().map(|draw| draw.line_cost).sum();
    let shortfall = (needed - available_quantity).max(Decimal::ZERO);

    Ok(ConsumptionPlan {
        product_id,
        requested: needed,
        as_of,
        draws,
        total_cost,
        available_quantity,
        shortfall,
        insufficient_stock: shortfall > Decimal::ZERO,
    })
}

/// Costs `quantity` of a product against the stock available on `as_of`
/// without writing anything.
pub async fn calculate<L>(
    ledger: &mut L,
    product_id: Uuid,
    quantity: Decimal,
    as_of: NaiveDate,
) -> Result<ConsumptionPlan>
where
    L: StockLedger + ?Sized,
{
    let lots = ledger.available_lots(product_id, as_of).await?;
    plan_consumption(product_id, &lots, quantity, as_of)
}

/// Draws `quantity` from stock for an outbound line and records which lots
/// served it.
///
/// Sale lines never fail on a shortfall: the missing units are valued at the
/// product's fallback cost and a warning is returned with the result.
/// Purchase-return lines are rejected with `InsufficientStock` before any lot
/// is touched.
pub async fn consume<L>(
    ledger: &mut L,
    product_id: Uuid,
    quantity: Decimal,
    line: LineRef,
    as_of: NaiveDate,
) -> Result<ConsumptionResult>
where
    L: StockLedger + ?Sized,
{
    ledger.lock_product(product_id).await?;
    let fallback_unit_cost = ledger.fallback_unit_cost(product_id).await?;
    let plan = calculate(ledger, product_id, quantity, as_of).await?;

    if plan.insufficient_stock && line.kind == LineKind::PurchaseReturn {
        return Err(InventoryError::InsufficientStock {
            product_id,
            requested: quantity,
            available: plan.available_quantity,
            shortfall: plan.shortfall,
        });
    }

    for draw in &plan.draws {
        ledger
            .adjust_lot_remaining(draw.lot_id, -draw.quantity)
            .await?;
        ledger
            .insert_consumption(LotConsumption::new(
                draw.lot_id,
                line,
                draw.quantity,
                draw.unit_cost,
            ))
            .await?;
    }

    let used_fallback_cost = plan.insufficient_stock;
    let fallback_cost = round_cost(plan.shortfall * fallback_unit_cost);
    let warning = used_fallback_cost.then(|| {
        format!(
            "Insufficient stock for product {product_id} on {as_of}: requested {quantity}, available {}. {} unit(s) were costed at the fallback price of {fallback_unit_cost}.",
            plan.available_quantity, plan.shortfall
        )
    });

    if used_fallback_cost {
        warn!(
            %product_id,
            line = %line,
            shortfall = %plan.shortfall,
            "stock shortfall costed at fallback price"
        );
    } else {
        debug!(%product_id, line = %line, lots = plan.draws.len(), "stock consumed");
    }

    Ok(ConsumptionResult {
        line,
        lot_cost: plan.total_cost,
        shortfall: plan.shortfall,
        fallback_unit_cost,
        fallback_cost,
        total_cogs: plan.total_cost + fallback_cost,
        insufficient_stock: plan.insufficient_stock,
        used_fallback_cost,
        warning,
        draws: plan.draws,
    })
}

/// Gives every unit a line consumed back to its lots and drops the line's
/// consumption rows.
pub async fn restore<L>(ledger: &mut L, line: LineRef) -> Result<RestoreSummary>
where
    L: StockLedger + ?Sized,
{
    let stored = ledger
        .line(line)
        .await?
        .ok_or_else(|| InventoryError::not_found("consuming line", line.id))?;
    ledger.lock_product(stored.product_id).await?;

    let rows = ledger.consumptions_for_line(line).await?;
    let mut summary = RestoreSummary::default();
    for row in &rows {
        ledger
            .adjust_lot_remaining(row.lot_id, row.quantity_consumed)
            .await?;
        summary.quantity_restored += row.quantity_consumed;
    }
    summary.rows_removed = ledger.delete_consumptions_for_line(line).await?;

    if summary.rows_removed != rows.len() as u64 {
        return Err(InventoryError::InvariantViolation(format!(
            "restored {} consumption rows for {line} but deleted {}",
            rows.len(),
            summary.rows_removed
        )));
    }

    debug!(line = %line, quantity = %summary.quantity_restored, "consumption restored");
    Ok(summary)
}
