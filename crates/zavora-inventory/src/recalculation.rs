use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;
use zavora_core::{
    CostAuditLog, Cutoff, DatedConsumption, InventoryError, LineRef, Result, StockLedger,
    StockLot,
};

use crate::fifo;

pub const DEFAULT_REASON: &str = "recalculation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineReplay {
    pub line: LineRef,
    pub transaction_date: NaiveDate,
    pub old_cogs: Decimal,
    pub new_cogs: Decimal,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecalculationSummary {
    pub product_id: Uuid,
    pub from_date: NaiveDate,
    pub skipped: bool,
    pub lots_reset: usize,
    pub consumptions_purged: u64,
    pub replayed: Vec<LineReplay>,
    pub audit_entries: usize,
    pub warnings: Vec<String>,
}

impl RecalculationSummary {
    fn skipped(product_id: Uuid, from_date: NaiveDate) -> Self {
        Self {
            product_id,
            from_date,
            skipped: true,
            lots_reset: 0,
            consumptions_purged: 0,
            replayed: Vec::new(),
            audit_entries: 0,
            warnings: Vec::new(),
        }
    }
}

/// Remaining quantity each lot had just before `cutoff`: its initial
/// quantity minus what lines dated before the cutoff drew from it.
pub fn reset_quantities(
    lots: &[StockLot],
    history: &[DatedConsumption],
    cutoff: Cutoff,
) -> Result<Vec<(Uuid, Decimal)>> {
    let mut consumed_before: HashMap<Uuid, Decimal> = HashMap::new();
    for entry in history
        .iter()
        .filter(|entry| cutoff.is_before(entry.transaction_date))
    {
        *consumed_before
            .entry(entry.consumption.lot_id)
            .or_default() += entry.consumption.quantity_consumed;
    }

    lots.iter()
        .map(|lot| {
            let consumed = consumed_before
                .get(&lot.id)
                .copied()
                .unwrap_or(Decimal::ZERO);

            if cutoff.is_forward(lot.lot_date) && !consumed.is_zero() {
                return Err(InventoryError::InvariantViolation(format!(
                    "lot {} dated {} was drawn by lines before {}",
                    lot.id,
                    lot.lot_date,
                    cutoff.date()
                )));
            }

            let remaining = lot.initial_quantity - consumed;
            if remaining < Decimal::ZERO {
                return Err(InventoryError::InvariantViolation(format!(
                    "lot {} consumed {} of {} before {}",
                    lot.id,
                    consumed,
                    lot.initial_quantity,
                    cutoff.date()
                )));
            }
            Ok((lot.id, remaining))
        })
        .collect()
}

/// True when a sale or purchase return for the product is dated strictly
/// after `date`, i.e. a write at `date` would change history.
pub async fn is_backdated<L>(ledger: &mut L, product_id: Uuid, date: NaiveDate) -> Result<bool>
where
    L: StockLedger + ?Sized,
{
    Ok(ledger
        .latest_line_date(product_id)
        .await?
        .is_some_and(|latest| latest > date))
}

/// True when some outbound line is dated on or after `date`. Inbound stock
/// dated `date` is eligible for same-day lines, so lot writes use this
/// instead of [`is_backdated`].
pub async fn has_lines_on_or_after<L>(
    ledger: &mut L,
    product_id: Uuid,
    date: NaiveDate,
) -> Result<bool>
where
    L: StockLedger + ?Sized,
{
    Ok(ledger
        .latest_line_date(product_id)
        .await?
        .is_some_and(|latest| latest >= date))
}

/// Rebuilds every consumption of `product_id` made by lines dated on or
/// after `from_date`, replaying them in date order through the same path as
/// live traffic. Lines whose COGS changes get an audit entry.
///
/// Must run inside the caller's unit of work; an error leaves partial writes
/// behind that the host is expected to roll back.
pub async fn recalculate_from_date<L>(
    ledger: &mut L,
    product_id: Uuid,
    from_date: NaiveDate,
    reason: &str,
    actor: Option<&str>,
) -> Result<RecalculationSummary>
where
    L: StockLedger + ?Sized,
{
    replay_from(ledger, product_id, from_date, reason, actor, &BTreeSet::new()).await
}

/// Replay with audit suppressed for `unaudited` lines, used for lines posted
/// in the same unit of work that have no prior COGS to compare against.
pub(crate) async fn replay_from<L>(
    ledger: &mut L,
    product_id: Uuid,
    from_date: NaiveDate,
    reason: &str,
    actor: Option<&str>,
    unaudited: &BTreeSet<LineRef>,
) -> Result<RecalculationSummary>
where
    L: StockLedger + ?Sized,
{
    ledger.lock_product(product_id).await?;

    let lines = ledger.lines_from(product_id, from_date).await?;
    if lines.is_empty() {
        debug!(%product_id, %from_date, "no lines to replay");
        return Ok(RecalculationSummary::skipped(product_id, from_date));
    }

    info!(%product_id, %from_date, lines = lines.len(), "recalculating stock consumption");

    let cutoff = Cutoff::new(from_date);
    let lots = ledger.lots_for_product(product_id).await?;
    let history = ledger.consumption_history(product_id).await?;

    let reset = reset_quantities(&lots, &history, cutoff)?;
    for (lot_id, remaining) in &reset {
        ledger.set_lot_remaining(*lot_id, *remaining).await?;
    }

    let mut consumptions_purged = 0;
    for line in &lines {
        consumptions_purged += ledger.delete_consumptions_for_line(line.line_ref()).await?;
    }

    let mut summary = RecalculationSummary {
        product_id,
        from_date,
        skipped: false,
        lots_reset: reset.len(),
        consumptions_purged,
        replayed: Vec::with_capacity(lines.len()),
        audit_entries: 0,
        warnings: Vec::new(),
    };

    for line in &lines {
        let line_ref = line.line_ref();
        let result = fifo::consume(
            ledger,
            product_id,
            line.quantity,
            line_ref,
            line.transaction_date,
        )
        .await?;
        ledger.set_line_cogs(line_ref, result.total_cogs).await?;

        if result.total_cogs != line.cogs && !unaudited.contains(&line_ref) {
            let entry = CostAuditLog::record(
                product_id,
                line_ref,
                line.cogs,
                result.total_cogs,
                reason,
                actor,
            );
            debug!(
                line = %line_ref,
                old_cogs = %entry.old_cogs,
                new_cogs = %entry.new_cogs,
                "cogs changed by replay"
            );
            ledger.append_audit(entry).await?;
            summary.audit_entries += 1;
        }

        if let Some(warning) = result.warning {
            summary.warnings.push(warning);
        }
        summary.replayed.push(LineReplay {
            line: line_ref,
            transaction_date: line.transaction_date,
            old_cogs: line.cogs,
            new_cogs: result.total_cogs,
            shortfall: result.shortfall,
        });
    }

    info!(
        %product_id,
        %from_date,
        replayed = summary.replayed.len(),
        audit_entries = summary.audit_entries,
        warnings = summary.warnings.len(),
        "recalculation finished"
    );

    Ok(summary)
}
