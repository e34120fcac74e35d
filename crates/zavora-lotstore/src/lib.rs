use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;
use zavora_core::{
    ConsumingLine, CostAuditLog, DatedConsumption, InventoryError, LineRef, LotConsumption,
    NewConsumingLine, NewStockLot, Result, StockLedger, StockLot,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    fallback_costs: HashMap<Uuid, Decimal>,
    lots: HashMap<Uuid, StockLot>,
    consumptions: Vec<LotConsumption>,
    lines: HashMap<LineRef, ConsumingLine>,
    audit: Vec<CostAuditLog>,
    lot_sequence: i64,
    line_sequence: i64,
}

impl LedgerState {
    fn lot_mut(&mut self, lot_id: Uuid) -> Result<&mut StockLot> {
        self.lots
            .get_mut(&lot_id)
            .ok_or_else(|| InventoryError::not_found("stock lot", lot_id))
    }

    fn line_mut(&mut self, line: LineRef) -> Result<&mut ConsumingLine> {
        self.lines
            .get_mut(&line)
            .ok_or_else(|| InventoryError::not_found("consuming line", line.id))
    }
}

/// Process-local stock ledger. Units of work are serialized on a single
/// mutex and operate on a private copy of the state, so an uncommitted
/// handle leaves nothing behind.
#[derive(Clone, Default)]
pub struct InMemoryLotStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fallback_cost(&self, product_id: Uuid, cost: Decimal) {
        let mut state = self.state.lock().await;
        state.fallback_costs.insert(product_id, cost);
    }

    pub async fn begin(&self) -> InMemoryLedgerTx {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        InMemoryLedgerTx { guard, working }
    }

    pub async fn lots(&self, product_id: Uuid) -> Vec<StockLot> {
        let state = self.state.lock().await;
        sorted_lots(&state, product_id)
    }

    pub async fn consumptions(&self) -> Vec<LotConsumption> {
        self.state.lock().await.consumptions.clone()
    }

    pub async fn audit_log(&self) -> Vec<CostAuditLog> {
        self.state.lock().await.audit.clone()
    }
}

pub struct InMemoryLedgerTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

impl InMemoryLedgerTx {
    pub fn commit(self) {
        let Self { mut guard, working } = self;
        *guard = working;
    }

    pub fn rollback(self) {}
}

fn sorted_lots(state: &LedgerState, product_id: Uuid) -> Vec<StockLot> {
    let mut lots: Vec<StockLot> = state
        .lots
        .values()
        .filter(|lot| lot.product_id == product_id)
        .cloned()
        .collect();
    lots.sort_by_key(StockLot::fifo_key);
    lots
}

#[async_trait]
impl StockLedger for InMemoryLedgerTx {
    async fn lock_product(&mut self, _product_id: Uuid) -> Result<()> {
        // The whole store is already held exclusively by this handle.
        Ok(())
    }

    async fn fallback_unit_cost(&mut self, product_id: Uuid) -> Result<Decimal> {
        self.working
            .fallback_costs
            .get(&product_id)
            .copied()
            .ok_or_else(|| InventoryError::not_found("product", product_id))
    }

    async fn insert_lot(&mut self, lot: NewStockLot) -> Result<StockLot> {
        lot.validate()?;
        self.working.lot_sequence += 1;
        let stored = StockLot {
            id: Uuid::new_v4(),
            sequence: self.working.lot_sequence,
            product_id: lot.product_id,
            source: lot.source,
            source_ref: lot.source_ref,
            lot_date: lot.lot_date,
            unit_cost: lot.unit_cost,
            initial_quantity: lot.quantity,
            remaining_quantity: lot.quantity,
            warehouse_id: lot.warehouse_id,
            created_at: Utc::now(),
        };
        self.working.lots.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn lot(&mut self, lot_id: Uuid) -> Result<Option<StockLot>> {
        Ok(self.working.lots.get(&lot_id).cloned())
    }

    async fn lots_for_product(&mut self, product_id: Uuid) -> Result<Vec<StockLot>> {
        Ok(sorted_lots(&self.working, product_id))
    }

    async fn available_lots(
        &mut self,
        product_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<StockLot>> {
        Ok(sorted_lots(&self.working, product_id)
            .into_iter()
            .filter(|lot| lot.remaining_quantity > Decimal::ZERO && lot.lot_date <= as_of)
            .collect())
    }

    async fn adjust_lot_remaining(&mut self, lot_id: Uuid, delta: Decimal) -> Result<StockLot> {
        let lot = self.working.lot_mut(lot_id)?;
        lot.apply_delta(delta)?;
        Ok(lot.clone())
    }

    async fn set_lot_remaining(&mut self, lot_id: Uuid, remaining: Decimal) -> Result<()> {
        self.working.lot_mut(lot_id)?.reset_remaining(remaining)
    }

    async fn delete_lot(&mut self, lot_id: Uuid) -> Result<()> {
        if self.working.consumptions.iter().any(|c| c.lot_id == lot_id) {
            return Err(InventoryError::InvariantViolation(format!(
                "lot {lot_id} still has consumptions"
            )));
        }
        self.working
            .lots
            .remove(&lot_id)
            .map(|_| ())
            .ok_or_else(|| InventoryError::not_found("stock lot", lot_id))
    }

    async fn insert_consumption(&mut self, consumption: LotConsumption) -> Result<()> {
        if !self.working.lots.contains_key(&consumption.lot_id) {
            return Err(InventoryError::not_found("stock lot", consumption.lot_id));
        }
        if !self.working.lines.contains_key(&consumption.line) {
            return Err(InventoryError::not_found(
                "consuming line",
                consumption.line.id,
            ));
        }
        self.working.consumptions.push(consumption);
        Ok(())
    }

    async fn consumptions_for_line(&mut self, line: LineRef) -> Result<Vec<LotConsumption>> {
        Ok(self
            .working
            .consumptions
            .iter()
            .filter(|c| c.line == line)
            .cloned()
            .collect())
    }

    async fn consumptions_for_lot(&mut self, lot_id: Uuid) -> Result<Vec<LotConsumption>> {
        Ok(self
            .working
            .consumptions
            .iter()
            .filter(|c| c.lot_id == lot_id)
            .cloned()
            .collect())
    }

    async fn delete_consumptions_for_line(&mut self, line: LineRef) -> Result<u64> {
        let before = self.working.consumptions.len();
        self.working.consumptions.retain(|c| c.line != line);
        Ok((before - self.working.consumptions.len()) as u64)
    }

    async fn consumption_history(&mut self, product_id: Uuid) -> Result<Vec<DatedConsumption>> {
        let state = &self.working;
        state
            .consumptions
            .iter()
            .filter(|c| {
                state
                    .lots
                    .get(&c.lot_id)
                    .is_some_and(|lot| lot.product_id == product_id)
            })
            .map(|c| -> Result<DatedConsumption> {
                let line = state
                    .lines
                    .get(&c.line)
                    .ok_or_else(|| InventoryError::not_found("consuming line", c.line.id))?;
                Ok(DatedConsumption {
                    consumption: c.clone(),
                    transaction_date: line.transaction_date,
                })
            })
            .collect()
    }

    async fn insert_line(&mut self, line: NewConsumingLine) -> Result<ConsumingLine> {
        if line.quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(line.quantity));
        }
        let key = LineRef {
            kind: line.kind,
            id: line.id,
        };
        if self.working.lines.contains_key(&key) {
            return Err(InventoryError::Validation(format!(
                "line {key} already exists"
            )));
        }
        self.working.line_sequence += 1;
        let stored = ConsumingLine {
            id: line.id,
            kind: line.kind,
            product_id: line.product_id,
            document_id: line.document_id,
            transaction_date: line.transaction_date,
            sequence: self.working.line_sequence,
            quantity: line.quantity,
            cogs: Decimal::ZERO,
        };
        self.working.lines.insert(key, stored.clone());
        Ok(stored)
    }

    async fn line(&mut self, line: LineRef) -> Result<Option<ConsumingLine>> {
        Ok(self.working.lines.get(&line).cloned())
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
        let stored = self.working.line_mut(line)?;
        stored.quantity = quantity;
        stored.transaction_date = transaction_date;
        Ok(stored.clone())
    }

    async fn delete_line(&mut self, line: LineRef) -> Result<()> {
        if self.working.consumptions.iter().any(|c| c.line == line) {
            return Err(InventoryError::InvariantViolation(format!(
                "line {line} still has consumptions"
            )));
        }
        self.working
            .lines
            .remove(&line)
            .map(|_| ())
            .ok_or_else(|| InventoryError::not_found("consuming line", line.id))
    }

    async fn set_line_cogs(&mut self, line: LineRef, cogs: Decimal) -> Result<()> {
        self.working.line_mut(line)?.cogs = cogs;
        Ok(())
    }

    async fn lines_from(
        &mut self,
        product_id: Uuid,
        from: NaiveDate,
    ) -> Result<Vec<ConsumingLine>> {
        let mut lines: Vec<ConsumingLine> = self
            .working
            .lines
            .values()
            .filter(|line| line.product_id == product_id && line.transaction_date >= from)
            .cloned()
            .collect();
        lines.sort_by_key(ConsumingLine::replay_key);
        Ok(lines)
    }

    async fn latest_line_date(&mut self, product_id: Uuid) -> Result<Option<NaiveDate>> {
        Ok(self
            .working
            .lines
            .values()
            .filter(|line| line.product_id == product_id)
            .map(|line| line.transaction_date)
            .max())
    }

    async fn append_audit(&mut self, entry: CostAuditLog) -> Result<()> {
        self.working.audit.push(entry);
        Ok(())
    }

    async fn audit_for_product(&mut self, product_id: Uuid) -> Result<Vec<CostAuditLog>> {
        Ok(self
            .working
            .audit
            .iter()
            .filter(|entry| entry.product_id == product_id)
            .cloned()
            .collect())
    }
}
