use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ConsumingLine, CostAuditLog, DatedConsumption, LineKind, LineRef, LotConsumption,
    NewStockLot, StockLot,
};

/// Outbound line as written by the owning document before it is costed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConsumingLine {
    pub id: Uuid,
    pub kind: LineKind,
    pub product_id: Uuid,
    pub document_id: Uuid,
    pub transaction_date: NaiveDate,
    pub quantity: Decimal,
}

/// One open unit of work against the stock ledger. Every write made through
/// a handle becomes visible atomically when the host commits it, and none of
/// them survive if the handle is rolled back or dropped.
///
/// Lot and line listings are returned in FIFO/replay order: ascending date,
/// then ascending `sequence`.
#[async_trait]
pub trait StockLedger: Send {
    /// Serializes costing work on one product until the unit of work ends.
    async fn lock_product(&mut self, product_id: Uuid) -> Result<()>;

    /// The product's maintained default cost, used to value shortfalls.
    async fn fallback_unit_cost(&mut self, product_id: Uuid) -> Result<Decimal>;

    async fn insert_lot(&mut self, lot: NewStockLot) -> Result<StockLot>;
    async fn lot(&mut self, lot_id: Uuid) -> Result<Option<StockLot>>;
    async fn lots_for_product(&mut self, product_id: Uuid) -> Result<Vec<StockLot>>;

    /// Lots with stock left and `lot_date <= as_of`.
    async fn available_lots(&mut self, product_id: Uuid, as_of: NaiveDate)
    -> Result<Vec<StockLot>>;

    /// Atomically moves a lot's remaining quantity by `delta`. Fails with
    /// `InvariantViolation` instead of clamping when the result would leave
    /// `0..=initial_quantity`.
    async fn adjust_lot_remaining(&mut self, lot_id: Uuid, delta: Decimal) -> Result<StockLot>;
    async fn set_lot_remaining(&mut self, lot_id: Uuid, remaining: Decimal) -> Result<()>;
    async fn delete_lot(&mut self, lot_id: Uuid) -> Result<()>;

    async fn insert_consumption(&mut self, consumption: LotConsumption) -> Result<()>;
    async fn consumptions_for_line(&mut self, line: LineRef) -> Result<Vec<LotConsumption>>;
    async fn consumptions_for_lot(&mut self, lot_id: Uuid) -> Result<Vec<LotConsumption>>;
    async fn delete_consumptions_for_line(&mut self, line: LineRef) -> Result<u64>;

    /// Every sale and purchase-return consumption against the product's
    /// lots, each joined to its line's transaction date.
    async fn consumption_history(&mut self, product_id: Uuid) -> Result<Vec<DatedConsumption>>;

    async fn insert_line(&mut self, line: NewConsumingLine) -> Result<ConsumingLine>;
    async fn line(&mut self, line: LineRef) -> Result<Option<ConsumingLine>>;
    /// Changes one line's quantity and date. Other lines on the same
    /// document keep theirs.
    async fn update_line(
        &mut self,
        line: LineRef,
        quantity: Decimal,
        transaction_date: NaiveDate,
    ) -> Result<ConsumingLine>;
    async fn delete_line(&mut self, line: LineRef) -> Result<()>;
    async fn set_line_cogs(&mut self, line: LineRef, cogs: Decimal) -> Result<()>;

    /// Sale and purchase-return lines for the product dated on or after `from`.
    async fn lines_from(&mut self, product_id: Uuid, from: NaiveDate)
    -> Result<Vec<ConsumingLine>>;
    async fn latest_line_date(&mut self, product_id: Uuid) -> Result<Option<NaiveDate>>;

    async fn append_audit(&mut self, entry: CostAuditLog) -> Result<()>;
    async fn audit_for_product(&mut self, product_id: Uuid) -> Result<Vec<CostAuditLog>>;
}
