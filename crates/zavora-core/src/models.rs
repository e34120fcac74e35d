use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InventoryError, Result};

/// Decimal places used for every persisted cost figure.
pub const COST_DP: u32 = 2;

pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp(COST_DP)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotSource {
    Purchase,
    OpeningStock,
    CreditNote,
}

impl LotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::OpeningStock => "OPENING_STOCK",
            Self::CreditNote => "CREDIT_NOTE",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PURCHASE" => Ok(Self::Purchase),
            "OPENING_STOCK" => Ok(Self::OpeningStock),
            "CREDIT_NOTE" => Ok(Self::CreditNote),
            other => Err(InventoryError::Validation(format!(
                "unsupported lot source: {other}"
            ))),
        }
    }
}

/// A dated batch of inbound stock. `lot_date` drives FIFO order, `sequence`
/// breaks ties between lots received on the same day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockLot {
    pub id: Uuid,
    pub sequence: i64,
    pub product_id: Uuid,
    pub source: LotSource,
    pub source_ref: Uuid,
    pub lot_date: NaiveDate,
    pub unit_cost: Decimal,
    pub initial_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub warehouse_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl StockLot {
    pub fn fifo_key(&self) -> (NaiveDate, i64) {
        (self.lot_date, self.sequence)
    }

    pub fn consumed_quantity(&self) -> Decimal {
        self.initial_quantity - self.remaining_quantity
    }

    /// Moves `remaining_quantity` by `delta`, refusing to leave the
    /// `0..=initial_quantity` range.
    pub fn apply_delta(&mut self, delta: Decimal) -> Result<()> {
        let next = self.remaining_quantity + delta;
        if next < Decimal::ZERO {
            return Err(InventoryError::InvariantViolation(format!(
                "lot {} would go negative: remaining {} + delta {}",
                self.id, self.remaining_quantity, delta
            )));
        }
        if next > self.initial_quantity {
            return Err(InventoryError::InvariantViolation(format!(
                "lot {} would exceed its initial quantity {}: remaining {} + delta {}",
                self.id, self.initial_quantity, self.remaining_quantity, delta
            )));
        }
        self.remaining_quantity = next;
        Ok(())
    }

    /// Overwrites `remaining_quantity` during a recalculation reset.
    pub fn reset_remaining(&mut self, remaining: Decimal) -> Result<()> {
        if remaining < Decimal::ZERO || remaining > self.initial_quantity {
            return Err(InventoryError::InvariantViolation(format!(
                "lot {} cannot be reset to {} (initial {})",
                self.id, remaining, self.initial_quantity
            )));
        }
        self.remaining_quantity = remaining;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockLot {
    pub product_id: Uuid,
    pub source: LotSource,
    pub source_ref: Uuid,
    pub lot_date: NaiveDate,
    pub unit_cost: Decimal,
    pub quantity: Decimal,
    pub warehouse_id: Option<Uuid>,
}

impl NewStockLot {
    pub fn validate(&self) -> Result<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(InventoryError::InvalidQuantity(self.quantity));
        }
        if self.unit_cost < Decimal::ZERO {
            return Err(InventoryError::Validation(format!(
                "unit cost must not be negative, got {}",
                self.unit_cost
            )));
        }
        Ok(())
    }
}

/// Which kind of outbound document a line belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineKind {
    Sale,
    PurchaseReturn,
}

impl LineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::PurchaseReturn => "PURCHASE_RETURN",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SALE" => Ok(Self::Sale),
            "PURCHASE_RETURN" => Ok(Self::PurchaseReturn),
            other => Err(InventoryError::Validation(format!(
                "unsupported line kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRef {
    pub kind: LineKind,
    pub id: Uuid,
}

impl LineRef {
    pub fn sale(id: Uuid) -> Self {
        Self {
            kind: LineKind::Sale,
            id,
        }
    }

    pub fn purchase_return(id: Uuid) -> Self {
        Self {
            kind: LineKind::PurchaseReturn,
            id,
        }
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// A sale line or purchase-return line as seen by the costing engine. The
/// owning document lives outside this crate; only its date and the line's
/// stored COGS matter here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumingLine {
    pub id: Uuid,
    pub kind: LineKind,
    pub product_id: Uuid,
    pub document_id: Uuid,
    pub transaction_date: NaiveDate,
    pub sequence: i64,
    pub quantity: Decimal,
    pub cogs: Decimal,
}

impl ConsumingLine {
    pub fn line_ref(&self) -> LineRef {
        LineRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn replay_key(&self) -> (NaiveDate, i64) {
        (self.transaction_date, self.sequence)
    }
}

/// Edge between a lot and the outbound line that drew from it. Sale lines
/// produce `StockLotConsumption` rows, purchase returns produce
/// `DebitNoteLotConsumption` rows; both share this shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LotConsumption {
    pub id: Uuid,
    pub lot_id: Uuid,
    pub line: LineRef,
    pub quantity_consumed: Decimal,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LotConsumption {
    pub fn new(lot_id: Uuid, line: LineRef, quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            lot_id,
            line,
            quantity_consumed: quantity,
            unit_cost,
            total_cost: round_cost(quantity * unit_cost),
            created_at: Utc::now(),
        }
    }
}

/// A historical consumption joined to the date of the line that made it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedConsumption {
    pub consumption: LotConsumption,
    pub transaction_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostAuditLog {
    pub id: Uuid,
    pub product_id: Uuid,
    pub line: LineRef,
    pub old_cogs: Decimal,
    pub new_cogs: Decimal,
    pub delta: Decimal,
    pub reason: String,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CostAuditLog {
    pub fn record(
        product_id: Uuid,
        line: LineRef,
        old_cogs: Decimal,
        new_cogs: Decimal,
        reason: &str,
        actor: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            line,
            old_cogs,
            new_cogs,
            delta: new_cogs - old_cogs,
            reason: reason.to_string(),
            actor: actor.map(str::to_string),
            created_at: Utc::now(),
        }
    }
}
