pub mod cutoff;
pub mod error;
pub mod models;
pub mod storage;

pub use cutoff::{Cutoff, CutoffSide};
pub use error::{InventoryError, Result};
pub use models::{
    COST_DP, ConsumingLine, CostAuditLog, DatedConsumption, LineKind, LineRef, LotConsumption,
    LotSource, NewStockLot, StockLot, round_cost,
};
pub use storage::{NewConsumingLine, StockLedger};
