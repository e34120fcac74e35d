pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_ledger;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    RECALCULATE_CHANNEL, RECALCULATED_CHANNEL, RECALCULATION_FAILED_CHANNEL,
    RecalculationCompleted, RecalculationFailed, RecalculationRequested,
};
pub use db::{apply_schema, connect_database};
pub use pg_ledger::PgStockLedger;
pub use redis_bus::RedisBus;
