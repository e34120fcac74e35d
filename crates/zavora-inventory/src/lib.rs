pub mod documents;
pub mod fifo;
pub mod position;
pub mod recalculation;

pub use documents::{
    CreditNoteLine, DocumentOutcome, LotReceipt, LotRevision, delete_line, edit_line,
    issue_debit_note, receive_purchase, record_credit_note, record_opening_stock, record_sale,
    remove_lot_source, revise_lot,
};
pub use fifo::{
    ConsumptionPlan, ConsumptionResult, PlannedDraw, RestoreSummary, calculate, consume,
    plan_consumption, restore,
};
pub use position::{InventoryPosition, stock_position};
pub use recalculation::{
    DEFAULT_REASON, LineReplay, RecalculationSummary, has_lines_on_or_after, is_backdated,
    recalculate_from_date, reset_quantities,
};
