//! Runs against a live Postgres when `DATABASE_URL` is set and is skipped
//! otherwise. Every test rolls its unit of work back.

use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;
use zavora_core::{
    InventoryError, LineKind, LotSource, NewConsumingLine, NewStockLot, StockLedger,
};
use zavora_inventory::{DEFAULT_REASON, edit_line, recalculate_from_date, record_sale};
use zavora_platform::{PgStockLedger, apply_schema, connect_database};

static SCHEMA: OnceCell<()> = OnceCell::const_new();

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = connect_database(&database_url).await.expect("connect");
    SCHEMA
        .get_or_try_init(|| apply_schema(&pool))
        .await
        .expect("schema");
    Some(pool)
}

async fn product(pool: &PgPool, cost: Decimal) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO products (id, name, cost) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(format!("test product {id}"))
        .bind(cost)
        .execute(pool)
        .await
        .expect("product");
    id
}

fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).expect("valid date")
}

fn purchase(
    product_id: Uuid,
    lot_date: NaiveDate,
    quantity: Decimal,
    unit_cost: Decimal,
) -> NewStockLot {
    NewStockLot {
        product_id,
        source: LotSource::Purchase,
        source_ref: Uuid::new_v4(),
        lot_date,
        unit_cost,
        quantity,
        warehouse_id: None,
    }
}

fn sale(
    product_id: Uuid,
    document_id: Uuid,
    transaction_date: NaiveDate,
    quantity: Decimal,
) -> NewConsumingLine {
    NewConsumingLine {
        id: Uuid::new_v4(),
        kind: LineKind::Sale,
        product_id,
        document_id,
        transaction_date,
        quantity,
    }
}

async fn begin(pool: &PgPool) -> PgStockLedger {
    PgStockLedger::begin(pool, Duration::from_secs(30))
        .await
        .expect("begin")
}

#[tokio::test]
async fn test_lot_bounds_are_enforced_by_the_database() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let product_id = product(&pool, dec!(8)).await;
    let mut ledger = begin(&pool).await;
    ledger.lock_product(product_id).await.expect("lock");

    let lot = ledger
        .insert_lot(purchase(product_id, date(1, 1), dec!(10), dec!(5)))
        .await
        .expect("lot");
    let drawn = ledger
        .adjust_lot_remaining(lot.id, dec!(-4))
        .await
        .expect("draw");
    assert_eq!(drawn.remaining_quantity, dec!(6));

    let below = ledger
        .adjust_lot_remaining(lot.id, dec!(-7))
        .await
        .expect_err("below zero");
    assert!(matches!(below, InventoryError::InvariantViolation(_)));
    let above = ledger
        .adjust_lot_remaining(lot.id, dec!(5))
        .await
        .expect_err("above initial");
    assert!(matches!(above, InventoryError::InvariantViolation(_)));

    let stored = ledger.lot(lot.id).await.expect("read").expect("lot");
    assert_eq!(stored.remaining_quantity, dec!(6));
    ledger.rollback().await.expect("rollback");
}

#[tokio::test]
async fn test_fractional_quantities_and_costs_are_stored_exactly() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let product_id = product(&pool, dec!(8)).await;
    let mut ledger = begin(&pool).await;

    let lot = ledger
        .insert_lot(purchase(product_id, date(1, 1), dec!(2.123456), dec!(3.3333333333)))
        .await
        .expect("lot");
    let stored = ledger.lot(lot.id).await.expect("read").expect("lot");
    assert_eq!(stored.initial_quantity, dec!(2.123456));
    assert_eq!(stored.unit_cost, dec!(3.3333333333));

    let line = ledger
        .insert_line(sale(product_id, Uuid::new_v4(), date(1, 5), dec!(0.00001)))
        .await
        .expect("line");
    assert_eq!(line.quantity, dec!(0.00001));
    ledger.rollback().await.expect("rollback");
}

#[tokio::test]
async fn test_editing_one_line_keeps_its_document_siblings_in_place() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let product_a = product(&pool, dec!(8)).await;
    let product_b = product(&pool, dec!(8)).await;
    let mut ledger = begin(&pool).await;
    ledger
        .insert_lot(purchase(product_a, date(1, 1), dec!(10), dec!(5)))
        .await
        .expect("lot A");
    ledger
        .insert_lot(purchase(product_b, date(1, 1), dec!(10), dec!(7)))
        .await
        .expect("lot B");

    let document_id = Uuid::new_v4();
    let posted = record_sale(
        &mut ledger,
        vec![
            sale(product_a, document_id, date(1, 10), dec!(4)),
            sale(product_b, document_id, date(1, 10), dec!(3)),
        ],
        None,
    )
    .await
    .expect("invoice");
    let (a, b) = (posted.lines[0].line_ref(), posted.lines[1].line_ref());

    edit_line(&mut ledger, a, dec!(4), date(1, 3), None)
        .await
        .expect("edit");
    let moved = ledger.line(a).await.expect("read").expect("line A");
    let sibling = ledger.line(b).await.expect("read").expect("line B");
    assert_eq!(moved.transaction_date, date(1, 3));
    assert_eq!(sibling.transaction_date, date(1, 10));
    assert_eq!(sibling.cogs, dec!(21));
    let latest = ledger.latest_line_date(product_b).await.expect("latest");
    assert_eq!(latest, Some(date(1, 10)));

    let summary = recalculate_from_date(&mut ledger, product_b, date(1, 1), DEFAULT_REASON, None)
        .await
        .expect("replay B");
    assert_eq!(summary.replayed.len(), 1);
    assert_eq!(summary.replayed[0].new_cogs, dec!(21));
    assert_eq!(summary.audit_entries, 0);

    let history = ledger.consumption_history(product_b).await.expect("history");
    assert!(history.iter().all(|row| row.transaction_date == date(1, 10)));
    ledger.rollback().await.expect("rollback");
}
