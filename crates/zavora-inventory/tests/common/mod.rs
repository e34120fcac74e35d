#![allow(dead_code)]

use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;
use zavora_core::{LineKind, LotSource, NewConsumingLine, NewStockLot};
use zavora_lotstore::InMemoryLotStore;

pub fn date(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, month, day).expect("valid date")
}

pub async fn store_with_product(fallback_cost: Decimal) -> (InMemoryLotStore, Uuid) {
    let store = InMemoryLotStore::new();
    let product_id = Uuid::new_v4();
    store.set_fallback_cost(product_id, fallback_cost).await;
    (store, product_id)
}

pub fn purchase(
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

pub fn sale(product_id: Uuid, transaction_date: NaiveDate, quantity: Decimal) -> NewConsumingLine {
    outbound(LineKind::Sale, product_id, transaction_date, quantity)
}

pub fn debit(product_id: Uuid, transaction_date: NaiveDate, quantity: Decimal) -> NewConsumingLine {
    outbound(LineKind::PurchaseReturn, product_id, transaction_date, quantity)
}

fn outbound(
    kind: LineKind,
    product_id: Uuid,
    transaction_date: NaiveDate,
    quantity: Decimal,
) -> NewConsumingLine {
    NewConsumingLine {
        id: Uuid::new_v4(),
        kind,
        product_id,
        document_id: Uuid::new_v4(),
        transaction_date,
        quantity,
    }
}
