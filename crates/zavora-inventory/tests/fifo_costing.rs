mod common;

use common::{date, debit, purchase, sale, store_with_product};
use rust_decimal_macros::dec;
use uuid::Uuid;
use zavora_core::{InventoryError, LineRef, StockLedger};
use zavora_inventory::{
    calculate, consume, issue_debit_note, receive_purchase, record_sale, stock_position,
};

#[tokio::test]
async fn test_consumption_draws_oldest_lots_first() {
    let (store, product_id) = store_with_product(dec!(10)).await;
    let mut tx = store.begin().await;

    let first = tx
        .insert_lot(purchase(product_id, date(1, 1), dec!(10), dec!(5)))
        .await
        .expect("lot 1");
    let second = tx
        .insert_lot(purchase(product_id, date(1, 2), dec!(8), dec!(6)))
        .await
        .expect("lot 2");
    let third = tx
        .insert_lot(purchase(product_id, date(1, 3), dec!(6), dec!(7)))
        .await
        .expect("lot 3");

    let line = tx
        .insert_line(sale(product_id, date(1, 10), dec!(14)))
        .await
        .expect("line")
        .line_ref();
    let result = consume(&mut tx, product_id, dec!(14), line, date(1, 10))
        .await
        .expect("consume");

    assert_eq!(result.draws.len(), 2);
    assert_eq!(result.draws[0].lot_id, first.id);
    assert_eq!(result.draws[0].quantity, dec!(10));
    assert_eq!(result.draws[0].unit_cost, dec!(5));
    assert_eq!(result.draws[1].lot_id, second.id);
    assert_eq!(result.draws[1].quantity, dec!(4));
    assert_eq!(result.draws[1].unit_cost, dec!(6));
    assert_eq!(result.total_cogs, dec!(74));
    assert!(!result.used_fallback_cost);

    let untouched = tx.lot(third.id).await.expect("read").expect("lot 3");
    assert_eq!(untouched.remaining_quantity, dec!(6));
    let rows = tx.consumptions_for_line(line).await.expect("rows");
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_calculate_is_read_only() {
    let (store, product_id) = store_with_product(dec!(10)).await;
    let mut tx = store.begin().await;
    let lot = tx
        .insert_lot(purchase(product_id, date(1, 1), dec!(3), dec!(5)))
        .await
        .expect("lot");

    let plan = calculate(&mut tx, product_id, dec!(5), date(1, 2))
        .await
        .expect("plan");

    assert_eq!(plan.available_quantity, dec!(3));
    assert_eq!(plan.shortfall, dec!(2));
    assert!(plan.insufficient_stock);
    assert_eq!(plan.total_cost, dec!(15));
    let unchanged = tx.lot(lot.id).await.expect("read").expect("lot");
    assert_eq!(unchanged.remaining_quantity, dec!(3));
}

#[tokio::test]
async fn test_lots_dated_after_the_sale_are_not_eligible() {
    let (store, product_id) = store_with_product(dec!(9)).await;
    let mut tx = store.begin().await;
    tx.insert_lot(purchase(product_id, date(1, 1), dec!(2), dec!(5)))
        .await
        .expect("early lot");
    let late = tx
        .insert_lot(purchase(product_id, date(1, 20), dec!(50), dec!(5)))
        .await
        .expect("late lot");

    let line = tx
        .insert_line(sale(product_id, date(1, 10), dec!(5)))
        .await
        .expect("line")
        .line_ref();
    let result = consume(&mut tx, product_id, dec!(5), line, date(1, 10))
        .await
        .expect("consume");

    assert!(result.insufficient_stock);
    assert_eq!(result.shortfall, dec!(3));
    assert_eq!(result.total_cogs, dec!(10) + dec!(27));
    let late = tx.lot(late.id).await.expect("read").expect("late lot");
    assert_eq!(late.remaining_quantity, dec!(50));
}

#[tokio::test]
async fn test_sale_without_stock_is_costed_at_fallback() {
    let (store, product_id) = store_with_product(dec!(100.00)).await;
    let mut tx = store.begin().await;

    let outcome = record_sale(&mut tx, vec![sale(product_id, date(2, 1), dec!(3))], None)
        .await
        .expect("sale");

    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.lines[0].cogs, dec!(300.00));
    assert!(outcome.recalculations.is_empty());

    let line = outcome.lines[0].line_ref();
    assert!(tx.consumptions_for_line(line).await.expect("rows").is_empty());
}

#[tokio::test]
async fn test_warnings_accumulate_across_document_lines() {
    let (store, product_id) = store_with_product(dec!(1)).await;
    let other_product = Uuid::new_v4();
    store.set_fallback_cost(other_product, dec!(2)).await;
    let mut tx = store.begin().await;
    tx.insert_lot(purchase(product_id, date(1, 1), dec!(1), dec!(5)))
        .await
        .expect("lot");

    let outcome = record_sale(
        &mut tx,
        vec![
            sale(product_id, date(2, 1), dec!(4)),
            sale(other_product, date(2, 1), dec!(1)),
        ],
        None,
    )
    .await
    .expect("sale");

    assert_eq!(outcome.lines.len(), 2);
    assert_eq!(outcome.warnings.len(), 2);
    assert_eq!(outcome.lines[0].cogs, dec!(8));
    assert_eq!(outcome.lines[1].cogs, dec!(2));
}

#[tokio::test]
async fn test_debit_note_beyond_stock_is_rejected_without_mutation() {
    let (store, product_id) = store_with_product(dec!(10)).await;
    let mut tx = store.begin().await;
    let receipt = receive_purchase(
        &mut tx,
        purchase(product_id, date(1, 1), dec!(2), dec!(5)),
        None,
    )
    .await
    .expect("purchase");
    tx.commit();

    let mut tx = store.begin().await;
    let err = issue_debit_note(&mut tx, vec![debit(product_id, date(1, 10), dec!(5))], None)
        .await
        .unwrap_err();

    match &err {
        InventoryError::InsufficientStock {
            available,
            shortfall,
            ..
        } => {
            assert_eq!(*available, dec!(2));
            assert_eq!(*shortfall, dec!(3));
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("available 2"));
    assert!(message.contains("shortfall 3"));

    let lot = tx.lot(receipt.lot.id).await.expect("read").expect("lot");
    assert_eq!(lot.remaining_quantity, dec!(2));
    tx.rollback();

    let lots = store.lots(product_id).await;
    assert_eq!(lots[0].remaining_quantity, dec!(2));
    assert!(store.consumptions().await.is_empty());
}

#[tokio::test]
async fn test_debit_note_within_stock_consumes_like_a_sale() {
    let (store, product_id) = store_with_product(dec!(10)).await;
    let mut tx = store.begin().await;
    tx.insert_lot(purchase(product_id, date(1, 1), dec!(5), dec!(4)))
        .await
        .expect("lot");

    let outcome = issue_debit_note(&mut tx, vec![debit(product_id, date(1, 3), dec!(2))], None)
        .await
        .expect("debit note");

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.lines[0].cogs, dec!(8));
    let rows = tx
        .consumptions_for_line(LineRef::purchase_return(outcome.lines[0].id))
        .await
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity_consumed, dec!(2));

    let position = stock_position(&mut tx, product_id).await.expect("position");
    assert_eq!(position.quantity_on_hand, dec!(3));
    assert_eq!(position.inventory_value, dec!(12));
}

#[tokio::test]
async fn test_mixed_document_kinds_are_rejected() {
    let (store, product_id) = store_with_product(dec!(10)).await;
    let mut tx = store.begin().await;

    let err = record_sale(&mut tx, vec![debit(product_id, date(1, 3), dec!(2))], None)
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::Validation(_)));
    assert!(tx.latest_line_date(product_id).await.expect("latest").is_none());
}
