use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zavora_core::{Result, StockLedger, StockLot, round_cost};

/// On-hand stock of one product valued at the cost of the lots still
/// holding it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InventoryPosition {
    pub product_id: Uuid,
    pub open_lots: usize,
    pub quantity_on_hand: Decimal,
    pub inventory_value: Decimal,
    pub average_cost: Decimal,
}

impl InventoryPosition {
    pub fn from_lots(product_id: Uuid, lots: &[StockLot]) -> Self {
        let open: Vec<&StockLot> = lots
            .iter()
            .filter(|lot| lot.product_id == product_id && lot.remaining_quantity > Decimal::ZERO)
            .collect();

        let quantity_on_hand: Decimal = open.iter().map(|lot| lot.remaining_quantity).sum();
        let inventory_value: Decimal = open
            .iter()
            .map(|lot| lot.remaining_quantity * lot.unit_cost)
            .sum();

        let average_cost = if quantity_on_hand.is_zero() {
            Decimal::ZERO
        } else {
            (inventory_value / quantity_on_hand).round_dp(4)
        };

        Self {
            product_id,
            open_lots: open.len(),
            quantity_on_hand,
            inventory_value: round_cost(inventory_value),
            average_cost,
        }
    }
}

pub async fn stock_position<L>(ledger: &mut L, product_id: Uuid) -> Result<InventoryPosition>
where
    L: StockLedger + ?Sized,
{
    let lots = ledger.lots_for_product(product_id).await?;
    Ok(InventoryPosition::from_lots(product_id, &lots))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use zavora_core::LotSource;

    use super::*;

    #[test]
    fn test_position_values_remaining_lots() {
        let product_id = Uuid::new_v4();
        let make = |remaining: Decimal, cost: Decimal| StockLot {
            id: Uuid::new_v4(),
            sequence: 1,
            product_id,
            source: LotSource::Purchase,
            source_ref: Uuid::new_v4(),
            lot_date: NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date"),
            unit_cost: cost,
            initial_quantity: dec!(10),
            remaining_quantity: remaining,
            warehouse_id: None,
            created_at: Utc::now(),
        };
        let lots = vec![make(dec!(2), dec!(5)), make(dec!(4), dec!(8)), make(dec!(0), dec!(99))];

        let position = InventoryPosition::from_lots(product_id, &lots);
        assert_eq!(position.open_lots, 2);
        assert_eq!(position.quantity_on_hand, dec!(6));
        assert_eq!(position.inventory_value, dec!(42));
        assert_eq!(position.average_cost, dec!(7));
    }

    #[test]
    fn test_empty_position_has_zero_cost() {
        let position = InventoryPosition::from_lots(Uuid::new_v4(), &[]);
        assert!(position.quantity_on_hand.is_zero());
        assert!(position.average_cost.is_zero());
    }
}
