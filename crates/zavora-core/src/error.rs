use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}, shortfall {shortfall}"
    )]
    InsufficientStock {
        product_id: Uuid,
        requested: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("inventory invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InventoryError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn storage<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Storage(err.into())
    }
}
