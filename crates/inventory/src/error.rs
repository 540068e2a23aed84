use common::ProductId;
use thiserror::Error;

/// Errors returned by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Quantity was zero, negative or out of range.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: i64 },

    /// No inventory record exists for the product.
    #[error("Inventory not found for product {0}")]
    NotFound(ProductId),

    /// Not enough unreserved stock to satisfy a reservation.
    #[error("Not enough stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Release asked for more than is currently reserved.
    #[error(
        "Cannot release more than reserved for product {product_id}: requested {requested}, reserved {reserved}"
    )]
    OverRelease {
        product_id: ProductId,
        requested: u32,
        reserved: u32,
    },

    /// Restock would leave reserved above stock.
    #[error("Stock {stock} is below the reserved quantity {reserved} for product {product_id}")]
    StockBelowReserved {
        product_id: ProductId,
        stock: u32,
        reserved: u32,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
