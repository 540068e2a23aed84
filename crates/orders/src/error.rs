use common::{OrderId, ProductId};
use inventory::LedgerError;
use thiserror::Error;

use crate::OrderStatus;

/// Errors from the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Order already exists: {0}")]
    Duplicate(OrderId),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Request failed basic validation.
    #[error("{0}")]
    InvalidInput(String),

    /// A line failed the catalog pre-check.
    #[error("Product validation failed for {product_id}: {reason}")]
    ProductValidationFailed {
        product_id: ProductId,
        reason: &'static str,
    },

    /// The binding reservation of a line failed; nothing was kept.
    #[error("Could not reserve product {product_id}: {source}")]
    Reservation {
        product_id: ProductId,
        #[source]
        source: LedgerError,
    },

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The actor is neither the owner nor an administrator.
    #[error("Forbidden")]
    Forbidden,

    #[error("Order already cancelled")]
    AlreadyCancelled(OrderId),

    #[error("Cannot move order {order_id} from {from} to {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Inventory ledger failure outside of reservation.
    #[error("Inventory error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Label used for failure metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::InvalidInput(_) => "invalid_input",
            OrderError::ProductValidationFailed { .. } => "product_validation",
            OrderError::Reservation { .. } => "reservation",
            OrderError::NotFound(_) => "not_found",
            OrderError::Forbidden => "forbidden",
            OrderError::AlreadyCancelled(_) => "already_cancelled",
            OrderError::InvalidTransition { .. } => "invalid_transition",
            OrderError::Ledger(_) => "ledger",
            OrderError::Store(_) => "store",
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
