use common::PaymentId;
use orders::OrderError;
use thiserror::Error;

use crate::PaymentStatus;

#[derive(Debug, Error)]
pub enum PaymentStoreError {
    #[error("Payment already exists: {0}")]
    Duplicate(PaymentId),

    #[error("Payment not found: {0}")]
    NotFound(PaymentId),
}

/// Errors from payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid order ID or amount")]
    InvalidInput,

    /// The order does not exist or is not visible to the payer.
    #[error("Order not found")]
    OrderNotFound,

    #[error("Payment not found")]
    NotFound(PaymentId),

    #[error("Forbidden")]
    Forbidden,

    #[error("Only completed payments can be refunded")]
    InvalidState {
        payment_id: PaymentId,
        status: PaymentStatus,
    },

    /// Order lookup failed for a reason other than absence.
    #[error("Order service error: {0}")]
    Order(OrderError),

    #[error("Store error: {0}")]
    Store(#[from] PaymentStoreError),
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
