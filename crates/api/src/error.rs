//! API error types with HTTP response mapping.
//!
//! Every failure leaves the server as `{"error": <message>}`, extended with
//! `details` for validation failures and `available` / `reserved` for ledger
//! conflicts.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::LedgerError;
use orders::OrderError;
use payments::PaymentError;
use serde_json::{Map, Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or rejected credentials.
    Unauthorized(&'static str),
    Forbidden(&'static str),
    BadRequest(String),
    NotFound(&'static str),
    TooManyRequests,
    Ledger(LedgerError),
    Order(OrderError),
    Payment(PaymentError),
}

/// Status, message and extra top-level fields of an error body.
struct ErrorBody {
    status: StatusCode,
    message: String,
    extra: Map<String, Value>,
}

impl ErrorBody {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            extra: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    fn internal(error: &dyn std::error::Error) -> Self {
        tracing::error!(error = %error, "internal server error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::Unauthorized(msg) => ErrorBody::new(StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => ErrorBody::new(StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => ErrorBody::new(StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => ErrorBody::new(StatusCode::NOT_FOUND, msg),
            ApiError::TooManyRequests => ErrorBody::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.",
            ),
            ApiError::Ledger(err) => ledger_error_body(&err),
            ApiError::Order(err) => order_error_body(&err),
            ApiError::Payment(err) => payment_error_body(&err),
        };

        let mut object = body.extra;
        object.insert("error".to_string(), Value::String(body.message));
        (body.status, axum::Json(Value::Object(object))).into_response()
    }
}

fn ledger_error_body(err: &LedgerError) -> ErrorBody {
    match err {
        LedgerError::InvalidQuantity { .. } => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "Invalid quantity")
        }
        LedgerError::NotFound(_) => ErrorBody::new(StatusCode::NOT_FOUND, "Inventory not found"),
        LedgerError::InsufficientStock { available, .. } => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "Not enough stock")
                .with("available", json!(available))
        }
        LedgerError::OverRelease { reserved, .. } => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "Cannot release more than reserved")
                .with("reserved", json!(reserved))
        }
        LedgerError::StockBelowReserved { reserved, .. } => {
            ErrorBody::new(StatusCode::CONFLICT, "Stock cannot be set below reserved quantity")
                .with("reserved", json!(reserved))
        }
        LedgerError::Database(_) | LedgerError::Migration(_) => ErrorBody::internal(err),
    }
}

fn order_error_body(err: &OrderError) -> ErrorBody {
    match err {
        OrderError::InvalidInput(msg) => ErrorBody::new(StatusCode::BAD_REQUEST, msg.clone()),
        OrderError::ProductValidationFailed { product_id, reason } => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "Product validation failed")
                .with("details", json!({ "productId": product_id, "reason": reason }))
        }
        OrderError::Reservation { product_id, source } => {
            let body = ledger_error_body(source);
            if body.status.is_server_error() {
                body
            } else {
                body.with("details", json!({ "productId": product_id }))
            }
        }
        OrderError::NotFound(_) => ErrorBody::new(StatusCode::NOT_FOUND, "Order not found"),
        OrderError::Forbidden => ErrorBody::new(StatusCode::FORBIDDEN, "Forbidden"),
        OrderError::AlreadyCancelled(_) => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "Order already cancelled")
        }
        OrderError::InvalidTransition { from, .. } => ErrorBody::new(
            StatusCode::CONFLICT,
            format!("Order is {from} and can no longer change"),
        ),
        OrderError::Ledger(source) => ledger_error_body(source),
        OrderError::Store(_) => ErrorBody::internal(err),
    }
}

fn payment_error_body(err: &PaymentError) -> ErrorBody {
    match err {
        PaymentError::InvalidInput => ErrorBody::new(StatusCode::BAD_REQUEST, err.to_string()),
        PaymentError::OrderNotFound => ErrorBody::new(StatusCode::NOT_FOUND, "Order not found"),
        PaymentError::NotFound(_) => ErrorBody::new(StatusCode::NOT_FOUND, "Payment not found"),
        PaymentError::Forbidden => ErrorBody::new(StatusCode::FORBIDDEN, "Forbidden"),
        PaymentError::InvalidState { .. } => {
            ErrorBody::new(StatusCode::BAD_REQUEST, err.to_string())
        }
        PaymentError::Order(source) => order_error_body(source),
        PaymentError::Store(_) => ErrorBody::internal(err),
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
