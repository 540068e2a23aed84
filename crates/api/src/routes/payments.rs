//! Payment endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Page, PaymentId};
use payments::{CreatePayment, PROCESSING_MESSAGE, Payment};
use serde::Serialize;

use super::PageQuery;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// A freshly accepted payment plus a note that settlement is pending.
#[derive(Debug, Serialize)]
pub struct PaymentAccepted {
    #[serde(flatten)]
    pub payment: Payment,
    pub message: &'static str,
}

fn parse_payment_id(id: &str) -> Result<PaymentId, ApiError> {
    id.parse().map_err(|_| ApiError::NotFound("Payment not found"))
}

/// POST /payments
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id))]
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    payload: Result<Json<CreatePayment>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentAccepted>), ApiError> {
    // Any body that does not describe a payment is an invalid payment.
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    let payment = state.payments.create(&actor, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentAccepted {
            payment,
            message: PROCESSING_MESSAGE,
        }),
    ))
}

/// GET /payments
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id))]
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Payment>>, ApiError> {
    Ok(Json(state.payments.list(&actor, query.to_request()).await?))
}

/// GET /payments/{id}
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id, payment_id = %id))]
pub async fn get(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id = parse_payment_id(&id)?;
    Ok(Json(state.payments.get(payment_id, &actor).await?))
}

/// POST /payments/{id}/refund
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id, payment_id = %id))]
pub async fn refund(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let payment_id = parse_payment_id(&id)?;
    Ok(Json(state.payments.refund(payment_id, &actor).await?))
}
