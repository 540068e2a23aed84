//! Order placement, cancellation and reads.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use orders::{CreateOrder, Order, OrderStatusView};

use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// Ids that do not parse cannot name an existing order.
fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse().map_err(|_| ApiError::NotFound("Order not found"))
}

/// POST /orders
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id))]
pub async fn create(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    payload: Result<Json<CreateOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(request) = payload?;
    let order = state.orders.create(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id))]
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> Result<Json<Vec<Order>>, ApiError> {
    Ok(Json(state.orders.list(&actor).await?))
}

/// GET /orders/{id}
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id, order_id = %id))]
pub async fn get(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.get(order_id, &actor).await?))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip_all, fields(user_id = %actor.user_id, order_id = %id))]
pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.cancel(order_id, &actor).await?))
}

/// GET /orders/{id}/status, unauthenticated.
#[tracing::instrument(skip_all, fields(order_id = %id))]
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusView>, ApiError> {
    let order_id = parse_order_id(&id)?;
    Ok(Json(state.orders.status(order_id).await?))
}
