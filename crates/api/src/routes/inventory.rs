//! Inventory ledger endpoints.
//!
//! Reads, checks, reserve and release are open to other services; restock
//! and the action log are for administrators.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Page, ProductId};
use inventory::{InventoryItem, InventoryLogEntry, LedgerError, RestockRequest, StockCheck};
use serde::{Deserialize, Serialize};

use super::PageQuery;
use crate::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;

/// An item with its derived `available` count.
#[derive(Debug, Serialize)]
pub struct InventoryView {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub available: u32,
}

impl From<InventoryItem> for InventoryView {
    fn from(item: InventoryItem) -> Self {
        let available = item.available();
        Self { item, available }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantityRequest {
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl QuantityRequest {
    fn quantity(&self) -> Result<u32, LedgerError> {
        let quantity = self.quantity.unwrap_or(0);
        u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or(LedgerError::InvalidQuantity { quantity })
    }
}

/// GET /inventory/{product_id}
#[tracing::instrument(skip_all, fields(product_id = %product_id))]
pub async fn get(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<InventoryView>, ApiError> {
    let product_id = ProductId::new(product_id);
    Ok(Json(state.ledger.get(&product_id).await?.into()))
}

/// POST /inventory/{product_id}/check
#[tracing::instrument(skip_all, fields(product_id = %product_id))]
pub async fn check(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<QuantityRequest>, JsonRejection>,
) -> Result<Json<StockCheck>, ApiError> {
    let product_id = ProductId::new(product_id);
    let Json(request) = payload?;
    let quantity = request.quantity()?;
    Ok(Json(state.ledger.check(&product_id, quantity).await?))
}

/// POST /inventory/{product_id}/reserve
#[tracing::instrument(skip_all, fields(product_id = %product_id))]
pub async fn reserve(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<QuantityRequest>, JsonRejection>,
) -> Result<Json<InventoryView>, ApiError> {
    let product_id = ProductId::new(product_id);
    let Json(request) = payload?;
    let quantity = request.quantity()?;
    let item = state
        .ledger
        .reserve(&product_id, quantity, request.idempotency_key.as_deref())
        .await?;
    Ok(Json(item.into()))
}

/// POST /inventory/{product_id}/release
#[tracing::instrument(skip_all, fields(product_id = %product_id))]
pub async fn release(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    payload: Result<Json<QuantityRequest>, JsonRejection>,
) -> Result<Json<InventoryView>, ApiError> {
    let product_id = ProductId::new(product_id);
    let Json(request) = payload?;
    let quantity = request.quantity()?;
    let item = state
        .ledger
        .release(&product_id, quantity, request.idempotency_key.as_deref())
        .await?;
    Ok(Json(item.into()))
}

/// PUT /inventory/{product_id}: 201 when the item was created, 200 otherwise.
#[tracing::instrument(skip_all, fields(product_id = %product_id, user_id = %actor.user_id))]
pub async fn restock(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(product_id): Path<String>,
    payload: Result<Json<RestockRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InventoryView>), ApiError> {
    let product_id = ProductId::new(product_id);
    if !actor.is_admin() {
        return Err(ApiError::Forbidden("Only admins can update inventory"));
    }
    let Json(request) = payload?;

    let outcome = state.ledger.restock(&product_id, request).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.item.into())))
}

/// GET /inventory/{product_id}/logs
#[tracing::instrument(skip_all, fields(product_id = %product_id, user_id = %actor.user_id))]
pub async fn logs(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(product_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<InventoryLogEntry>>, ApiError> {
    let product_id = ProductId::new(product_id);
    if !actor.is_admin() {
        return Err(ApiError::Forbidden("Only admins can view logs"));
    }
    Ok(Json(
        state.ledger.logs(&product_id, query.to_request()).await?,
    ))
}
