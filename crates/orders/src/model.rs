use chrono::{DateTime, Utc};
use common::{Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use crate::OrderStatus;

/// A line of an order. Title and price are copied from the catalog at order
/// time and never follow later catalog changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub title: String,
    pub price: Money,
    pub quantity: u32,
}

impl OrderLine {
    /// Price times quantity, or `None` if it does not fit.
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_times(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub shipping_address: serde_json::Value,
    pub payment_method: Option<String>,
    pub items: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Quantities to hold per product. Repeated products are merged, in
    /// first-seen order.
    pub fn reservations(&self) -> Vec<(ProductId, u32)> {
        let mut merged: Vec<(ProductId, u32)> = Vec::new();
        for line in &self.items {
            match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
                Some((_, quantity)) => *quantity += line.quantity,
                None => merged.push((line.product_id.clone(), line.quantity)),
            }
        }
        merged
    }

    pub fn status_view(&self) -> OrderStatusView {
        OrderStatusView {
            id: self.id,
            status: self.status,
        }
    }
}

/// Unauthenticated status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrderStatusView {
    pub id: OrderId,
    pub status: OrderStatus,
}

/// One requested line. A missing quantity means 1.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: Option<i64>,
}

impl OrderItemRequest {
    pub fn new(product_id: impl Into<ProductId>, quantity: i64) -> Self {
        Self {
            product_id: product_id.into(),
            quantity: Some(quantity),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrder {
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub shipping_address: serde_json::Value,
    #[serde(default)]
    pub payment_method: Option<String>,
}

impl CreateOrder {
    pub fn with_items(items: impl IntoIterator<Item = OrderItemRequest>) -> Self {
        Self {
            items: items.into_iter().collect(),
            ..Self::default()
        }
    }
}
