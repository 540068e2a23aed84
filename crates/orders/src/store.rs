//! Order storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use parking_lot::RwLock;

use crate::{Order, OrderStatus, StoreError};

/// Outcome of a compare-and-set on the status field.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// The status matched and was replaced. Carries the updated order.
    Applied(Order),
    /// The status did not match. Carries the order as it is.
    Conflict(Order),
}

/// Persistence for orders and their lines.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order together with its lines.
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Orders of one user, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError>;

    /// Replaces the status only if it currently equals `expected`.
    async fn compare_and_set_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusUpdate, StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryOrderState {
    orders: HashMap<OrderId, Order>,
    fail_on_insert: bool,
}

/// In-memory order store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryOrderState>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next inserts fail while set.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().fail_on_insert = fail;
    }

    pub fn len(&self) -> usize {
        self.state.read().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("insert disabled".to_string()));
        }
        if state.orders.contains_key(&order.id) {
            return Err(StoreError::Duplicate(order.id));
        }
        state.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().orders.get(&order_id).cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .state
            .read()
            .orders
            .values()
            .filter(|order| &order.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn compare_and_set_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusUpdate, StoreError> {
        let mut state = self.state.write();
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound(order_id))?;

        if order.status != expected {
            return Ok(StatusUpdate::Conflict(order.clone()));
        }
        order.status = new;
        order.updated_at = at;
        Ok(StatusUpdate::Applied(order.clone()))
    }
}
