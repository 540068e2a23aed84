//! The order orchestrator.

use std::sync::Arc;
use std::time::Instant;

use clients::{CatalogLookup, Notification, NotificationDispatcher};
use common::{Actor, Clock, Money, OrderId, ProductId, SystemClock};
use futures_util::future::join_all;
use inventory::{InventoryLedger, LedgerError};

use crate::{
    CreateOrder, Order, OrderError, OrderLine, OrderStatus, OrderStatusView, OrderStore, Result,
    StatusUpdate,
};

fn reserve_key(order_id: OrderId, product_id: &ProductId) -> String {
    format!("{order_id}:{product_id}:reserve")
}

fn release_key(order_id: OrderId, product_id: &ProductId) -> String {
    format!("{order_id}:{product_id}:release")
}

fn reinstate_key(order_id: OrderId, product_id: &ProductId) -> String {
    format!("{order_id}:{product_id}:reinstate")
}

/// Coordinates catalog validation, stock reservation, persistence and
/// notification for orders.
#[derive(Clone)]
pub struct OrderOrchestrator {
    catalog: Arc<dyn CatalogLookup>,
    ledger: Arc<dyn InventoryLedger>,
    store: Arc<dyn OrderStore>,
    notifications: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

impl OrderOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogLookup>,
        ledger: Arc<dyn InventoryLedger>,
        store: Arc<dyn OrderStore>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            catalog,
            ledger,
            store,
            notifications,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Places an order.
    ///
    /// Either every line ends up reserved and the order is stored as
    /// `pending`, or nothing is kept.
    #[tracing::instrument(skip(self, actor, request), fields(user_id = %actor.user_id, lines = request.items.len()))]
    pub async fn create(&self, actor: &Actor, request: CreateOrder) -> Result<Order> {
        let started = Instant::now();
        let result = self.place(actor, request).await;
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(order_id = %order.id, total = %order.total, "order created");
            }
            Err(e) => {
                metrics::counter!("order_create_failed_total", "reason" => e.kind()).increment(1);
                tracing::warn!(error = %e, "order creation failed");
            }
        }
        result
    }

    async fn place(&self, actor: &Actor, request: CreateOrder) -> Result<Order> {
        let quantities = validate_items(&request)?;

        // Non-binding pre-check against the catalog's advertised stock.
        let lookups = join_all(
            request
                .items
                .iter()
                .map(|item| self.catalog.lookup(&item.product_id)),
        )
        .await;

        let mut snapshots = Vec::with_capacity(lookups.len());
        for ((item, quantity), lookup) in request.items.iter().zip(&quantities).zip(lookups) {
            let snapshot = lookup.map_err(|e| {
                tracing::debug!(product_id = %item.product_id, error = %e, "catalog lookup failed");
                OrderError::ProductValidationFailed {
                    product_id: item.product_id.clone(),
                    reason: e.reason(),
                }
            })?;
            if snapshot.stock < *quantity {
                return Err(OrderError::ProductValidationFailed {
                    product_id: item.product_id.clone(),
                    reason: "out_of_stock",
                });
            }
            snapshots.push(snapshot);
        }

        let advertised: Vec<(ProductId, u32)> = request
            .items
            .iter()
            .zip(&snapshots)
            .map(|(item, snapshot)| (item.product_id.clone(), snapshot.stock))
            .collect();

        let items: Vec<OrderLine> = request
            .items
            .iter()
            .zip(&quantities)
            .zip(&snapshots)
            .map(|((item, quantity), snapshot)| OrderLine {
                product_id: item.product_id.clone(),
                title: snapshot.title.clone(),
                price: snapshot.price,
                quantity: *quantity,
            })
            .collect();
        let total = items
            .iter()
            .map(OrderLine::line_total)
            .try_fold(Money::zero(), |total, line| total.checked_add(line?))
            .ok_or_else(|| OrderError::InvalidInput("Order total is too large".to_string()))?;

        let now = self.clock.now();
        let order = Order {
            id: OrderId::new(),
            user_id: actor.user_id.clone(),
            status: OrderStatus::Pending,
            total,
            shipping_address: request.shipping_address,
            payment_method: request.payment_method,
            items,
            created_at: now,
            updated_at: now,
        };

        let reservations = order.reservations();
        self.reserve_all(order.id, &reservations, &advertised).await?;

        if let Err(e) = self.store.insert(order.clone()).await {
            tracing::error!(order_id = %order.id, error = %e, "persisting order failed, releasing stock");
            self.release_all(order.id, &reservations).await;
            return Err(e.into());
        }

        self.notifications
            .dispatch(Notification::order_created(order.user_id.clone(), order.id));
        Ok(order)
    }

    /// Reserves every line or none of them.
    async fn reserve_all(
        &self,
        order_id: OrderId,
        reservations: &[(ProductId, u32)],
        advertised: &[(ProductId, u32)],
    ) -> Result<()> {
        for (index, (product_id, quantity)) in reservations.iter().enumerate() {
            if let Err(source) = self
                .reserve_line(order_id, product_id, *quantity, advertised)
                .await
            {
                tracing::warn!(%order_id, %product_id, error = %source, "reservation failed, compensating");
                self.release_all(order_id, &reservations[..index]).await;
                return Err(OrderError::Reservation {
                    product_id: product_id.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    async fn reserve_line(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
        advertised: &[(ProductId, u32)],
    ) -> std::result::Result<(), LedgerError> {
        let key = reserve_key(order_id, product_id);
        match self.ledger.reserve(product_id, quantity, Some(&key)).await {
            Err(LedgerError::NotFound(_)) => {
                // First order for this product: open its ledger entry with
                // the stock the catalog advertises.
                let stock = advertised
                    .iter()
                    .find(|(id, _)| id == product_id)
                    .map(|(_, stock)| *stock)
                    .unwrap_or_default();
                self.ledger.seed(product_id, stock).await?;
                self.ledger
                    .reserve(product_id, quantity, Some(&key))
                    .await
                    .map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    /// Best-effort release used for compensation. Keyed, so safe to repeat.
    async fn release_all(&self, order_id: OrderId, reservations: &[(ProductId, u32)]) {
        for (product_id, quantity) in reservations {
            let key = release_key(order_id, product_id);
            if let Err(e) = self.ledger.release(product_id, *quantity, Some(&key)).await {
                tracing::error!(%order_id, %product_id, error = %e, "compensating release failed");
            }
        }
    }

    /// Cancels a pending order and gives its stock back.
    #[tracing::instrument(skip(self, order_id, actor), fields(order_id = %order_id, user_id = %actor.user_id))]
    pub async fn cancel(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.get(order_id, actor).await?;

        match order.status {
            OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled(order_id)),
            OrderStatus::Completed => {
                return Err(OrderError::InvalidTransition {
                    order_id,
                    from: OrderStatus::Completed,
                    to: OrderStatus::Cancelled,
                });
            }
            OrderStatus::Pending => {}
        }

        let reservations = order.reservations();
        for (product_id, quantity) in &reservations {
            let key = release_key(order_id, product_id);
            self.ledger
                .release(product_id, *quantity, Some(&key))
                .await?;
        }

        let update = self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                self.clock.now(),
            )
            .await?;

        let cancelled = match update {
            StatusUpdate::Applied(order) => order,
            StatusUpdate::Conflict(current) if current.status == OrderStatus::Cancelled => {
                return Err(OrderError::AlreadyCancelled(order_id));
            }
            StatusUpdate::Conflict(current) => {
                // Settled between our read and the write: the stock belongs
                // to a completed order again.
                self.reinstate(order_id, &reservations).await;
                return Err(OrderError::InvalidTransition {
                    order_id,
                    from: current.status,
                    to: OrderStatus::Cancelled,
                });
            }
        };

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!("order cancelled");
        self.notifications.dispatch(Notification::order_cancelled(
            cancelled.user_id.clone(),
            order_id,
        ));
        Ok(cancelled)
    }

    async fn reinstate(&self, order_id: OrderId, reservations: &[(ProductId, u32)]) {
        for (product_id, quantity) in reservations {
            let key = reinstate_key(order_id, product_id);
            if let Err(e) = self.ledger.reserve(product_id, *quantity, Some(&key)).await {
                tracing::error!(%order_id, %product_id, error = %e, "could not reinstate reservation");
            }
        }
    }

    /// Loads an order visible to `actor` (owner or administrator).
    pub async fn get(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;

        if !actor.can_access(&order.user_id) {
            return Err(OrderError::Forbidden);
        }
        Ok(order)
    }

    /// The actor's own orders, newest first.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Order>> {
        Ok(self.store.list_for_user(&actor.user_id).await?)
    }

    pub async fn status(&self, order_id: OrderId) -> Result<OrderStatusView> {
        self.store
            .get(order_id)
            .await?
            .map(|order| order.status_view())
            .ok_or(OrderError::NotFound(order_id))
    }

    /// Marks a pending order completed after its payment settled.
    /// Terminal orders are left alone.
    #[tracing::instrument(skip(self))]
    pub async fn mark_completed(&self, order_id: OrderId) -> Result<Order> {
        let update = self
            .store
            .compare_and_set_status(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Completed,
                self.clock.now(),
            )
            .await
            .map_err(|e| match e {
                crate::StoreError::NotFound(id) => OrderError::NotFound(id),
                other => other.into(),
            })?;

        match update {
            StatusUpdate::Applied(order) => {
                tracing::info!("order completed");
                Ok(order)
            }
            StatusUpdate::Conflict(order) => {
                tracing::info!(status = %order.status, "order already terminal, not completing");
                Ok(order)
            }
        }
    }
}

/// Checks the request shape and resolves each line's quantity.
fn validate_items(request: &CreateOrder) -> Result<Vec<u32>> {
    if request.items.is_empty() {
        return Err(OrderError::InvalidInput("Items are required".to_string()));
    }

    request
        .items
        .iter()
        .map(|item| {
            let quantity = item.quantity.unwrap_or(1);
            u32::try_from(quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| {
                    OrderError::InvalidInput(format!(
                        "Invalid quantity {quantity} for product {}",
                        item.product_id
                    ))
                })
        })
        .collect()
}
