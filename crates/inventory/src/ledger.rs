use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::{Page, PageRequest, ProductId};

use crate::{
    Availability, InventoryItem, InventoryLogEntry, LedgerError, LogAction, RestockOutcome,
    RestockRequest, Result, StockCheck,
};

/// Free-text reasons written to the action log.
pub mod reasons {
    pub const ORDER_PLACEMENT: &str = "Order placement";
    pub const ORDER_CANCELLATION: &str = "Order cancellation";
    pub const ADMIN_RESTOCK: &str = "Admin restock";
    pub const CATALOG_SEED: &str = "Catalog seed";
}

/// Contract every ledger backend upholds.
///
/// `reserve`, `release`, `restock` and `seed` are atomic with respect to the
/// product they touch. When an idempotency key is passed and the same key was
/// already applied for the same product and action, the call changes nothing
/// and returns the current item.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Loads the full record for a product.
    async fn get(&self, product_id: &ProductId) -> Result<InventoryItem>;

    /// Holds `quantity` units for a pending order.
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem>;

    /// Gives back `quantity` previously reserved units.
    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem>;

    /// Creates or updates a product's stock and metadata.
    ///
    /// When `stock` is supplied the log records the new absolute stock, not
    /// the delta.
    async fn restock(&self, product_id: &ProductId, request: RestockRequest)
    -> Result<RestockOutcome>;

    /// Creates the product with the given stock unless it already exists.
    async fn seed(&self, product_id: &ProductId, stock: u32) -> Result<InventoryItem>;

    /// Newest-first page of the product's action log.
    async fn logs(
        &self,
        product_id: &ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryLogEntry>>;

    /// Forgets idempotency keys applied before `cutoff` and returns how
    /// many were dropped. Replaying a forgotten key applies it again.
    async fn expire_keys(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn availability(&self, product_id: &ProductId) -> Result<Availability> {
        Ok(self.get(product_id).await?.availability())
    }

    async fn check(&self, product_id: &ProductId, quantity: u32) -> Result<StockCheck> {
        ensure_positive(quantity)?;
        let available = self.get(product_id).await?.available();
        Ok(StockCheck {
            product_id: product_id.clone(),
            requested: quantity,
            available,
            in_stock: available >= quantity,
        })
    }
}

pub(crate) fn ensure_positive(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(LedgerError::InvalidQuantity { quantity: 0 });
    }
    Ok(())
}

pub(crate) fn record_mutation(action: LogAction, quantity: u32) {
    let name = match action {
        LogAction::Reserved => "inventory_reservations_total",
        LogAction::Released => "inventory_releases_total",
        LogAction::Added => "inventory_restocks_total",
    };
    metrics::counter!(name).increment(1);
    metrics::counter!("inventory_units_total", "action" => action.as_str())
        .increment(u64::from(quantity));
}

/// Periodically drops idempotency keys older than `retention`.
pub fn spawn_key_expiry(
    ledger: Arc<dyn InventoryLedger>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
        let period = retention
            .to_std()
            .unwrap_or_default()
            .clamp(Duration::from_secs(1), Duration::from_secs(3600));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cutoff) = Utc::now().checked_sub_signed(retention) else {
                continue;
            };
            match ledger.expire_keys(cutoff).await {
                Ok(0) => {}
                Ok(expired) => tracing::debug!(expired, "idempotency keys expired"),
                Err(e) => tracing::warn!(error = %e, "idempotency key expiry failed"),
            }
        }
    })
}
