use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Clock, Page, PageRequest, ProductId, SystemClock};
use parking_lot::{Mutex, RwLock};

use crate::ledger::{ensure_positive, reasons, record_mutation};
use crate::{
    DEFAULT_REORDER_LEVEL, InventoryItem, InventoryLedger, InventoryLogEntry, LedgerError,
    LogAction, RestockOutcome, RestockRequest, Result,
};

/// Everything owned by one product. Guarded by its own mutex.
#[derive(Debug)]
struct Slot {
    item: InventoryItem,
    log: Vec<InventoryLogEntry>,
    /// Applied idempotency keys and when they were applied.
    applied_keys: HashMap<(LogAction, String), DateTime<Utc>>,
}

/// In-memory ledger.
///
/// The product map is only write-locked to insert a new product; every
/// mutation takes the product's own mutex, so two reservations of the same
/// product serialize while reservations of different products do not
/// contend. No lock is held across an `.await`.
#[derive(Debug, Clone)]
pub struct InMemoryInventoryLedger {
    slots: Arc<RwLock<HashMap<ProductId, Arc<Mutex<Slot>>>>>,
    next_log_id: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryInventoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInventoryLedger {
    /// Creates an empty ledger using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty ledger with timestamps taken from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            next_log_id: Arc::new(AtomicI64::new(1)),
            clock,
        }
    }

    /// Number of products known to the ledger.
    pub fn product_count(&self) -> usize {
        self.slots.read().len()
    }

    fn slot(&self, product_id: &ProductId) -> Result<Arc<Mutex<Slot>>> {
        self.slots
            .read()
            .get(product_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(product_id.clone()))
    }

    /// Returns the product's slot, creating it with `init` if absent.
    fn slot_or_insert(
        &self,
        product_id: &ProductId,
        init: impl FnOnce() -> InventoryItem,
    ) -> (Arc<Mutex<Slot>>, bool) {
        if let Some(slot) = self.slots.read().get(product_id) {
            return (slot.clone(), false);
        }

        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(product_id) {
            return (slot.clone(), false);
        }
        let slot = Arc::new(Mutex::new(Slot {
            item: init(),
            log: Vec::new(),
            applied_keys: HashMap::new(),
        }));
        slots.insert(product_id.clone(), slot.clone());
        (slot, true)
    }

    fn append_log(&self, slot: &mut Slot, action: LogAction, quantity: u32, reason: &str) {
        let entry = InventoryLogEntry {
            id: self.next_log_id.fetch_add(1, Ordering::Relaxed),
            product_id: slot.item.product_id.clone(),
            action,
            quantity,
            reason: reason.to_string(),
            created_at: self.clock.now(),
        };
        slot.log.push(entry);
        record_mutation(action, quantity);
    }

    fn new_item(&self, product_id: &ProductId, request: &RestockRequest) -> InventoryItem {
        let now = self.clock.now();
        InventoryItem {
            product_id: product_id.clone(),
            stock: request.stock.unwrap_or(0),
            reserved: 0,
            warehouse: request.warehouse.clone(),
            reorder_level: request.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL),
            last_restock: request.stock.map(|_| now),
            created_at: now,
            updated_at: now,
        }
    }
}

fn claim_key(slot: &mut Slot, action: LogAction, key: Option<&str>, at: DateTime<Utc>) {
    if let Some(key) = key {
        slot.applied_keys.insert((action, key.to_string()), at);
    }
}

#[async_trait]
impl InventoryLedger for InMemoryInventoryLedger {
    async fn get(&self, product_id: &ProductId) -> Result<InventoryItem> {
        let slot = self.slot(product_id)?;
        let item = slot.lock().item.clone();
        Ok(item)
    }

    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    async fn reserve(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem> {
        ensure_positive(quantity)?;
        let slot = self.slot(product_id)?;
        let mut slot = slot.lock();

        if idempotency_key.is_some_and(|key| {
            slot.applied_keys
                .contains_key(&(LogAction::Reserved, key.to_string()))
        }) {
            tracing::debug!("reservation already applied for key");
            return Ok(slot.item.clone());
        }

        let available = slot.item.available();
        if available < quantity {
            return Err(LedgerError::InsufficientStock {
                product_id: product_id.clone(),
                requested: quantity,
                available,
            });
        }

        let now = self.clock.now();
        slot.item.reserved += quantity;
        slot.item.updated_at = now;
        claim_key(&mut slot, LogAction::Reserved, idempotency_key, now);
        self.append_log(&mut slot, LogAction::Reserved, quantity, reasons::ORDER_PLACEMENT);

        tracing::debug!(available = slot.item.available(), "stock reserved");
        Ok(slot.item.clone())
    }

    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    async fn release(
        &self,
        product_id: &ProductId,
        quantity: u32,
        idempotency_key: Option<&str>,
    ) -> Result<InventoryItem> {
        ensure_positive(quantity)?;
        let slot = self.slot(product_id)?;
        let mut slot = slot.lock();

        if idempotency_key.is_some_and(|key| {
            slot.applied_keys
                .contains_key(&(LogAction::Released, key.to_string()))
        }) {
            tracing::debug!("release already applied for key");
            return Ok(slot.item.clone());
        }

        if quantity > slot.item.reserved {
            return Err(LedgerError::OverRelease {
                product_id: product_id.clone(),
                requested: quantity,
                reserved: slot.item.reserved,
            });
        }

        let now = self.clock.now();
        slot.item.reserved = slot.item.reserved.saturating_sub(quantity);
        slot.item.updated_at = now;
        claim_key(&mut slot, LogAction::Released, idempotency_key, now);
        self.append_log(
            &mut slot,
            LogAction::Released,
            quantity,
            reasons::ORDER_CANCELLATION,
        );

        tracing::debug!(available = slot.item.available(), "stock released");
        Ok(slot.item.clone())
    }

    #[tracing::instrument(skip(self, product_id, request), fields(product_id = %product_id))]
    async fn restock(
        &self,
        product_id: &ProductId,
        request: RestockRequest,
    ) -> Result<RestockOutcome> {
        let (slot, created) = self.slot_or_insert(product_id, || self.new_item(product_id, &request));
        let mut slot = slot.lock();

        if !created {
            if let Some(stock) = request.stock
                && stock < slot.item.reserved
            {
                return Err(LedgerError::StockBelowReserved {
                    product_id: product_id.clone(),
                    stock,
                    reserved: slot.item.reserved,
                });
            }

            let now = self.clock.now();
            if let Some(stock) = request.stock {
                slot.item.stock = stock;
                slot.item.last_restock = Some(now);
            }
            if let Some(warehouse) = request.warehouse.clone() {
                slot.item.warehouse = Some(warehouse);
            }
            if let Some(reorder_level) = request.reorder_level {
                slot.item.reorder_level = reorder_level;
            }
            slot.item.updated_at = now;
        }

        if let Some(stock) = request.stock {
            self.append_log(&mut slot, LogAction::Added, stock, reasons::ADMIN_RESTOCK);
        }

        tracing::info!(created, stock = slot.item.stock, "inventory restocked");
        Ok(RestockOutcome {
            item: slot.item.clone(),
            created,
        })
    }

    #[tracing::instrument(skip(self, product_id), fields(product_id = %product_id))]
    async fn seed(&self, product_id: &ProductId, stock: u32) -> Result<InventoryItem> {
        let (slot, created) = self.slot_or_insert(product_id, || {
            self.new_item(product_id, &RestockRequest::stock(stock))
        });
        let mut slot = slot.lock();

        if created {
            self.append_log(&mut slot, LogAction::Added, stock, reasons::CATALOG_SEED);
            tracing::info!(stock, "inventory seeded from catalog");
        }
        Ok(slot.item.clone())
    }

    async fn expire_keys(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        let mut expired = 0u64;
        for slot in slots {
            let mut slot = slot.lock();
            let before = slot.applied_keys.len();
            slot.applied_keys.retain(|_, applied_at| *applied_at >= cutoff);
            expired += (before - slot.applied_keys.len()) as u64;
        }
        Ok(expired)
    }

    async fn logs(
        &self,
        product_id: &ProductId,
        page: PageRequest,
    ) -> Result<Page<InventoryLogEntry>> {
        let entries = match self.slot(product_id) {
            Ok(slot) => slot.lock().log.iter().rev().cloned().collect(),
            Err(LedgerError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(page.slice(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::ManualClock;

    async fn ledger_with(stock: u32) -> (InMemoryInventoryLedger, ProductId) {
        let ledger = InMemoryInventoryLedger::new();
        let product_id = ProductId::new("p1");
        ledger
            .restock(&product_id, RestockRequest::stock(stock))
            .await
            .unwrap();
        (ledger, product_id)
    }

    #[tokio::test]
    async fn test_reserve_reduces_available() {
        let (ledger, p1) = ledger_with(10).await;

        let item = ledger.reserve(&p1, 7, None).await.unwrap();

        assert_eq!(item.reserved, 7);
        assert_eq!(item.available(), 3);
    }

    #[tokio::test]
    async fn test_reserve_insufficient_stock_reports_available() {
        let (ledger, p1) = ledger_with(10).await;
        ledger.reserve(&p1, 7, None).await.unwrap();

        let err = ledger.reserve(&p1, 5, None).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 5,
                available: 3,
                ..
            }
        ));
        assert_eq!(ledger.get(&p1).await.unwrap().reserved, 7);
    }

    #[tokio::test]
    async fn test_reserve_unknown_product() {
        let ledger = InMemoryInventoryLedger::new();
        let err = ledger
            .reserve(&ProductId::new("ghost"), 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert_eq!(ledger.product_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (ledger, p1) = ledger_with(10).await;
        assert!(matches!(
            ledger.reserve(&p1, 0, None).await,
            Err(LedgerError::InvalidQuantity { quantity: 0 })
        ));
        assert!(matches!(
            ledger.release(&p1, 0, None).await,
            Err(LedgerError::InvalidQuantity { quantity: 0 })
        ));
    }

    #[tokio::test]
    async fn test_over_release_leaves_reserved_unchanged() {
        let (ledger, p1) = ledger_with(10).await;
        ledger.reserve(&p1, 2, None).await.unwrap();

        let err = ledger.release(&p1, 3, None).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::OverRelease {
                requested: 3,
                reserved: 2,
                ..
            }
        ));
        assert_eq!(ledger.get(&p1).await.unwrap().reserved, 2);
    }

    #[tokio::test]
    async fn test_release_returns_stock() {
        let (ledger, p1) = ledger_with(10).await;
        ledger.reserve(&p1, 4, None).await.unwrap();

        let item = ledger.release(&p1, 4, None).await.unwrap();

        assert_eq!(item.reserved, 0);
        assert_eq!(item.available(), 10);
    }

    #[tokio::test]
    async fn test_idempotency_key_applies_once() {
        let (ledger, p1) = ledger_with(10).await;

        ledger.reserve(&p1, 3, Some("order-1")).await.unwrap();
        let item = ledger.reserve(&p1, 3, Some("order-1")).await.unwrap();
        assert_eq!(item.reserved, 3);

        // Same key, different action, is a different operation.
        ledger.release(&p1, 3, Some("order-1")).await.unwrap();
        let item = ledger.release(&p1, 3, Some("order-1")).await.unwrap();
        assert_eq!(item.reserved, 0);

        let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
        assert_eq!(logs.total, 3); // added, reserved, released
    }

    #[tokio::test]
    async fn test_failed_reservation_does_not_burn_key() {
        let (ledger, p1) = ledger_with(2).await;

        assert!(ledger.reserve(&p1, 5, Some("k")).await.is_err());
        ledger
            .restock(&p1, RestockRequest::stock(10))
            .await
            .unwrap();

        let item = ledger.reserve(&p1, 5, Some("k")).await.unwrap();
        assert_eq!(item.reserved, 5);
    }

    #[tokio::test]
    async fn test_restock_creates_then_updates() {
        let ledger = InMemoryInventoryLedger::new();
        let p1 = ProductId::new("p1");

        let created = ledger
            .restock(
                &p1,
                RestockRequest {
                    stock: Some(50),
                    warehouse: Some("WH-1".to_string()),
                    reorder_level: None,
                },
            )
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(created.item.stock, 50);
        assert_eq!(created.item.reorder_level, DEFAULT_REORDER_LEVEL);
        assert!(created.item.last_restock.is_some());

        let updated = ledger
            .restock(
                &p1,
                RestockRequest {
                    stock: None,
                    warehouse: None,
                    reorder_level: Some(5),
                },
            )
            .await
            .unwrap();
        assert!(!updated.created);
        assert_eq!(updated.item.stock, 50);
        assert_eq!(updated.item.warehouse.as_deref(), Some("WH-1"));
        assert_eq!(updated.item.reorder_level, 5);
    }

    #[tokio::test]
    async fn test_restock_logs_absolute_stock() {
        let (ledger, p1) = ledger_with(10).await;
        ledger
            .restock(&p1, RestockRequest::stock(25))
            .await
            .unwrap();

        let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
        assert_eq!(logs.items[0].action, LogAction::Added);
        assert_eq!(logs.items[0].quantity, 25);
        assert_eq!(logs.items[0].reason, reasons::ADMIN_RESTOCK);
    }

    #[tokio::test]
    async fn test_metadata_only_restock_is_not_logged() {
        let (ledger, p1) = ledger_with(10).await;
        ledger
            .restock(
                &p1,
                RestockRequest {
                    warehouse: Some("WH-2".to_string()),
                    ..RestockRequest::default()
                },
            )
            .await
            .unwrap();

        let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
        assert_eq!(logs.total, 1);
    }

    #[tokio::test]
    async fn test_restock_below_reserved_rejected() {
        let (ledger, p1) = ledger_with(10).await;
        ledger.reserve(&p1, 6, None).await.unwrap();

        let err = ledger
            .restock(&p1, RestockRequest::stock(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::StockBelowReserved {
                stock: 5,
                reserved: 6,
                ..
            }
        ));
        assert_eq!(ledger.get(&p1).await.unwrap().stock, 10);
    }

    #[tokio::test]
    async fn test_seed_only_creates_once() {
        let ledger = InMemoryInventoryLedger::new();
        let p1 = ProductId::new("p1");

        let first = ledger.seed(&p1, 120).await.unwrap();
        ledger.reserve(&p1, 5, None).await.unwrap();
        let second = ledger.seed(&p1, 999).await.unwrap();

        assert_eq!(first.stock, 120);
        assert_eq!(second.stock, 120);
        assert_eq!(second.reserved, 5);

        let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
        assert_eq!(logs.total, 2);
        assert_eq!(logs.items[1].reason, reasons::CATALOG_SEED);
    }

    #[tokio::test]
    async fn test_logs_newest_first_and_paginated() {
        let clock = ManualClock::default();
        let ledger = InMemoryInventoryLedger::with_clock(Arc::new(clock.clone()));
        let p1 = ProductId::new("p1");
        ledger
            .restock(&p1, RestockRequest::stock(100))
            .await
            .unwrap();
        for qty in 1..=4 {
            clock.advance(Duration::seconds(1));
            ledger.reserve(&p1, qty, None).await.unwrap();
        }

        let page = ledger.logs(&p1, PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].quantity, 4);
        assert_eq!(page.items[1].quantity, 3);
        assert!(page.items[0].created_at > page.items[1].created_at);

        let last = ledger.logs(&p1, PageRequest::new(3, 2)).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].action, LogAction::Added);
    }

    #[tokio::test]
    async fn test_logs_for_unknown_product_are_empty() {
        let ledger = InMemoryInventoryLedger::new();
        let page = ledger
            .logs(&ProductId::new("nope"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_check_does_not_mutate() {
        let (ledger, p1) = ledger_with(4).await;

        let check = ledger.check(&p1, 5).await.unwrap();
        assert!(!check.in_stock);
        assert_eq!(check.available, 4);

        let check = ledger.check(&p1, 4).await.unwrap();
        assert!(check.in_stock);
        assert_eq!(ledger.get(&p1).await.unwrap().reserved, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_never_oversell() {
        let (ledger, p1) = ledger_with(10).await;

        let a = {
            let ledger = ledger.clone();
            let p1 = p1.clone();
            tokio::spawn(async move { ledger.reserve(&p1, 7, None).await })
        };
        let b = {
            let ledger = ledger.clone();
            let p1 = p1.clone();
            tokio::spawn(async move { ledger.reserve(&p1, 5, None).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);

        let item = ledger.get(&p1).await.unwrap();
        assert!(item.reserved == 7 || item.reserved == 5);
        for result in results {
            if let Err(LedgerError::InsufficientStock { available, .. }) = result {
                assert_eq!(available, 10 - item.reserved);
            }
        }
    }

    #[tokio::test]
    async fn test_restock_to_zero_is_logged() {
        let (ledger, p1) = ledger_with(10).await;

        let outcome = ledger.restock(&p1, RestockRequest::stock(0)).await.unwrap();
        assert_eq!(outcome.item.stock, 0);
        assert_eq!(outcome.item.available(), 0);

        let empty = ledger
            .restock(&ProductId::new("p2"), RestockRequest::stock(0))
            .await
            .unwrap();
        assert!(empty.created);

        let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
        assert_eq!(logs.items[0].action, LogAction::Added);
        assert_eq!(logs.items[0].quantity, 0);
    }

    #[tokio::test]
    async fn test_expired_keys_apply_again() {
        let clock = ManualClock::default();
        let ledger = InMemoryInventoryLedger::with_clock(Arc::new(clock.clone()));
        let p1 = ProductId::new("p1");
        ledger
            .restock(&p1, RestockRequest::stock(100))
            .await
            .unwrap();

        ledger.reserve(&p1, 1, Some("old")).await.unwrap();
        clock.advance(Duration::hours(2));
        ledger.reserve(&p1, 1, Some("fresh")).await.unwrap();

        let cutoff = clock.now() - Duration::hours(1);
        assert_eq!(ledger.expire_keys(cutoff).await.unwrap(), 1);
        assert_eq!(ledger.expire_keys(cutoff).await.unwrap(), 0);

        let item = ledger.reserve(&p1, 1, Some("fresh")).await.unwrap();
        assert_eq!(item.reserved, 2);
        let item = ledger.reserve(&p1, 1, Some("old")).await.unwrap();
        assert_eq!(item.reserved, 3);
    }
}
