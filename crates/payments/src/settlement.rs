//! Payment intake, scheduled settlement and refunds.

use std::sync::Arc;
use std::time::Duration;

use clients::{Notification, NotificationDispatcher};
use common::{Actor, Clock, OrderId, Page, PageRequest, PaymentId, SystemClock};
use orders::OrderError;

use crate::model::{DEFAULT_CURRENCY, DEFAULT_METHOD};
use crate::{
    CreatePayment, OrderDirectory, Payment, PaymentError, PaymentStatus, PaymentStore,
    PaymentStoreError, PaymentUpdate, Result, SettlementScheduler, reference,
};

/// Delay between accepting a payment and settling it.
pub const DEFAULT_SETTLEMENT_DELAY: Duration = Duration::from_millis(1000);

struct Inner {
    store: Arc<dyn PaymentStore>,
    orders: Arc<dyn OrderDirectory>,
    notifications: NotificationDispatcher,
    scheduler: SettlementScheduler,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

/// Accepts payments and settles them asynchronously.
///
/// Cheap to clone; clones share the store and the scheduler.
#[derive(Clone)]
pub struct PaymentSettlement {
    inner: Arc<Inner>,
}

impl PaymentSettlement {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        orders: Arc<dyn OrderDirectory>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self::with_options(
            store,
            orders,
            notifications,
            DEFAULT_SETTLEMENT_DELAY,
            Arc::new(SystemClock),
        )
    }

    pub fn with_options(
        store: Arc<dyn PaymentStore>,
        orders: Arc<dyn OrderDirectory>,
        notifications: NotificationDispatcher,
        delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                orders,
                notifications,
                scheduler: SettlementScheduler::new(),
                clock,
                delay,
            }),
        }
    }

    pub fn scheduler(&self) -> &SettlementScheduler {
        &self.inner.scheduler
    }

    /// Records a payment for an order the actor can see and schedules its
    /// settlement. Returns immediately with the payment in `processing`.
    #[tracing::instrument(skip(self, actor, request), fields(user_id = %actor.user_id))]
    pub async fn create(&self, actor: &Actor, request: CreatePayment) -> Result<Payment> {
        let (Some(order_id), Some(amount)) = (request.order_id.as_deref(), request.amount) else {
            return Err(PaymentError::InvalidInput);
        };
        if order_id.trim().is_empty() || !amount.is_positive() {
            return Err(PaymentError::InvalidInput);
        }

        let order_id: OrderId = order_id.parse().map_err(|_| PaymentError::OrderNotFound)?;
        match self.inner.orders.find_order(order_id, actor).await {
            Ok(_) => {}
            Err(OrderError::NotFound(_) | OrderError::Forbidden) => {
                return Err(PaymentError::OrderNotFound);
            }
            Err(e) => return Err(PaymentError::Order(e)),
        }

        let now = self.inner.clock.now();
        let payment = Payment {
            id: PaymentId::new(),
            order_id,
            user_id: actor.user_id.clone(),
            amount,
            currency: request
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            method: request.method.unwrap_or_else(|| DEFAULT_METHOD.to_string()),
            status: PaymentStatus::Processing,
            reference: reference::generate(now),
            created_at: now,
            updated_at: now,
        };
        self.inner.store.insert(payment.clone()).await?;

        let this = self.clone();
        let payment_id = payment.id;
        let delay = self.inner.delay;
        self.inner.scheduler.schedule(payment_id, delay, async move {
            if let Err(e) = this.settle(payment_id).await {
                tracing::error!(%payment_id, error = %e, "settlement failed");
            }
        });

        metrics::counter!("payments_created_total").increment(1);
        tracing::info!(payment_id = %payment.id, %order_id, amount = %payment.amount, "payment accepted");
        Ok(payment)
    }

    /// Moves a payment from `processing` to `completed`.
    ///
    /// Returns `false` without side effects if the payment is no longer
    /// processing, which makes duplicate fires harmless.
    #[tracing::instrument(skip(self))]
    pub async fn settle(&self, payment_id: PaymentId) -> Result<bool> {
        let update = self
            .inner
            .store
            .compare_and_set_status(
                payment_id,
                PaymentStatus::Processing,
                PaymentStatus::Completed,
                self.inner.clock.now(),
            )
            .await
            .map_err(not_found)?;

        let payment = match update {
            PaymentUpdate::Applied(payment) => payment,
            PaymentUpdate::Conflict(current) => {
                tracing::debug!(status = %current.status, "payment not processing, skipping settlement");
                return Ok(false);
            }
        };

        metrics::counter!("payments_settled_total").increment(1);
        tracing::info!(order_id = %payment.order_id, "payment settled");

        if let Err(e) = self.inner.orders.complete_order(payment.order_id).await {
            tracing::warn!(order_id = %payment.order_id, error = %e, "could not mark order completed");
        }
        self.inner
            .notifications
            .dispatch(Notification::payment_completed(
                payment.user_id.clone(),
                payment.id,
                payment.order_id,
                payment.amount,
                &payment.currency,
            ));
        Ok(true)
    }

    /// Refunds a completed payment. Exactly one of several concurrent
    /// refunds succeeds.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn refund(&self, payment_id: PaymentId, actor: &Actor) -> Result<Payment> {
        let payment = self.get(payment_id, actor).await?;
        if !payment.status.can_refund() {
            return Err(PaymentError::InvalidState {
                payment_id,
                status: payment.status,
            });
        }

        let update = self
            .inner
            .store
            .compare_and_set_status(
                payment_id,
                PaymentStatus::Completed,
                PaymentStatus::Refunded,
                self.inner.clock.now(),
            )
            .await
            .map_err(not_found)?;

        match update {
            PaymentUpdate::Applied(refunded) => {
                metrics::counter!("payments_refunded_total").increment(1);
                tracing::info!("payment refunded");
                Ok(refunded)
            }
            PaymentUpdate::Conflict(current) => Err(PaymentError::InvalidState {
                payment_id,
                status: current.status,
            }),
        }
    }

    /// Loads a payment visible to `actor` (owner or administrator).
    pub async fn get(&self, payment_id: PaymentId, actor: &Actor) -> Result<Payment> {
        let payment = self
            .inner
            .store
            .get(payment_id)
            .await?
            .ok_or(PaymentError::NotFound(payment_id))?;

        if !actor.can_access(&payment.user_id) {
            return Err(PaymentError::Forbidden);
        }
        Ok(payment)
    }

    /// The actor's own payments, newest first.
    pub async fn list(&self, actor: &Actor, page: PageRequest) -> Result<Page<Payment>> {
        Ok(self
            .inner
            .store
            .list_for_user(&actor.user_id, page)
            .await?)
    }

    /// Stops a pending settlement. Returns false if none was pending.
    pub fn cancel_settlement(&self, payment_id: PaymentId) -> bool {
        self.inner.scheduler.cancel(payment_id)
    }

    /// Drops settlements still waiting for their delay. Settlements already
    /// running are awaited so a completed payment never leaves its order
    /// pending.
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown().await;
    }
}

fn not_found(e: PaymentStoreError) -> PaymentError {
    match e {
        PaymentStoreError::NotFound(id) => PaymentError::NotFound(id),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clients::{InMemoryNotificationSink, NotificationKind};
    use common::{ManualClock, Money, UserId};
    use orders::{Order, OrderStatus};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    use crate::InMemoryPaymentStore;

    /// Order directory double: a fixed set of orders owned by users.
    #[derive(Default)]
    struct FakeOrders {
        owners: Mutex<HashMap<OrderId, UserId>>,
        completed: Mutex<Vec<OrderId>>,
        complete_latency: Mutex<Duration>,
    }

    impl FakeOrders {
        fn with_order(owner: &str) -> (Arc<Self>, OrderId) {
            let orders = Arc::new(Self::default());
            let order_id = OrderId::new();
            orders.owners.lock().insert(order_id, UserId::new(owner));
            (orders, order_id)
        }

        fn order(&self, order_id: OrderId, status: OrderStatus) -> orders::Result<Order> {
            let owners = self.owners.lock();
            let user_id = owners
                .get(&order_id)
                .cloned()
                .ok_or(OrderError::NotFound(order_id))?;
            let now = chrono::Utc::now();
            Ok(Order {
                id: order_id,
                user_id,
                status,
                total: Money::from_cents(100),
                shipping_address: serde_json::Value::Null,
                payment_method: None,
                items: Vec::new(),
                created_at: now,
                updated_at: now,
            })
        }
    }

    #[async_trait]
    impl OrderDirectory for FakeOrders {
        async fn find_order(&self, order_id: OrderId, actor: &Actor) -> orders::Result<Order> {
            let order = self.order(order_id, OrderStatus::Pending)?;
            if !actor.can_access(&order.user_id) {
                return Err(OrderError::Forbidden);
            }
            Ok(order)
        }

        async fn complete_order(&self, order_id: OrderId) -> orders::Result<Order> {
            let latency = *self.complete_latency.lock();
            tokio::time::sleep(latency).await;
            self.completed.lock().push(order_id);
            self.order(order_id, OrderStatus::Completed)
        }
    }

    struct Harness {
        settlement: PaymentSettlement,
        orders: Arc<FakeOrders>,
        order_id: OrderId,
        sink: InMemoryNotificationSink,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let (orders, order_id) = FakeOrders::with_order("alice");
        let sink = InMemoryNotificationSink::new();
        let clock = ManualClock::default();
        let (dispatcher, _worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 16);
        let settlement = PaymentSettlement::with_options(
            Arc::new(InMemoryPaymentStore::new()),
            orders.clone(),
            dispatcher,
            DEFAULT_SETTLEMENT_DELAY,
            Arc::new(clock.clone()),
        );
        Harness {
            settlement,
            orders,
            order_id,
            sink,
            clock,
        }
    }

    fn alice() -> Actor {
        Actor::user("alice")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_defaults_and_processing() {
        let h = harness();

        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(49995)))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Processing);
        assert_eq!(payment.currency, "USD");
        assert_eq!(payment.method, "credit_card");
        assert!(payment.reference.starts_with("PAY-"));
        assert!(h.settlement.scheduler().is_pending(payment.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_amount_or_missing_order() {
        let h = harness();

        for request in [
            CreatePayment::new(h.order_id, Money::zero()),
            CreatePayment::new(h.order_id, Money::from_cents(-5)),
            CreatePayment {
                amount: Some(Money::from_cents(100)),
                ..CreatePayment::default()
            },
        ] {
            let err = h.settlement.create(&alice(), request).await.unwrap_err();
            assert!(matches!(err, PaymentError::InvalidInput));
        }
        assert_eq!(h.settlement.scheduler().pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_or_foreign_order_is_not_found() {
        let h = harness();

        let unknown = h
            .settlement
            .create(&alice(), CreatePayment::new(OrderId::new(), Money::from_cents(100)))
            .await
            .unwrap_err();
        let foreign = h
            .settlement
            .create(
                &Actor::user("bob"),
                CreatePayment::new(h.order_id, Money::from_cents(100)),
            )
            .await
            .unwrap_err();
        let malformed = h
            .settlement
            .create(
                &alice(),
                CreatePayment {
                    order_id: Some("not-a-uuid".to_string()),
                    amount: Some(Money::from_cents(100)),
                    ..CreatePayment::default()
                },
            )
            .await
            .unwrap_err();

        for err in [unknown, foreign, malformed] {
            assert!(matches!(err, PaymentError::OrderNotFound));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_delay_exactly_once() {
        let h = harness();
        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(2500)))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let still = h.settlement.get(payment.id, &alice()).await.unwrap();
        assert_eq!(still.status, PaymentStatus::Processing);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let settled = h.settlement.get(payment.id, &alice()).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Completed);
        assert_eq!(h.settlement.scheduler().pending(), 0);

        // A duplicate fire changes nothing.
        assert!(!h.settlement.settle(payment.id).await.unwrap());
        assert_eq!(h.orders.completed.lock().as_slice(), &[h.order_id]);

        let sent = h.sink.wait_for(1).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::PaymentCompleted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_unknown_payment() {
        let h = harness();

        assert!(matches!(
            h.settlement.settle(PaymentId::new()).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_only_after_completion() {
        let h = harness();
        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(2500)))
            .await
            .unwrap();

        let err = h.settlement.refund(payment.id, &alice()).await.unwrap_err();
        assert!(matches!(
            err,
            PaymentError::InvalidState {
                status: PaymentStatus::Processing,
                ..
            }
        ));

        tokio::time::sleep(Duration::from_millis(1100)).await;

        let refunded = h.settlement.refund(payment.id, &alice()).await.unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);

        let again = h.settlement.refund(payment.id, &alice()).await.unwrap_err();
        assert!(matches!(
            again,
            PaymentError::InvalidState {
                status: PaymentStatus::Refunded,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_and_get_require_owner_or_admin() {
        let h = harness();
        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(2500)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let bob = Actor::user("bob");
        assert!(matches!(
            h.settlement.get(payment.id, &bob).await,
            Err(PaymentError::Forbidden)
        ));
        assert!(matches!(
            h.settlement.refund(payment.id, &bob).await,
            Err(PaymentError::Forbidden)
        ));

        let refunded = h
            .settlement
            .refund(payment.id, &Actor::admin("root"))
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentStatus::Refunded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_settlement_stays_processing() {
        let h = harness();
        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(2500)))
            .await
            .unwrap();

        assert!(h.settlement.cancel_settlement(payment.id));
        tokio::time::sleep(Duration::from_millis(2000)).await;

        let current = h.settlement.get(payment.id, &alice()).await.unwrap();
        assert_eq!(current.status, PaymentStatus::Processing);
        assert!(h.orders.completed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_is_paginated_newest_first() {
        let h = harness();
        let mut created = Vec::new();
        for cents in [100, 200, 300] {
            created.push(
                h.settlement
                    .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(cents)))
                    .await
                    .unwrap(),
            );
            h.clock.advance(chrono::Duration::seconds(1));
        }

        let page = h
            .settlement
            .list(&alice(), PageRequest::new(1, 2))
            .await
            .unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, created[2].id);
        assert!(
            h.settlement
                .list(&Actor::user("bob"), PageRequest::default())
                .await
                .unwrap()
                .items
                .is_empty()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_finishes_running_settlement() {
        let h = harness();
        *h.orders.complete_latency.lock() = Duration::from_millis(500);
        let payment = h
            .settlement
            .create(&alice(), CreatePayment::new(h.order_id, Money::from_cents(100)))
            .await
            .unwrap();

        // Payment already completed, order completion still in progress.
        tokio::time::sleep(DEFAULT_SETTLEMENT_DELAY + Duration::from_millis(200)).await;
        assert!(h.orders.completed.lock().is_empty());

        h.settlement.shutdown().await;

        assert_eq!(*h.orders.completed.lock(), vec![h.order_id]);
        assert_eq!(
            h.settlement.get(payment.id, &alice()).await.unwrap().status,
            PaymentStatus::Completed
        );
        assert_eq!(h.settlement.scheduler().pending(), 0);
    }
}
