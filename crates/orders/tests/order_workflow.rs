//! End-to-end order workflow against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use clients::{
    InMemoryCatalog, InMemoryNotificationSink, NotificationDispatcher, NotificationKind,
    ProductSnapshot,
};
use common::{Actor, Money, PageRequest, ProductId};
use inventory::{InMemoryInventoryLedger, InventoryLedger, LogAction, reasons};
use orders::{
    CreateOrder, InMemoryOrderStore, OrderError, OrderItemRequest, OrderOrchestrator, OrderStatus,
};

fn setup() -> (
    OrderOrchestrator,
    InMemoryCatalog,
    InMemoryInventoryLedger,
    InMemoryNotificationSink,
) {
    let catalog = InMemoryCatalog::demo();
    let ledger = InMemoryInventoryLedger::new();
    let sink = InMemoryNotificationSink::new();
    let (dispatcher, _worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 64);
    let orchestrator = OrderOrchestrator::new(
        Arc::new(catalog.clone()),
        Arc::new(ledger.clone()),
        Arc::new(InMemoryOrderStore::new()),
        dispatcher,
    );
    (orchestrator, catalog, ledger, sink)
}

#[tokio::test]
async fn place_then_cancel_restores_stock() {
    let (orchestrator, _, ledger, sink) = setup();
    let alice = Actor::user("alice");
    let p1 = ProductId::new("p1");

    let order = orchestrator
        .create(
            &alice,
            CreateOrder::with_items([OrderItemRequest::new("p1", 5)]),
        )
        .await
        .unwrap();

    assert_eq!(order.total, Money::from_decimal(499.95));
    assert_eq!(order.total.to_string(), "499.95");
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].price, Money::from_decimal(99.99));
    assert_eq!(ledger.availability(&p1).await.unwrap().available, 115);

    let cancelled = orchestrator.cancel(order.id, &alice).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(ledger.availability(&p1).await.unwrap().available, 120);

    let err = orchestrator.cancel(order.id, &alice).await.unwrap_err();
    assert!(matches!(err, OrderError::AlreadyCancelled(_)));
    assert_eq!(
        orchestrator.status(order.id).await.unwrap().status,
        OrderStatus::Cancelled
    );

    let logs = ledger.logs(&p1, PageRequest::default()).await.unwrap();
    let actions: Vec<LogAction> = logs.items.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![LogAction::Released, LogAction::Reserved, LogAction::Added]
    );
    assert_eq!(logs.items[0].reason, reasons::ORDER_CANCELLATION);
    assert_eq!(logs.items[1].reason, reasons::ORDER_PLACEMENT);

    let sent = tokio::time::timeout(Duration::from_secs(1), sink.wait_for(2))
        .await
        .unwrap();
    assert_eq!(sent[0].kind, NotificationKind::OrderCreated);
    assert_eq!(sent[1].kind, NotificationKind::OrderCancelled);
}

#[tokio::test]
async fn catalog_price_change_does_not_touch_existing_orders() {
    let (orchestrator, catalog, _, _) = setup();
    let alice = Actor::user("alice");

    let order = orchestrator
        .create(
            &alice,
            CreateOrder::with_items([OrderItemRequest::new("p3", 2)]),
        )
        .await
        .unwrap();
    catalog.upsert(ProductSnapshot::new(
        "p3",
        "Coffee Mug XL",
        Money::from_cents(1999),
        300,
    ));

    let stored = orchestrator.get(order.id, &alice).await.unwrap();
    assert_eq!(stored.items[0].title, "Coffee Mug");
    assert_eq!(stored.total, Money::from_cents(1998));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_orders_never_oversell() {
    let (orchestrator, catalog, _, _) = setup();
    catalog.upsert(ProductSnapshot::new(
        "limited",
        "Limited Edition",
        Money::from_cents(5000),
        10,
    ));

    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create(
                    &Actor::user("alice"),
                    CreateOrder::with_items([OrderItemRequest::new("limited", 7)]),
                )
                .await
        })
    };
    let second = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .create(
                    &Actor::user("bob"),
                    CreateOrder::with_items([OrderItemRequest::new("limited", 5)]),
                )
                .await
        })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let placed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(placed, 1);

    let failure = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(failure, OrderError::Reservation { .. }));
}
