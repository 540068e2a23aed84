//! Best-effort user notifications.
//!
//! Producers hand messages to a [`NotificationDispatcher`], which only ever
//! does a non-blocking `try_send` onto a bounded queue. A detached worker
//! drains the queue into a [`NotificationSink`]. A full queue drops the
//! message; a failing sink is logged. Neither is reported to the producer.

use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, OrderId, PaymentId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Kinds of user-facing events emitted by the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderCreated,
    OrderCancelled,
    PaymentCompleted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OrderCreated => "order_created",
            NotificationKind::OrderCancelled => "order_cancelled",
            NotificationKind::PaymentCompleted => "payment_completed",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Body posted to the notification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn order_created(user_id: UserId, order_id: OrderId) -> Self {
        Self {
            user_id,
            kind: NotificationKind::OrderCreated,
            title: "Order created".to_string(),
            message: format!("Your order {order_id} has been created"),
            data: serde_json::json!({ "orderId": order_id }),
        }
    }

    pub fn order_cancelled(user_id: UserId, order_id: OrderId) -> Self {
        Self {
            user_id,
            kind: NotificationKind::OrderCancelled,
            title: "Order cancelled".to_string(),
            message: format!("Order {order_id} has been cancelled"),
            data: serde_json::json!({ "orderId": order_id }),
        }
    }

    pub fn payment_completed(
        user_id: UserId,
        payment_id: PaymentId,
        order_id: OrderId,
        amount: Money,
        currency: &str,
    ) -> Self {
        Self {
            user_id,
            kind: NotificationKind::PaymentCompleted,
            title: "Payment Successful".to_string(),
            message: format!("Payment of {currency} {amount} for order {order_id} completed"),
            data: serde_json::json!({ "paymentId": payment_id, "orderId": order_id }),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Where notifications end up.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Posts to `{base_url}/notifications`.
#[derive(Debug, Clone)]
pub struct HttpNotificationSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationSink {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(format!("{}/notifications", self.base_url))
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Delivery(format!(
                "notification service responded with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Writes notifications to the log. Used when no notification service is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            user_id = %notification.user_id,
            kind = %notification.kind,
            message = %notification.message,
            "notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemorySinkState {
    sent: Vec<Notification>,
    fail: bool,
}

/// Recording sink for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationSink {
    state: Arc<Mutex<InMemorySinkState>>,
    delivered: Arc<Notify>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery fail while set.
    pub fn set_fail(&self, fail: bool) {
        self.state.lock().fail = fail;
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.state.lock().sent.clone()
    }

    /// Waits until at least `count` notifications were delivered.
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        loop {
            let delivered = self.delivered.notified();
            {
                let state = self.state.lock();
                if state.sent.len() >= count {
                    return state.sent.clone();
                }
            }
            delivered.await;
        }
    }
}

#[async_trait]
impl NotificationSink for InMemoryNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        {
            let mut state = self.state.lock();
            if state.fail {
                return Err(NotificationError::Delivery("sink failing".to_string()));
            }
            state.sent.push(notification.clone());
        }
        self.delivered.notify_waiters();
        Ok(())
    }
}

/// Fire-and-forget front of the notification queue.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Starts the delivery worker. The worker exits once every dispatcher
    /// clone has been dropped and the queue is drained.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(deliver(rx, sink));
        (Self { tx }, worker)
    }

    /// Queues a notification without waiting. Never fails the caller.
    pub fn dispatch(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                metrics::counter!("notifications_dropped_total").increment(1);
                tracing::warn!(
                    kind = %dropped.kind,
                    user_id = %dropped.user_id,
                    "notification queue full, dropping"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                metrics::counter!("notifications_dropped_total").increment(1);
                tracing::warn!(kind = %dropped.kind, "notification worker stopped, dropping");
            }
        }
    }
}

async fn deliver(mut rx: mpsc::Receiver<Notification>, sink: Arc<dyn NotificationSink>) {
    while let Some(notification) = rx.recv().await {
        match sink.send(&notification).await {
            Ok(()) => {
                metrics::counter!("notifications_sent_total", "type" => notification.kind.as_str())
                    .increment(1);
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total").increment(1);
                tracing::warn!(kind = %notification.kind, error = %e, "notification failed");
            }
        }
    }
    tracing::debug!("notification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(user: &str) -> Notification {
        Notification::order_created(UserId::new(user), OrderId::new())
    }

    #[test]
    fn serializes_wire_shape() {
        let order_id = OrderId::new();
        let json =
            serde_json::to_value(Notification::order_cancelled(UserId::new("u1"), order_id))
                .unwrap();

        assert_eq!(json["userId"], "u1");
        assert_eq!(json["type"], "order_cancelled");
        assert_eq!(json["title"], "Order cancelled");
        assert_eq!(json["data"]["orderId"], order_id.to_string());
    }

    #[test]
    fn payment_message_includes_amount() {
        let n = Notification::payment_completed(
            UserId::new("u1"),
            PaymentId::new(),
            OrderId::new(),
            Money::from_cents(49995),
            "USD",
        );
        assert!(n.message.starts_with("Payment of USD 499.95 for order "));
    }

    #[tokio::test]
    async fn dispatcher_delivers_to_sink() {
        let sink = InMemoryNotificationSink::new();
        let (dispatcher, _worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 8);

        dispatcher.dispatch(sample("u1"));
        dispatcher.dispatch(sample("u2"));

        let sent = tokio::time::timeout(Duration::from_secs(1), sink.wait_for(2))
            .await
            .unwrap();
        assert_eq!(sent[0].user_id, UserId::new("u1"));
        assert_eq!(sent[1].user_id, UserId::new("u2"));
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_worker() {
        let sink = InMemoryNotificationSink::new();
        let (dispatcher, worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 8);

        sink.set_fail(true);
        dispatcher.dispatch(sample("lost"));
        drop(dispatcher);
        worker.await.unwrap();
        assert!(sink.sent().is_empty());

        let (dispatcher, _worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 8);
        sink.set_fail(false);
        dispatcher.dispatch(sample("u1"));
        let sent = tokio::time::timeout(Duration::from_secs(1), sink.wait_for(1))
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn full_queue_drops_without_blocking() {
        let sink = InMemoryNotificationSink::new();
        let (dispatcher, worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 1);

        // The worker cannot run until this task yields, so the second and
        // third messages find the queue full.
        dispatcher.dispatch(sample("u1"));
        dispatcher.dispatch(sample("u2"));
        dispatcher.dispatch(sample("u3"));
        drop(dispatcher);
        worker.await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, UserId::new("u1"));
    }

    #[tokio::test]
    async fn dispatch_after_worker_stopped_is_harmless() {
        let sink = InMemoryNotificationSink::new();
        let (dispatcher, worker) = NotificationDispatcher::spawn(Arc::new(sink.clone()), 4);
        worker.abort();
        let _ = worker.await;

        dispatcher.dispatch(sample("u1"));

        assert!(sink.sent().is_empty());
    }
}
