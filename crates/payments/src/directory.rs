use async_trait::async_trait;
use common::{Actor, OrderId};
use orders::{Order, OrderOrchestrator};

/// What settlement needs from the order side: a visibility check when a
/// payment is taken and a completion hook once it settles.
#[async_trait]
pub trait OrderDirectory: Send + Sync {
    /// Loads the order as seen by `actor`.
    async fn find_order(&self, order_id: OrderId, actor: &Actor) -> orders::Result<Order>;

    /// Marks the order completed. Terminal orders are left unchanged.
    async fn complete_order(&self, order_id: OrderId) -> orders::Result<Order>;
}

#[async_trait]
impl OrderDirectory for OrderOrchestrator {
    async fn find_order(&self, order_id: OrderId, actor: &Actor) -> orders::Result<Order> {
        self.get(order_id, actor).await
    }

    async fn complete_order(&self, order_id: OrderId) -> orders::Result<Order> {
        self.mark_completed(order_id).await
    }
}
