//! Orders: records, status machine, storage and the orchestrator.
//!
//! The orchestrator is the only writer of orders. Creation validates against
//! the catalog, reserves every line in the inventory ledger (all or nothing),
//! persists, then notifies. Cancellation releases the same quantities and
//! flips the status with a compare-and-set.

pub mod error;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod store;

pub use error::{OrderError, Result, StoreError};
pub use model::{CreateOrder, Order, OrderItemRequest, OrderLine, OrderStatusView};
pub use orchestrator::OrderOrchestrator;
pub use state::OrderStatus;
pub use store::{InMemoryOrderStore, OrderStore, StatusUpdate};
