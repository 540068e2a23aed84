//! Outbound collaborators of the order workflow.
//!
//! - [`catalog`]: read-only product snapshots. Failures are binding for the
//!   caller.
//! - [`notification`]: user-facing messages delivered best-effort through a
//!   bounded queue. Failures are logged and never reach the caller.

pub mod catalog;
pub mod notification;

use std::time::Duration;

pub use catalog::{CatalogError, CatalogLookup, HttpCatalog, InMemoryCatalog, ProductSnapshot};
pub use notification::{
    HttpNotificationSink, InMemoryNotificationSink, Notification, NotificationDispatcher,
    NotificationError, NotificationKind, NotificationSink, TracingNotificationSink,
};

/// Builds the shared HTTP client used by the outbound adapters.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(timeout).build()
}
