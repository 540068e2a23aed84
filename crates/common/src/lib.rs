//! Shared types for the order fulfillment services.
//!
//! Everything here is plain data or a small capability handle. Nothing in this
//! crate performs I/O.

pub mod actor;
pub mod clock;
pub mod money;
pub mod page;
pub mod types;

pub use actor::{Actor, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use money::Money;
pub use page::{Page, PageRequest};
pub use types::{IdParseError, OrderId, PaymentId, ProductId, UserId};
