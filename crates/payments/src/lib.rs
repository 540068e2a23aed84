//! Payments tied to orders.
//!
//! A payment is accepted in `processing` and settled later by a scheduled
//! task, never by the request that created it. Settlement and refund are
//! compare-and-set transitions, so a duplicate timer fire or a second refund
//! changes nothing.

pub mod directory;
pub mod error;
pub mod model;
pub mod reference;
pub mod scheduler;
pub mod settlement;
pub mod store;

pub use directory::OrderDirectory;
pub use error::{PaymentError, PaymentStoreError, Result};
pub use model::{CreatePayment, PROCESSING_MESSAGE, Payment, PaymentStatus};
pub use scheduler::SettlementScheduler;
pub use settlement::{DEFAULT_SETTLEMENT_DELAY, PaymentSettlement};
pub use store::{InMemoryPaymentStore, PaymentStore, PaymentUpdate};
