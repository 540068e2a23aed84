//! Inventory reservation ledger.
//!
//! Tracks, per product, how much stock exists and how much of it is held by
//! pending orders. Every successful mutation appends an entry to the
//! product's action log, which is the audit trail for reconciling drift.
//!
//! Invariant kept by every implementation: `0 <= reserved <= stock`, so
//! `available = stock - reserved` is never negative. Mutations on the same
//! product are serialized; different products proceed in parallel.

pub mod error;
pub mod item;
pub mod ledger;
pub mod memory;
pub mod postgres;

pub use error::{LedgerError, Result};
pub use item::{
    Availability, InventoryItem, InventoryLogEntry, LogAction, RestockOutcome, RestockRequest,
    StockCheck, DEFAULT_REORDER_LEVEL,
};
pub use ledger::{InventoryLedger, reasons, spawn_key_expiry};
pub use memory::InMemoryInventoryLedger;
pub use postgres::PostgresInventoryLedger;
