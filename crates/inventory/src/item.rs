//! Ledger records.

use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

/// Reorder level given to items created without one.
pub const DEFAULT_REORDER_LEVEL: u32 = 10;

/// Stock and reservation counters for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub product_id: ProductId,
    pub stock: u32,
    pub reserved: u32,
    pub warehouse: Option<String>,
    pub reorder_level: u32,
    pub last_restock: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Quantity purchasable right now.
    pub fn available(&self) -> u32 {
        self.stock.saturating_sub(self.reserved)
    }

    pub fn availability(&self) -> Availability {
        Availability {
            stock: self.stock,
            reserved: self.reserved,
            available: self.available(),
        }
    }

    /// True once available stock has dropped to the reorder level.
    pub fn needs_reorder(&self) -> bool {
        self.available() <= self.reorder_level
    }
}

/// Read-only projection of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub stock: u32,
    pub reserved: u32,
    pub available: u32,
}

/// Answer to "could this quantity be reserved right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
    pub in_stock: bool,
}

/// Kind of mutation recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogAction {
    Reserved,
    Released,
    Added,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Reserved => "reserved",
            LogAction::Released => "released",
            LogAction::Added => "added",
        }
    }
}

impl std::fmt::Display for LogAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(LogAction::Reserved),
            "released" => Ok(LogAction::Released),
            "added" => Ok(LogAction::Added),
            other => Err(format!("unknown inventory log action: {other}")),
        }
    }
}

/// Immutable audit record of one successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLogEntry {
    pub id: i64,
    pub product_id: ProductId,
    pub action: LogAction,
    pub quantity: u32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Administrative update. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestockRequest {
    pub stock: Option<u32>,
    pub warehouse: Option<String>,
    pub reorder_level: Option<u32>,
}

impl RestockRequest {
    pub fn stock(stock: u32) -> Self {
        Self {
            stock: Some(stock),
            ..Self::default()
        }
    }
}

/// Result of a restock: the item and whether it was created by this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestockOutcome {
    pub item: InventoryItem,
    pub created: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stock: u32, reserved: u32) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            product_id: ProductId::new("p1"),
            stock,
            reserved,
            warehouse: None,
            reorder_level: DEFAULT_REORDER_LEVEL,
            last_restock: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn available_is_stock_minus_reserved() {
        assert_eq!(item(10, 3).available(), 7);
        assert_eq!(item(10, 10).available(), 0);
    }

    #[test]
    fn needs_reorder_at_threshold() {
        assert!(item(20, 10).needs_reorder());
        assert!(!item(21, 10).needs_reorder());
    }

    #[test]
    fn log_action_parses_its_own_name() {
        for action in [LogAction::Reserved, LogAction::Released, LogAction::Added] {
            assert_eq!(action.as_str().parse::<LogAction>().unwrap(), action);
        }
        assert!("removed".parse::<LogAction>().is_err());
    }

    #[test]
    fn item_serializes_camel_case() {
        let json = serde_json::to_value(item(5, 1)).unwrap();
        assert_eq!(json["productId"], "p1");
        assert_eq!(json["reorderLevel"], 10);
        assert!(json["lastRestock"].is_null());
    }
}
