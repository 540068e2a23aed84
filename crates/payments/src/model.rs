use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

/// Returned alongside a freshly created payment.
pub const PROCESSING_MESSAGE: &str = "Payment processing. Status will update shortly.";

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_METHOD: &str = "credit_card";

/// The status of a payment.
///
/// ```text
/// Processing ──► Completed ──► Refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Processing,
    Completed,
    Refunded,
}

impl PaymentStatus {
    pub fn can_settle(&self) -> bool {
        matches!(self, PaymentStatus::Processing)
    }

    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub method: String,
    pub status: PaymentStatus,
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment request. `order_id` stays a string so that a malformed id is
/// reported the same way as an unknown order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayment {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Money>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

impl CreatePayment {
    pub fn new(order_id: OrderId, amount: Money) -> Self {
        Self {
            order_id: Some(order_id.to_string()),
            amount: Some(amount),
            ..Self::default()
        }
    }
}
