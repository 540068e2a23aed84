//! Payment storage trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Page, PageRequest, PaymentId, UserId};
use parking_lot::RwLock;

use crate::{Payment, PaymentStatus, PaymentStoreError};

/// Outcome of a compare-and-set on the status field.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentUpdate {
    Applied(Payment),
    Conflict(Payment),
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: Payment) -> Result<(), PaymentStoreError>;

    async fn get(&self, payment_id: PaymentId) -> Result<Option<Payment>, PaymentStoreError>;

    /// A user's payments, newest first.
    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Payment>, PaymentStoreError>;

    /// Replaces the status only if it currently equals `expected`.
    async fn compare_and_set_status(
        &self,
        payment_id: PaymentId,
        expected: PaymentStatus,
        new: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<PaymentUpdate, PaymentStoreError>;
}

/// In-memory payment store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: Payment) -> Result<(), PaymentStoreError> {
        let mut payments = self.payments.write();
        if payments.contains_key(&payment.id) {
            return Err(PaymentStoreError::Duplicate(payment.id));
        }
        payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, payment_id: PaymentId) -> Result<Option<Payment>, PaymentStoreError> {
        Ok(self.payments.read().get(&payment_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: PageRequest,
    ) -> Result<Page<Payment>, PaymentStoreError> {
        let mut mine: Vec<Payment> = self
            .payments
            .read()
            .values()
            .filter(|p| &p.user_id == user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page.slice(mine))
    }

    async fn compare_and_set_status(
        &self,
        payment_id: PaymentId,
        expected: PaymentStatus,
        new: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<PaymentUpdate, PaymentStoreError> {
        let mut payments = self.payments.write();
        let payment = payments
            .get_mut(&payment_id)
            .ok_or(PaymentStoreError::NotFound(payment_id))?;

        if payment.status != expected {
            return Ok(PaymentUpdate::Conflict(payment.clone()));
        }
        payment.status = new;
        payment.updated_at = at;
        Ok(PaymentUpdate::Applied(payment.clone()))
    }
}
