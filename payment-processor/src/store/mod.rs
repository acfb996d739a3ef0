//! Ledger persistence.
//!
//! The orchestrator only sees two traits: [`LedgerStore`], which owns the
//! scoped-transaction primitive, and [`LedgerConn`], the handle passed into a
//! transaction. Every read and write goes through a handle, so code running
//! inside a transaction cannot open a second one and always reuses the
//! transaction it was given.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::future::BoxFuture;
use shared::{Money, Payment, PaymentAction, PaymentMethod, PaymentStatus, PaymentType};
use thiserror::Error;
use uuid::Uuid;

use crate::error::Error;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payment {0} does not exist")]
    NoSuchPayment(Uuid),
    #[error("payment action {0} does not exist")]
    NoSuchAction(Uuid),
    #[error("stored record is invalid: {0}")]
    InvalidRecord(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Selects ledger entries. Empty id lists do not restrict the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    pub payment_ids: Vec<Uuid>,
    pub action_ids: Vec<Uuid>,
    pub incomplete_only: bool,
}

impl ActionFilter {
    pub fn for_payment(payment_id: Uuid) -> Self {
        Self {
            payment_ids: vec![payment_id],
            ..Self::default()
        }
    }

    pub fn for_action(action_id: Uuid) -> Self {
        Self {
            action_ids: vec![action_id],
            ..Self::default()
        }
    }

    pub fn incomplete() -> Self {
        Self {
            incomplete_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, action: &PaymentAction) -> bool {
        (self.payment_ids.is_empty() || self.payment_ids.contains(&action.payment_id))
            && (self.action_ids.is_empty() || self.action_ids.contains(&action.id))
            && (!self.incomplete_only || !action.is_processed())
    }
}

/// A payment before the store has assigned its id and creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub amount: Money,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentAction {
    pub payment_id: Uuid,
    pub amount: u64,
    pub action_type: PaymentType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentField {
    Status,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentActionField {
    ResponseCode,
    ProcessedAt,
}

/// Operations available inside a ledger transaction.
#[async_trait]
pub trait LedgerConn: Send {
    async fn get_payment(&mut self, id: Uuid) -> StoreResult<Payment>;

    /// Like `get_payment`, but holds a write lock on the payment until the
    /// transaction ends.
    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Payment>;

    /// Matching entries ordered by creation time.
    async fn list_payment_actions(&mut self, filter: &ActionFilter)
        -> StoreResult<Vec<PaymentAction>>;

    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment>;

    /// Fails with [`StoreError::NoSuchPayment`] if the payment is missing.
    async fn create_payment_action(&mut self, action: NewPaymentAction)
        -> StoreResult<PaymentAction>;

    async fn update_payment(&mut self, payment: &Payment, fields: &[PaymentField])
        -> StoreResult<()>;

    async fn update_payment_action(
        &mut self,
        action: &PaymentAction,
        fields: &[PaymentActionField],
    ) -> StoreResult<()>;
}

pub type TxFuture<'c, R> = BoxFuture<'c, Result<R, Error>>;

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Runs `f` inside one transaction: committed if it returns `Ok`, rolled
    /// back otherwise. The error is passed through unchanged.
    async fn execute_in_transaction<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn LedgerConn) -> TxFuture<'c, R> + Send + 'static;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn action(payment_id: Uuid, processed: bool) -> PaymentAction {
        PaymentAction {
            id: Uuid::new_v4(),
            payment_id,
            amount: 10,
            action_type: PaymentType::Capture,
            response_code: processed.then(|| "00".to_string()),
            created_at: Utc::now(),
            processed_at: processed.then(Utc::now),
        }
    }

    #[test]
    fn test_action_filter_matching() {
        let payment_id = Uuid::new_v4();
        let pending = action(payment_id, false);
        let done = action(payment_id, true);
        let other = action(Uuid::new_v4(), false);

        let by_payment = ActionFilter::for_payment(payment_id);
        assert!(by_payment.matches(&pending));
        assert!(by_payment.matches(&done));
        assert!(!by_payment.matches(&other));

        let by_action = ActionFilter::for_action(done.id);
        assert!(by_action.matches(&done));
        assert!(!by_action.matches(&pending));

        let incomplete = ActionFilter::incomplete();
        assert!(incomplete.matches(&pending));
        assert!(incomplete.matches(&other));
        assert!(!incomplete.matches(&done));

        assert!(ActionFilter::default().matches(&done));
    }
}
