use async_trait::async_trait;
use chrono::Utc;
use shared::{Payment, PaymentAction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ActionFilter, LedgerConn, LedgerStore, NewPayment, NewPaymentAction, PaymentActionField,
    PaymentField, StoreError, StoreResult, TxFuture,
};
use crate::error::Error;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    payments: HashMap<Uuid, Payment>,
    // Insertion order is creation order.
    actions: Vec<PaymentAction>,
}

/// A ledger kept in process memory.
///
/// Transactions run one at a time against a private copy of the state that
/// replaces the shared state on commit, which gives serializable isolation.
/// Intended for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryConn {
    state: LedgerState,
}

impl MemoryConn {
    fn payment(&self, id: Uuid) -> StoreResult<Payment> {
        self.state
            .payments
            .get(&id)
            .cloned()
            .ok_or(StoreError::NoSuchPayment(id))
    }
}

#[async_trait]
impl LedgerConn for MemoryConn {
    async fn get_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.payment(id)
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.payment(id)
    }

    async fn list_payment_actions(
        &mut self,
        filter: &ActionFilter,
    ) -> StoreResult<Vec<PaymentAction>> {
        Ok(self
            .state
            .actions
            .iter()
            .filter(|action| filter.matches(action))
            .cloned()
            .collect())
    }

    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        let payment = Payment {
            id: Uuid::new_v4(),
            amount: payment.amount,
            status: payment.status,
            payment_method: payment.payment_method,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn create_payment_action(
        &mut self,
        action: NewPaymentAction,
    ) -> StoreResult<PaymentAction> {
        if !self.state.payments.contains_key(&action.payment_id) {
            return Err(StoreError::NoSuchPayment(action.payment_id));
        }
        let action = PaymentAction {
            id: Uuid::new_v4(),
            payment_id: action.payment_id,
            amount: action.amount,
            action_type: action.action_type,
            response_code: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.state.actions.push(action.clone());
        Ok(action)
    }

    async fn update_payment(
        &mut self,
        payment: &Payment,
        fields: &[PaymentField],
    ) -> StoreResult<()> {
        let stored = self
            .state
            .payments
            .get_mut(&payment.id)
            .ok_or(StoreError::NoSuchPayment(payment.id))?;
        for field in fields {
            match field {
                PaymentField::Status => stored.status = payment.status,
                PaymentField::UpdatedAt => stored.updated_at = payment.updated_at,
            }
        }
        Ok(())
    }

    async fn update_payment_action(
        &mut self,
        action: &PaymentAction,
        fields: &[PaymentActionField],
    ) -> StoreResult<()> {
        let stored = self
            .state
            .actions
            .iter_mut()
            .find(|stored| stored.id == action.id)
            .ok_or(StoreError::NoSuchAction(action.id))?;
        for field in fields {
            match field {
                PaymentActionField::ResponseCode => {
                    stored.response_code = action.response_code.clone()
                }
                PaymentActionField::ProcessedAt => stored.processed_at = action.processed_at,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn execute_in_transaction<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn LedgerConn) -> TxFuture<'c, R> + Send + 'static,
    {
        let mut committed = self.state.lock().await;
        let mut conn = MemoryConn {
            state: committed.clone(),
        };
        let result = f(&mut conn).await;
        if result.is_ok() {
            *committed = conn.state;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Card, Expiry, Money, PaymentMethod, PaymentStatus, PaymentType};

    fn new_payment() -> NewPayment {
        NewPayment {
            amount: Money::new(1000, "GBP".parse().unwrap()),
            status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Card(Card {
                number: "4242424242424242".to_string(),
                expiry: Expiry { month: 1, year: 2099 },
            }),
        }
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let ledger = MemoryLedger::new();
        let payment = ledger
            .execute_in_transaction(|conn| {
                Box::pin(async move {
                    let payment = conn.create_payment(new_payment()).await?;
                    conn.create_payment_action(NewPaymentAction {
                        payment_id: payment.id,
                        amount: 1000,
                        action_type: PaymentType::Authorization,
                    })
                    .await?;
                    Ok::<_, Error>(payment)
                })
            })
            .await
            .unwrap();

        let (stored, actions) = ledger
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let stored = conn.get_payment(payment.id).await?;
                    let actions = conn
                        .list_payment_actions(&ActionFilter::for_payment(payment.id))
                        .await?;
                    Ok::<_, Error>((stored, actions))
                })
            })
            .await
            .unwrap();

        assert_eq!(stored, payment);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].response_code, None);
        assert_eq!(actions[0].processed_at, None);
    }

    #[tokio::test]
    async fn test_error_rolls_back_writes() {
        let ledger = MemoryLedger::new();
        let result: Result<(), Error> = ledger
            .execute_in_transaction(|conn| {
                Box::pin(async move {
                    conn.create_payment(new_payment()).await?;
                    Err::<(), _>(Error::Validation("abort".to_string()))
                })
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let actions = ledger
            .execute_in_transaction(|conn| {
                Box::pin(async move {
                    let all = conn.list_payment_actions(&ActionFilter::default()).await?;
                    Ok::<_, Error>(all)
                })
            })
            .await
            .unwrap();
        assert!(actions.is_empty());
        assert!(ledger.state.lock().await.payments.is_empty());
    }

    #[tokio::test]
    async fn test_action_requires_existing_payment() {
        let ledger = MemoryLedger::new();
        let missing = Uuid::new_v4();
        let result = ledger
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let action = conn
                        .create_payment_action(NewPaymentAction {
                            payment_id: missing,
                            amount: 1,
                            action_type: PaymentType::Capture,
                        })
                        .await?;
                    Ok::<_, Error>(action)
                })
            })
            .await;
        assert!(matches!(result, Err(Error::PaymentNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_update_only_touches_requested_fields() {
        let ledger = MemoryLedger::new();
        let updated = ledger
            .execute_in_transaction(|conn| {
                Box::pin(async move {
                    let mut payment = conn.create_payment(new_payment()).await?;
                    payment.status = PaymentStatus::Authorized;
                    payment.updated_at = Some(Utc::now());
                    conn.update_payment(&payment, &[PaymentField::Status]).await?;
                    let stored = conn.get_payment(payment.id).await?;
                    Ok::<_, Error>(stored)
                })
            })
            .await
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::Authorized);
        assert_eq!(updated.updated_at, None);
    }
}
