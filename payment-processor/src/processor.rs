//! The payment lifecycle orchestrator.
//!
//! Every operation runs in three phases:
//!
//! 1. a ledger transaction that locks the payment, checks the operation
//!    against the state machine and the ledger totals, and writes a pending
//!    action;
//! 2. the issuer call, outside any transaction and bounded by a timeout;
//! 3. a second transaction that writes the issuer's code onto the action and
//!    re-derives the payment status from the ledger.
//!
//! If phase 2 fails the pending action is left as evidence of an unknown
//! outcome. If phase 3 fails the caller gets [`Error::OutcomeUpdateFailed`]
//! and a [`ReconciliationAlert`] is raised.

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    valid_card_number, Money, Payment, PaymentAction, PaymentMethod, PaymentStatus, PaymentType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alert::{AlertSink, ReconciliationAlert};
use crate::error::{Error, Result};
use crate::issuer::{IssuerGateway, IssuerRequest, IssuerResponse};
use crate::ledger::{check_operation, LedgerSummary};
use crate::store::{
    ActionFilter, LedgerConn, LedgerStore, NewPayment, NewPaymentAction, PaymentActionField,
    PaymentField,
};

pub const DEFAULT_ISSUER_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest amount the ledger columns can hold.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

/// The operations offered to transports.
#[async_trait]
pub trait PaymentOperations: Send + Sync + 'static {
    /// Creates a payment and authorizes `amount` against the card.
    async fn authorize(&self, amount: Money, payment_method: PaymentMethod) -> Result<Payment>;

    /// Captures `amount` minor units of an authorized payment.
    async fn capture(&self, payment_id: Uuid, amount: u64) -> Result<Payment>;

    /// Refunds `amount` minor units of the captured total.
    async fn refund(&self, payment_id: Uuid, amount: u64) -> Result<Payment>;

    /// Voids the whole authorization.
    async fn void(&self, payment_id: Uuid) -> Result<Payment>;

    async fn get_payment(&self, payment_id: Uuid) -> Result<Payment>;

    async fn list_payment_actions(&self, payment_id: Uuid) -> Result<Vec<PaymentAction>>;

    /// The payment and its ledger, read in one transaction.
    async fn payment_with_actions(&self, payment_id: Uuid)
        -> Result<(Payment, Vec<PaymentAction>)>;

    /// Actions whose issuer outcome was never recorded, oldest first.
    async fn list_incomplete_actions(&self) -> Result<Vec<PaymentAction>>;

    /// Writes an issuer outcome onto an action. Replaying it is a no-op.
    async fn record_outcome(&self, action_id: Uuid, response_code: String) -> Result<Payment>;
}

pub struct Processor<S, I> {
    store: S,
    issuer: I,
    alerts: Arc<dyn AlertSink>,
    issuer_timeout: Duration,
}

impl<S, I> Processor<S, I>
where
    S: LedgerStore,
    I: IssuerGateway,
{
    pub fn new(store: S, issuer: I, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            store,
            issuer,
            alerts,
            issuer_timeout: DEFAULT_ISSUER_TIMEOUT,
        }
    }

    pub fn with_issuer_timeout(mut self, timeout: Duration) -> Self {
        self.issuer_timeout = timeout;
        self
    }

    async fn call_issuer(
        &self,
        payment: &Payment,
        action: &PaymentAction,
    ) -> Result<IssuerResponse> {
        let request = IssuerRequest {
            amount: payment.amount.with_minor_units(action.amount),
            operation: action.action_type,
            payment_method: payment.payment_method.clone(),
        };

        let call = self.issuer.create_issuer_request(request);
        match tokio::time::timeout(self.issuer_timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                warn!(
                    "Issuer request for action {} of payment {} failed: {}",
                    action.id, payment.id, e
                );
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    "Issuer request for action {} of payment {} timed out after {:?}",
                    action.id, payment.id, self.issuer_timeout
                );
                Err(Error::IssuerTimeout(self.issuer_timeout))
            }
        }
    }

    /// Phase C. On failure the original error is wrapped and an alert raised.
    async fn complete(
        &self,
        payment: &Payment,
        action: &PaymentAction,
        response_code: String,
    ) -> Result<Payment> {
        match self.apply_outcome(action.id, response_code.clone()).await {
            Ok(updated) => {
                info!(
                    "{} of {} on payment {} finished with code {}; payment is {}",
                    action.action_type,
                    payment.amount.with_minor_units(action.amount),
                    updated.id,
                    response_code,
                    updated.status
                );
                Ok(updated)
            }
            Err(err) => {
                error!(
                    "Unable to record issuer outcome {} for action {} of payment {}: {}",
                    response_code, action.id, payment.id, err
                );
                let alert = ReconciliationAlert {
                    payment_id: payment.id,
                    action_id: action.id,
                    operation: action.action_type,
                    amount: payment.amount.with_minor_units(action.amount),
                    response_code,
                    error: err.to_string(),
                    raised_at: Utc::now(),
                };
                if let Err(alert_err) = self.alerts.raise(alert).await {
                    error!(
                        "Failed to persist reconciliation alert for action {}: {}",
                        action.id, alert_err
                    );
                }
                Err(Error::OutcomeUpdateFailed {
                    payment_id: payment.id,
                    action_id: action.id,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn apply_outcome(&self, action_id: Uuid, response_code: String) -> Result<Payment> {
        self.store
            .execute_in_transaction(move |conn| {
                Box::pin(async move { record_outcome_in(conn, action_id, response_code).await })
            })
            .await
    }

    async fn run_operation(
        &self,
        payment_id: Uuid,
        operation: PaymentType,
        requested: u64,
    ) -> Result<Payment> {
        let (payment, action) = self
            .store
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let payment = conn.lock_payment(payment_id).await?;
                    let actions = conn
                        .list_payment_actions(&ActionFilter::for_payment(payment_id))
                        .await?;
                    let summary = LedgerSummary::fold(&actions);
                    let amount = check_operation(&payment, &summary, operation, requested)?;
                    let action = conn
                        .create_payment_action(NewPaymentAction {
                            payment_id,
                            amount,
                            action_type: operation,
                        })
                        .await?;
                    Ok::<_, Error>((payment, action))
                })
            })
            .await?;

        info!(
            "Recorded pending {} action {} for payment {}",
            operation, action.id, payment_id
        );

        let response = self.call_issuer(&payment, &action).await?;
        self.complete(&payment, &action, response.auth_code).await
    }
}

async fn find_action(conn: &mut dyn LedgerConn, action_id: Uuid) -> Result<PaymentAction> {
    conn.list_payment_actions(&ActionFilter::for_action(action_id))
        .await?
        .into_iter()
        .next()
        .ok_or(Error::ActionNotFound(action_id))
}

/// Writes an outcome and re-derives the payment status, inside the caller's
/// transaction. An action that already has an outcome is left untouched.
async fn record_outcome_in(
    conn: &mut dyn LedgerConn,
    action_id: Uuid,
    response_code: String,
) -> Result<Payment> {
    let payment_id = find_action(conn, action_id).await?.payment_id;
    let mut payment = conn.lock_payment(payment_id).await?;
    // Re-read under the payment lock.
    let mut action = find_action(conn, action_id).await?;

    if action.is_processed() {
        if action.response_code.as_deref() != Some(response_code.as_str()) {
            warn!(
                "Action {} already recorded code {:?}; ignoring {}",
                action_id, action.response_code, response_code
            );
        }
        return Ok(payment);
    }

    let now = Utc::now();
    action.response_code = Some(response_code);
    action.processed_at = Some(now);
    conn.update_payment_action(
        &action,
        &[PaymentActionField::ResponseCode, PaymentActionField::ProcessedAt],
    )
    .await?;

    let actions = conn
        .list_payment_actions(&ActionFilter::for_payment(payment_id))
        .await?;
    let status = LedgerSummary::fold(&actions).status(payment.amount.minor_units);
    if status != payment.status {
        payment.status = status;
        payment.updated_at = Some(now);
        conn.update_payment(&payment, &[PaymentField::Status, PaymentField::UpdatedAt])
            .await?;
    }

    Ok(payment)
}

fn validate_amount(amount: u64) -> Result<()> {
    if amount == 0 {
        return Err(Error::validation("amount must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::validation(format!(
            "amount must not exceed {}",
            MAX_AMOUNT
        )));
    }
    Ok(())
}

fn validate_payment_method(payment_method: &PaymentMethod) -> Result<()> {
    match payment_method {
        PaymentMethod::Card(card) => {
            if !valid_card_number(&card.number) {
                return Err(Error::validation("card number is invalid"));
            }
            if !(1..=12).contains(&card.expiry.month) {
                return Err(Error::validation("expiry month must be between 1 and 12"));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl<S, I> PaymentOperations for Processor<S, I>
where
    S: LedgerStore,
    I: IssuerGateway,
{
    async fn authorize(&self, amount: Money, payment_method: PaymentMethod) -> Result<Payment> {
        validate_amount(amount.minor_units)?;
        validate_payment_method(&payment_method)?;

        let (payment, action) = self
            .store
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let payment = conn
                        .create_payment(NewPayment {
                            amount,
                            status: PaymentStatus::Pending,
                            payment_method,
                        })
                        .await?;
                    let action = conn
                        .create_payment_action(NewPaymentAction {
                            payment_id: payment.id,
                            amount: amount.minor_units,
                            action_type: PaymentType::Authorization,
                        })
                        .await?;
                    Ok::<_, Error>((payment, action))
                })
            })
            .await?;

        info!("Created payment {} for {}", payment.id, amount);

        let response = self.call_issuer(&payment, &action).await?;
        self.complete(&payment, &action, response.auth_code).await
    }

    async fn capture(&self, payment_id: Uuid, amount: u64) -> Result<Payment> {
        validate_amount(amount)?;
        self.run_operation(payment_id, PaymentType::Capture, amount).await
    }

    async fn refund(&self, payment_id: Uuid, amount: u64) -> Result<Payment> {
        validate_amount(amount)?;
        self.run_operation(payment_id, PaymentType::Refund, amount).await
    }

    async fn void(&self, payment_id: Uuid) -> Result<Payment> {
        self.run_operation(payment_id, PaymentType::Void, 0).await
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Payment> {
        self.store
            .execute_in_transaction(move |conn| {
                Box::pin(async move { Ok::<_, Error>(conn.get_payment(payment_id).await?) })
            })
            .await
    }

    async fn list_payment_actions(&self, payment_id: Uuid) -> Result<Vec<PaymentAction>> {
        self.store
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    conn.get_payment(payment_id).await?;
                    let actions = conn
                        .list_payment_actions(&ActionFilter::for_payment(payment_id))
                        .await?;
                    Ok::<_, Error>(actions)
                })
            })
            .await
    }

    async fn payment_with_actions(
        &self,
        payment_id: Uuid,
    ) -> Result<(Payment, Vec<PaymentAction>)> {
        self.store
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let payment = conn.get_payment(payment_id).await?;
                    let actions = conn
                        .list_payment_actions(&ActionFilter::for_payment(payment_id))
                        .await?;
                    Ok::<_, Error>((payment, actions))
                })
            })
            .await
    }

    async fn list_incomplete_actions(&self) -> Result<Vec<PaymentAction>> {
        self.store
            .execute_in_transaction(|conn| {
                Box::pin(async move {
                    let actions = conn.list_payment_actions(&ActionFilter::incomplete()).await?;
                    Ok::<_, Error>(actions)
                })
            })
            .await
    }

    async fn record_outcome(&self, action_id: Uuid, response_code: String) -> Result<Payment> {
        let payment = self.apply_outcome(action_id, response_code.clone()).await?;
        info!(
            "Reconciled action {} with code {}; payment {} is {}",
            action_id, response_code, payment.id, payment.status
        );
        Ok(payment)
    }
}
