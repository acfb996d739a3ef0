#![allow(dead_code)]

use async_trait::async_trait;
use payment_processor::alert::MemoryAlertSink;
use payment_processor::issuer::{IssuerError, IssuerGateway, IssuerRequest, IssuerResponse};
use payment_processor::store::{
    ActionFilter, LedgerConn, LedgerStore, MemoryLedger, NewPayment, NewPaymentAction,
    PaymentActionField, PaymentField, StoreError, StoreResult, TxFuture,
};
use payment_processor::{Error, Processor};
use shared::{
    Card, Expiry, Money, Payment, PaymentAction, PaymentMethod, PaymentStatus, ISSUER_SUCCESS_CODE,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const CARD: &str = "4242424242424242";

pub fn gbp(minor_units: u64) -> Money {
    Money::new(minor_units, "GBP".parse().unwrap())
}

pub fn card() -> PaymentMethod {
    PaymentMethod::Card(Card {
        number: CARD.to_string(),
        expiry: Expiry {
            month: 12,
            year: 2099,
        },
    })
}

/// Wraps a ledger and can make outcome writes fail.
#[derive(Clone)]
pub struct FlakyLedger<S = MemoryLedger> {
    pub inner: S,
    fail_outcomes: Arc<AtomicBool>,
}

impl FlakyLedger {
    pub fn new() -> Self {
        Self::wrap(MemoryLedger::new())
    }
}

impl<S> FlakyLedger<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            fail_outcomes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_outcome_writes(&self, fail: bool) {
        self.fail_outcomes.store(fail, Ordering::SeqCst);
    }
}

struct FlakyConn<'a> {
    inner: &'a mut dyn LedgerConn,
    fail_outcomes: bool,
}

#[async_trait]
impl LedgerConn for FlakyConn<'_> {
    async fn get_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.inner.get_payment(id).await
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.inner.lock_payment(id).await
    }

    async fn list_payment_actions(
        &mut self,
        filter: &ActionFilter,
    ) -> StoreResult<Vec<PaymentAction>> {
        self.inner.list_payment_actions(filter).await
    }

    async fn create_payment(&mut self, payment: NewPayment) -> StoreResult<Payment> {
        self.inner.create_payment(payment).await
    }

    async fn create_payment_action(
        &mut self,
        action: NewPaymentAction,
    ) -> StoreResult<PaymentAction> {
        self.inner.create_payment_action(action).await
    }

    async fn update_payment(
        &mut self,
        payment: &Payment,
        fields: &[PaymentField],
    ) -> StoreResult<()> {
        self.inner.update_payment(payment, fields).await
    }

    async fn update_payment_action(
        &mut self,
        action: &PaymentAction,
        fields: &[PaymentActionField],
    ) -> StoreResult<()> {
        if self.fail_outcomes {
            return Err(StoreError::backend(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.inner.update_payment_action(action, fields).await
    }
}

#[async_trait]
impl<S: LedgerStore> LedgerStore for FlakyLedger<S> {
    async fn execute_in_transaction<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn LedgerConn) -> TxFuture<'c, R> + Send + 'static,
    {
        let fail_outcomes = self.fail_outcomes.load(Ordering::SeqCst);
        self.inner
            .execute_in_transaction(move |conn| {
                Box::pin(async move {
                    let mut flaky = FlakyConn {
                        inner: conn,
                        fail_outcomes,
                    };
                    f(&mut flaky).await
                })
            })
            .await
    }
}

/// Approves everything and remembers what it was asked.
#[derive(Clone, Default)]
pub struct RecordingIssuer {
    requests: Arc<Mutex<Vec<IssuerRequest>>>,
}

impl RecordingIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<IssuerRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssuerGateway for RecordingIssuer {
    async fn create_issuer_request(
        &self,
        request: IssuerRequest,
    ) -> Result<IssuerResponse, IssuerError> {
        self.requests.lock().unwrap().push(request);
        Ok(IssuerResponse {
            auth_code: ISSUER_SUCCESS_CODE.to_string(),
        })
    }
}

pub struct FailingIssuer;

#[async_trait]
impl IssuerGateway for FailingIssuer {
    async fn create_issuer_request(
        &self,
        _request: IssuerRequest,
    ) -> Result<IssuerResponse, IssuerError> {
        Err(IssuerError::Unavailable("connection refused".to_string()))
    }
}

/// Never answers.
pub struct HangingIssuer;

#[async_trait]
impl IssuerGateway for HangingIssuer {
    async fn create_issuer_request(
        &self,
        _request: IssuerRequest,
    ) -> Result<IssuerResponse, IssuerError> {
        std::future::pending().await
    }
}

pub fn processor<S: LedgerStore, I: IssuerGateway>(
    store: S,
    issuer: I,
) -> (Processor<S, I>, Arc<MemoryAlertSink>) {
    let alerts = Arc::new(MemoryAlertSink::new());
    (Processor::new(store, issuer, alerts.clone()), alerts)
}

/// Inserts a payment with the given cached status and an empty ledger.
pub async fn seed_payment<S: LedgerStore>(store: &S, status: PaymentStatus) -> Payment {
    store
        .execute_in_transaction(move |conn| {
            Box::pin(async move {
                let payment = conn
                    .create_payment(NewPayment {
                        amount: gbp(1000),
                        status,
                        payment_method: card(),
                    })
                    .await?;
                Ok::<_, Error>(payment)
            })
        })
        .await
        .unwrap()
}

pub async fn all_actions<S: LedgerStore>(store: &S) -> Vec<PaymentAction> {
    store
        .execute_in_transaction(|conn| {
            Box::pin(async move {
                let actions = conn.list_payment_actions(&ActionFilter::default()).await?;
                Ok::<_, Error>(actions)
            })
        })
        .await
        .unwrap()
}
