use async_trait::async_trait;
use shared::{Money, PaymentMethod, PaymentType, ISSUER_SUCCESS_CODE};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Code returned by [`SimulatedIssuer`] for a configured decline.
pub const DECLINED_CODE: &str = "12";

#[derive(Debug, Clone)]
pub struct IssuerRequest {
    pub amount: Money,
    pub operation: PaymentType,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerResponse {
    pub auth_code: String,
}

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("issuer unavailable: {0}")]
    Unavailable(String),
    #[error("issuer transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Performs the financial operation at the card issuer.
///
/// A returned code other than `"00"` is a decline, not an error. Errors mean
/// the outcome at the issuer is unknown.
#[async_trait]
pub trait IssuerGateway: Send + Sync + 'static {
    async fn create_issuer_request(
        &self,
        request: IssuerRequest,
    ) -> Result<IssuerResponse, IssuerError>;
}

/// Stand-in issuer that approves everything except configured
/// `(card number, operation)` pairs.
#[derive(Debug, Clone, Default)]
pub struct SimulatedIssuer {
    declines: HashMap<String, HashSet<PaymentType>>,
    latency: Option<Duration>,
}

impl SimulatedIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline(mut self, card_number: &str, operation: PaymentType) -> Self {
        let digits: String = card_number.chars().filter(|c| !c.is_whitespace()).collect();
        self.declines.entry(digits).or_default().insert(operation);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency).filter(|l| !l.is_zero());
        self
    }

    fn declines(&self, request: &IssuerRequest) -> bool {
        let PaymentMethod::Card(card) = &request.payment_method;
        self.declines
            .get(&card.digits())
            .is_some_and(|ops| ops.contains(&request.operation))
    }
}

#[async_trait]
impl IssuerGateway for SimulatedIssuer {
    async fn create_issuer_request(
        &self,
        request: IssuerRequest,
    ) -> Result<IssuerResponse, IssuerError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let auth_code = if self.declines(&request) {
            DECLINED_CODE
        } else {
            ISSUER_SUCCESS_CODE
        };
        debug!(
            "Simulated issuer answered {} for {} of {}",
            auth_code, request.operation, request.amount
        );

        Ok(IssuerResponse {
            auth_code: auth_code.to_string(),
        })
    }
}
