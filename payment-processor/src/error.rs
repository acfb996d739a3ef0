use shared::{PaymentStatus, PaymentType};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::issuer::IssuerError;
use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before the ledger is touched.
    Validation,
    /// The state machine or an amount invariant forbids the operation.
    NotPermitted,
    NotFound,
    /// The ledger store or the issuer failed. Phase A is safe to retry.
    Dependency,
    /// The issuer answered but the outcome could not be recorded.
    OutcomeUpdateFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotPermitted {
    #[error("{operation} is not permitted while the payment is {status}")]
    InvalidStatus {
        status: PaymentStatus,
        operation: PaymentType,
    },
    #[error("requested {requested} exceeds the remaining capturable amount {remaining}")]
    ExceedsCapturable { requested: u64, remaining: u64 },
    #[error("requested {requested} exceeds the remaining refundable amount {remaining}")]
    ExceedsRefundable { requested: u64, remaining: u64 },
    #[error("nothing has been captured that could be refunded")]
    NothingToRefund,
    #[error("another operation on this payment is still awaiting its issuer outcome")]
    ActionInFlight,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not permitted: {0}")]
    NotPermitted(#[from] NotPermitted),
    #[error("payment {0} not found")]
    PaymentNotFound(Uuid),
    #[error("payment action {0} not found")]
    ActionNotFound(Uuid),
    #[error("ledger store failure: {0}")]
    Store(#[source] StoreError),
    #[error("issuer request failed: {0}")]
    Issuer(#[from] IssuerError),
    #[error("issuer did not respond within {0:?}")]
    IssuerTimeout(Duration),
    #[error("unable to update payment outcome for action {action_id}: {source}")]
    OutcomeUpdateFailed {
        payment_id: Uuid,
        action_id: Uuid,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotPermitted(_) => ErrorKind::NotPermitted,
            Error::PaymentNotFound(_) | Error::ActionNotFound(_) => ErrorKind::NotFound,
            Error::Store(_) | Error::Issuer(_) | Error::IssuerTimeout(_) => ErrorKind::Dependency,
            Error::OutcomeUpdateFailed { .. } => ErrorKind::OutcomeUpdateFailed,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSuchPayment(id) => Error::PaymentNotFound(id),
            StoreError::NoSuchAction(id) => Error::ActionNotFound(id),
            other => Error::Store(other),
        }
    }
}
