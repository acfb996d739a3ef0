mod wire;

pub mod card;
pub mod money;
pub mod payment;

pub use card::*;
pub use money::*;
pub use payment::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid currency code {0:?}: expected three ASCII letters")]
    Currency(String),
    #[error("unknown payment status {0:?}")]
    PaymentStatus(String),
    #[error("unknown payment type {0:?}")]
    PaymentType(String),
}
