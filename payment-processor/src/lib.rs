mod models;
mod schema;

pub mod alert;
pub mod api;
pub mod config;
pub mod error;
pub mod issuer;
pub mod ledger;
pub mod outbox;
pub mod processor;
pub mod store;

pub use error::{Error, ErrorKind, NotPermitted, Result};
pub use processor::{PaymentOperations, Processor};
