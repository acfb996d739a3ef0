use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Money, PaymentType};
use std::sync::Mutex;
use uuid::Uuid;

use crate::store::StoreError;

/// Raised when an issuer outcome could not be written back to the ledger.
/// Someone has to reconcile the action by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub payment_id: Uuid,
    pub action_id: Uuid,
    pub operation: PaymentType,
    pub amount: Money,
    pub response_code: String,
    pub error: String,
    pub raised_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    async fn raise(&self, alert: ReconciliationAlert) -> Result<(), StoreError>;
}

/// Keeps alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<ReconciliationAlert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<ReconciliationAlert> {
        match self.alerts.lock() {
            Ok(alerts) => alerts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn raise(&self, alert: ReconciliationAlert) -> Result<(), StoreError> {
        let mut alerts = match self.alerts.lock() {
            Ok(alerts) => alerts,
            Err(poisoned) => poisoned.into_inner(),
        };
        alerts.push(alert);
        Ok(())
    }
}
