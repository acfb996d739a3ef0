use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Money, Payment, PaymentAction};
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentRow {
    pub id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub payment_method: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentChanges {
    pub status: Option<String>,
    pub updated_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::payment_actions)]
pub struct PaymentActionRow {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: i64,
    pub action_type: String,
    pub response_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = crate::schema::payment_actions)]
pub struct PaymentActionChanges {
    pub response_code: Option<Option<String>>,
    pub processed_at: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

fn to_column(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("amount {} does not fit a BIGINT", value)))
}

fn from_column(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidRecord(format!("negative amount {}", value)))
}

fn invalid(err: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidRecord(err.to_string())
}

impl TryFrom<&Payment> for PaymentRow {
    type Error = StoreError;

    fn try_from(payment: &Payment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: payment.id,
            amount: to_column(payment.amount.minor_units)?,
            currency: payment.amount.currency.to_string(),
            status: payment.status.code().to_string(),
            payment_method: serde_json::to_value(&payment.payment_method).map_err(invalid)?,
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        })
    }
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            amount: Money::new(
                from_column(row.amount)?,
                row.currency.parse().map_err(invalid)?,
            ),
            status: row.status.parse().map_err(invalid)?,
            payment_method: serde_json::from_value(row.payment_method).map_err(invalid)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&PaymentAction> for PaymentActionRow {
    type Error = StoreError;

    fn try_from(action: &PaymentAction) -> Result<Self, Self::Error> {
        Ok(Self {
            id: action.id,
            payment_id: action.payment_id,
            amount: to_column(action.amount)?,
            action_type: action.action_type.code().to_string(),
            response_code: action.response_code.clone(),
            created_at: action.created_at,
            processed_at: action.processed_at,
        })
    }
}

impl TryFrom<PaymentActionRow> for PaymentAction {
    type Error = StoreError;

    fn try_from(row: PaymentActionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            payment_id: row.payment_id,
            amount: from_column(row.amount)?,
            action_type: row.action_type.parse().map_err(invalid)?,
            response_code: row.response_code,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}
