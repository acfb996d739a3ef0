use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use uuid::Uuid;

use crate::alert::{AlertSink, ReconciliationAlert};
use crate::models::*;
use crate::schema::*;
use crate::store::postgres::DbPool;
use crate::store::StoreError;

pub const OUTCOME_UPDATE_FAILED_EVENT: &str = "OutcomeUpdateFailed";

const BATCH_SIZE: i64 = 100;

/// Persists alerts as outbox rows so they survive a crash before publishing.
#[derive(Clone)]
pub struct OutboxAlertSink {
    pool: DbPool,
}

impl OutboxAlertSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertSink for OutboxAlertSink {
    async fn raise(&self, alert: ReconciliationAlert) -> Result<(), StoreError> {
        error!(
            "Reconciliation required for action {} of payment {}: {}",
            alert.action_id, alert.payment_id, alert.error
        );

        let mut conn = self.pool.get().await.map_err(StoreError::backend)?;
        let event = NewOutboxEvent {
            id: Uuid::new_v4(),
            aggregate_id: alert.payment_id,
            event_type: OUTCOME_UPDATE_FAILED_EVENT.to_string(),
            event_data: serde_json::to_value(&alert).map_err(StoreError::backend)?,
        };

        diesel::insert_into(outbox_events::table)
            .values(&event)
            .execute(&mut conn)
            .await
            .map_err(StoreError::backend)?;

        Ok(())
    }
}

/// Polls unpublished outbox rows and sends them to Kafka.
pub struct OutboxProcessor {
    pool: DbPool,
    producer: FutureProducer,
    alert_topic: String,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        pool: DbPool,
        producer: FutureProducer,
        alert_topic: String,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            producer,
            alert_topic,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes one batch of pending alerts and returns how many were sent.
    async fn process_outbox_events(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .filter(outbox_events::event_type.eq(OUTCOME_UPDATE_FAILED_EVENT))
            .order(outbox_events::created_at.asc())
            .limit(BATCH_SIZE)
            .load::<DbOutboxEvent>(&mut conn)
            .await?;

        let mut published = Vec::with_capacity(pending.len());
        for event in &pending {
            match self.publish_alert(event).await {
                Ok(()) => published.push(event.id),
                Err(e) => error!("Failed to publish alert {}: {}", event.id, e),
            }
        }

        if !published.is_empty() {
            diesel::update(outbox_events::table.filter(outbox_events::id.eq_any(published.clone())))
                .set(outbox_events::processed.eq(true))
                .execute(&mut conn)
                .await?;
            info!(
                "Published {} reconciliation alerts to {}",
                published.len(),
                self.alert_topic
            );
        }

        Ok(published.len())
    }

    // Keyed by payment so alerts for one payment stay ordered.
    async fn publish_alert(&self, event: &DbOutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(&self.alert_topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish alert: {}", e))?;

        Ok(())
    }
}
