use async_trait::async_trait;
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Payment, PaymentAction};
use uuid::Uuid;

use super::{
    ActionFilter, LedgerConn, LedgerStore, NewPayment, NewPaymentAction, PaymentActionField,
    PaymentField, StoreError, StoreResult, TxFuture,
};
use crate::error::Error;
use crate::models::*;
use crate::schema::*;

pub type DbPool = bb8::Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies pending migrations over a blocking connection.
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    let mut conn = diesel::PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    Ok(())
}

/// Ledger backed by Postgres. Each transaction checks out one pooled
/// connection; `lock_payment` takes a row lock with `SELECT ... FOR UPDATE`.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn db_error(err: diesel::result::Error) -> StoreError {
    StoreError::backend(err)
}

struct PgConn<'a> {
    conn: &'a mut AsyncPgConnection,
}

impl PgConn<'_> {
    async fn find_payment(&mut self, id: Uuid, lock: bool) -> StoreResult<Payment> {
        let query = payments::table.find(id);
        let row = if lock {
            query
                .for_update()
                .get_result::<PaymentRow>(&mut *self.conn)
                .await
        } else {
            query.get_result::<PaymentRow>(&mut *self.conn).await
        };
        match row.optional().map_err(db_error)? {
            Some(row) => row.try_into(),
            None => Err(StoreError::NoSuchPayment(id)),
        }
    }
}

#[async_trait]
impl LedgerConn for PgConn<'_> {
    async fn get_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.find_payment(id, false).await
    }

    async fn lock_payment(&mut self, id: Uuid) -> StoreResult<Payment> {
        self.find_payment(id, true).await
    }

    async fn list_payment_actions(
        &mut self,
        filter: &ActionFilter,
    ) -> StoreResult<Vec<PaymentAction>> {
        let mut query = payment_actions::table.into_boxed::<Pg>();
        if !filter.payment_ids.is_empty() {
            query = query.filter(payment_actions::payment_id.eq_any(filter.payment_ids.clone()));
        }
        if !filter.action_ids.is_empty() {
            query = query.filter(payment_actions::id.eq_any(filter.action_ids.clone()));
        }
        if filter.incomplete_only {
            query = query.filter(payment_actions::processed_at.is_null());
        }

        let rows = query
            .order((payment_actions::created_at.asc(), payment_actions::id.asc()))
            .load::<PaymentActionRow>(&mut *self.conn)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(PaymentAction::try_from).collect()
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

        diesel::insert_into(payments::table)
            .values(PaymentRow::try_from(&payment)?)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error)?;

        Ok(payment)
    }

    async fn create_payment_action(
        &mut self,
        action: NewPaymentAction,
    ) -> StoreResult<PaymentAction> {
        let action = PaymentAction {
            id: Uuid::new_v4(),
            payment_id: action.payment_id,
            amount: action.amount,
            action_type: action.action_type,
            response_code: None,
            created_at: Utc::now(),
            processed_at: None,
        };

        diesel::insert_into(payment_actions::table)
            .values(PaymentActionRow::try_from(&action)?)
            .execute(&mut *self.conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                    StoreError::NoSuchPayment(action.payment_id)
                }
                other => db_error(other),
            })?;

        Ok(action)
    }

    async fn update_payment(
        &mut self,
        payment: &Payment,
        fields: &[PaymentField],
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut changes = PaymentChanges::default();
        for field in fields {
            match field {
                PaymentField::Status => changes.status = Some(payment.status.code().to_string()),
                PaymentField::UpdatedAt => changes.updated_at = Some(payment.updated_at),
            }
        }

        let updated = diesel::update(payments::table.find(payment.id))
            .set(&changes)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error)?;

        if updated == 0 {
            return Err(StoreError::NoSuchPayment(payment.id));
        }
        Ok(())
    }

    async fn update_payment_action(
        &mut self,
        action: &PaymentAction,
        fields: &[PaymentActionField],
    ) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut changes = PaymentActionChanges::default();
        for field in fields {
            match field {
                PaymentActionField::ResponseCode => {
                    changes.response_code = Some(action.response_code.clone())
                }
                PaymentActionField::ProcessedAt => changes.processed_at = Some(action.processed_at),
            }
        }

        let updated = diesel::update(payment_actions::table.find(action.id))
            .set(&changes)
            .execute(&mut *self.conn)
            .await
            .map_err(db_error)?;

        if updated == 0 {
            return Err(StoreError::NoSuchAction(action.id));
        }
        Ok(())
    }
}

enum TxError {
    Aborted(Error),
    Database(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Database(err)
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn execute_in_transaction<R, F>(&self, f: F) -> Result<R, Error>
    where
        R: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn LedgerConn) -> TxFuture<'c, R> + Send + 'static,
    {
        let mut pooled = self.pool.get().await.map_err(StoreError::backend)?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        let result = conn
            .transaction::<R, TxError, _>(|conn| {
                Box::pin(async move {
                    let mut handle = PgConn { conn };
                    f(&mut handle).await.map_err(TxError::Aborted)
                })
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(TxError::Aborted(err)) => Err(err),
            Err(TxError::Database(err)) => Err(db_error(err).into()),
        }
    }
}
