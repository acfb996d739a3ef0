use anyhow::Result;
use clap::Parser;
use diesel_async::{pooled_connection::AsyncDieselConnectionManager, AsyncPgConnection};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::{info, warn};

use payment_processor::alert::{AlertSink, MemoryAlertSink};
use payment_processor::api::{self, AppState};
use payment_processor::config::Args;
use payment_processor::outbox::{OutboxAlertSink, OutboxProcessor};
use payment_processor::processor::{PaymentOperations, Processor};
use payment_processor::store::{postgres, MemoryLedger, PgLedger};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let issuer = args.simulated_issuer();
    let payments: Arc<dyn PaymentOperations> = if args.in_memory {
        warn!("Running with an in-memory ledger; nothing will be persisted");
        let alerts: Arc<dyn AlertSink> = Arc::new(MemoryAlertSink::new());
        Arc::new(
            Processor::new(MemoryLedger::new(), issuer, alerts)
                .with_issuer_timeout(args.issuer_timeout()),
        )
    } else {
        // Run migrations first
        info!("Running database migrations...");
        postgres::run_migrations(&args.database_url)?;
        info!("Migrations completed successfully");

        let config =
            AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
        let pool = bb8::Pool::builder().build(config).await?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &args.kafka_brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        let outbox_processor = OutboxProcessor::new(
            pool.clone(),
            producer,
            args.alert_topic.clone(),
            args.outbox_interval(),
        );
        tokio::spawn(async move {
            outbox_processor.run().await;
        });

        let alerts: Arc<dyn AlertSink> = Arc::new(OutboxAlertSink::new(pool.clone()));
        Arc::new(
            Processor::new(PgLedger::new(pool), issuer, alerts)
                .with_issuer_timeout(args.issuer_timeout()),
        )
    };

    let app = api::create_router(AppState { payments });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Payment processor listening on http://0.0.0.0:{}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
