//! Emergency registry service entry point.
//!
//! Consumes emergency lifecycle events from a NATS `JetStream` durable
//! consumer and reconciles them into `PostgreSQL`. Delivery is at least
//! once, so every write is conditional and a message is acknowledged only
//! after its outcome is durable.
//!
//! # Architecture
//!
//! ```text
//! NATS JetStream --> EventConsumer --> Reconciler --> PostgreSQL (emergencies)
//!                         |                 |
//!                         |                 +--> NATS (emergencies.status.<id>)
//!                         +--> PostgreSQL (dead_letters)
//! ```
//!
//! SIGTERM or SIGINT stops intake; in-flight messages finish their
//! acknowledge or requeue before the process exits.

mod config;
mod error;
mod gateway;
mod nats;
mod signal;

use std::sync::Arc;

use anyhow::Context as _;
use emergency_core::{EventConsumer, Reconciler};
use emergency_db::{PostgresConfig, PostgresPool};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, RegistryConfig};
use crate::gateway::{PgDeadLetterSink, PgGateway};
use crate::nats::{JetStreamQueue, NatsStatusNotifier};

/// Application entry point.
///
/// Loads configuration, initializes logging, connects to `PostgreSQL` and
/// NATS, then runs the consumer loop until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if configuration is invalid or a backing service cannot
/// be reached at startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RegistryConfig::from_env().context("failed to load configuration")?;
    init_logging(config.log_format);

    info!("emergency-registry starting");
    info!(
        nats_url = config.nats_url,
        stream = config.stream,
        subject = config.subject,
        consumer = config.consumer_name,
        max_attempts = config.consumer.retry.max_attempts,
        store_timeout_ms = config.consumer.store_timeout.as_millis(),
        max_in_flight = config.consumer.max_in_flight,
        "configuration loaded"
    );

    // PostgreSQL
    let db_config =
        PostgresConfig::new(&config.database_url).with_max_connections(config.db_max_connections);
    let pool = PostgresPool::connect(&db_config)
        .await
        .context("failed to connect to PostgreSQL")?;
    pool.run_migrations()
        .await
        .context("failed to run database migrations")?;

    // NATS
    let client = nats::connect(&config.nats_url)
        .await
        .context("failed to connect to NATS")?;
    let queue = JetStreamQueue::bind(
        client.clone(),
        &config.stream,
        &config.subject,
        &config.consumer_name,
    )
    .await
    .context("failed to bind JetStream consumer")?;

    let notifier = Arc::new(NatsStatusNotifier::new(
        client.clone(),
        &config.status_subject_prefix,
    ));
    let reconciler = Reconciler::new(
        Arc::new(PgGateway::new(pool.clone())),
        config.consumer.store_timeout,
    )
    .with_notifier(notifier);
    let consumer = EventConsumer::new(
        reconciler,
        Arc::new(PgDeadLetterSink::new(pool.clone())),
        config.consumer,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    signal::install(shutdown_tx);

    let deliveries = queue
        .deliveries(config.consumer.max_in_flight)
        .await
        .context("failed to open delivery stream")?;

    info!("event consumer initialized, entering consume loop");
    let stats = consumer.run(deliveries, shutdown_rx).await;

    if let Err(e) = client.flush().await {
        warn!(error = %e, "failed to flush pending status changes");
    }
    pool.close().await;

    info!(
        acknowledged = stats.acknowledged,
        dead_lettered = stats.dead_lettered,
        requeued = stats.requeued,
        "emergency-registry stopped"
    );
    Ok(())
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` controls filtering (default `info`).
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}
