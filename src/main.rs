//! Webhook delivery daemon.
//!
//! Runs the delivery worker pool and the observability reporter against a
//! Postgres-backed store. Deliveries are produced by the API layer; this
//! process drains the durable queue, performs transport calls, and records
//! outcomes.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use storelink_core::storage::PgDeliveryStore;
use storelink_delivery::{
    ObservabilityBuffer, ObservabilityReporter, StoreScheduler, TransportConfig,
    TransportDispatcher, WorkerConfig, WorkerPool,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting webhook delivery daemon");

    let config = Config::from_env()?;
    info!(
        database_url = %config.database_url_masked(),
        domain = %config.domain,
        worker_count = config.worker_count,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    bootstrap_schema(&pool).await?;
    info!("database ready");

    let store = Arc::new(PgDeliveryStore::new(pool.clone()));
    let dispatcher = Arc::new(
        TransportDispatcher::new(TransportConfig {
            timeout: Duration::from_secs(config.delivery_timeout_secs),
            ..TransportConfig::default()
        })
        .context("failed to build transport dispatcher")?,
    );
    let scheduler = Arc::new(StoreScheduler::new(store.clone()));
    let buffer = Arc::new(ObservabilityBuffer::new(config.observability_buffer_size));
    let cancel = CancellationToken::new();

    let worker_config = WorkerConfig {
        worker_count: config.worker_count,
        ..WorkerConfig::default()
    };
    let pool_handle = WorkerPool::spawn(
        store.clone(),
        dispatcher.clone(),
        scheduler,
        buffer.clone(),
        config.domain.clone(),
        worker_config,
        cancel.clone(),
    );

    let reporter = ObservabilityReporter::new(
        store,
        dispatcher,
        buffer,
        config.domain.clone(),
        Duration::from_secs(config.observability_report_secs),
        100,
        cancel.clone(),
    );
    let reporter_handle = tokio::spawn(reporter.run());

    info!("delivery daemon is running");
    shutdown_signal().await;
    info!("shutdown signal received, stopping workers");

    cancel.cancel();
    pool_handle.shutdown().await;
    let _ = reporter_handle.await;

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,storelink=debug"))
        .expect("invalid RUST_LOG environment variable");

    tracing_subscriber::registry().with(filter).with(fmt::layer().with_target(true)).init();
}

/// Creates the database pool, retrying while the database comes up.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);
    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(_) if retries < MAX_RETRIES => {
                retries += 1;
                info!(attempt = retries, "database connection failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("failed to create database pool after retries");
            },
        }
    }
}

/// Creates the delivery tables when they do not exist yet.
async fn bootstrap_schema(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhooks (
            id UUID PRIMARY KEY,
            app_name TEXT NOT NULL,
            target_url TEXT NOT NULL,
            secret_key TEXT,
            subscription_query TEXT,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhooks table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS webhook_event_subscriptions (
            webhook_id UUID NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL,
            PRIMARY KEY (webhook_id, event_type)
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create webhook_event_subscriptions table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS event_payloads (
            id UUID PRIMARY KEY,
            body TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create event_payloads table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS event_deliveries (
            id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            webhook_id UUID NOT NULL REFERENCES webhooks(id),
            payload_id UUID REFERENCES event_payloads(id),
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create event_deliveries table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS delivery_attempts (
            id UUID PRIMARY KEY,
            delivery_id UUID NOT NULL REFERENCES event_deliveries(id) ON DELETE CASCADE,
            task_id TEXT,
            request_headers JSONB,
            response_headers JSONB,
            response_status_code INTEGER,
            response_body TEXT NOT NULL DEFAULT '',
            duration DOUBLE PRECISION,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("failed to create delivery_attempts table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_event_deliveries_due
        ON event_deliveries (status, next_attempt_at)
        WHERE status = 'pending'
        ",
    )
    .execute(pool)
    .await
    .context("failed to create due-deliveries index")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_delivery_attempts_delivery
        ON delivery_attempts (delivery_id, created_at)
        ",
    )
    .execute(pool)
    .await
    .context("failed to create attempts index")?;

    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received CTRL+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Daemon configuration from environment variables.
struct Config {
    database_url: String,
    database_max_connections: u32,
    /// Tenant domain stamped onto outgoing messages.
    domain: String,
    worker_count: usize,
    delivery_timeout_secs: u64,
    observability_buffer_size: usize,
    observability_report_secs: u64,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable not set")?;
        let domain =
            std::env::var("SITE_DOMAIN").context("SITE_DOMAIN environment variable not set")?;

        Ok(Self {
            database_url,
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", 10),
            domain,
            worker_count: env_or("WORKER_COUNT", storelink_delivery::DEFAULT_WORKER_COUNT),
            delivery_timeout_secs: env_or("DELIVERY_TIMEOUT_SECONDS", 30),
            observability_buffer_size: env_or("OBSERVABILITY_BUFFER_SIZE", 1000),
            observability_report_secs: env_or("OBSERVABILITY_REPORT_SECONDS", 20),
        })
    }

    /// Database URL with the password masked for logging.
    fn database_url_masked(&self) -> String {
        match url::Url::parse(&self.database_url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            },
            Err(_) => "postgresql://***".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
