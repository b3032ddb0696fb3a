mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loyalty_accrual::{AccrualClient, Reconciler, ReconcilerConfig, UnprocessedOrderSweep};
use loyalty_core::Ledger;
use loyalty_jobs::JobQueue;
use loyalty_storage::{InMemoryLedger, PostgresLedger};

use crate::config::LoyaltyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv().ok();
    let config = LoyaltyConfig::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("loyalty-worker starting...");
    if let Some(path) = dotenv {
        tracing::info!("Loaded .env from {:?}", path);
    }

    let ledger: Arc<dyn Ledger> = match &config.database_uri {
        Some(url) => {
            let ledger = PostgresLedger::connect(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            Arc::new(ledger)
        }
        None => {
            tracing::warn!("DATABASE_URI not set, using in-memory ledger");
            Arc::new(InMemoryLedger::new())
        }
    };

    let client = AccrualClient::new(config.accrual_client_config())
        .context("Failed to create accrual client")?;

    tracing::info!(
        accrual_system_address = %config.accrual_system_address,
        worker_count = config.worker_count,
        timeout_secs = config.accrual_timeout.as_secs(),
        "Starting accrual reconciler"
    );

    let reconciler = Arc::new(Reconciler::new(
        ledger.clone(),
        Arc::new(client),
        JobQueue::new(config.job_queue_config()),
        ReconcilerConfig::default(),
    ));
    reconciler
        .start()
        .context("Failed to start accrual queue")?;

    let shutdown = CancellationToken::new();
    let sweep = UnprocessedOrderSweep::new(ledger, reconciler.clone(), config.sweep_interval)
        .spawn(shutdown.clone());

    tracing::info!("Worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    shutdown.cancel();
    if let Err(e) = sweep.await {
        tracing::warn!(error = %e, "Sweep task ended abnormally");
    }

    if let Err(e) = reconciler.shutdown().await {
        tracing::warn!(error = %e, "Accrual queue did not drain in time");
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
