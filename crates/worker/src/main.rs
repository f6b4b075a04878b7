use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use branchpoints_infra::customers::{PostgresCustomerDirectory, PostgresTransactionLedger};
use branchpoints_infra::jobs::PostgresJobStore;
use branchpoints_infra::{BatchIngestor, Settings, UploadWorker, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    branchpoints_observability::init();

    let settings = Settings::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;

    db::ensure_schema(&pool)
        .await
        .context("failed to ensure database schema")?;

    let store = Arc::new(PostgresJobStore::new(pool.clone()));
    let ingestor = Arc::new(BatchIngestor::new(
        PostgresCustomerDirectory::new(pool.clone()),
        PostgresTransactionLedger::new(pool.clone()),
    ));

    let handle = UploadWorker::new(store, ingestor, settings.worker).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutdown requested, waiting for in-flight uploads");
    let stats = handle.shutdown().await;
    pool.close().await;

    tracing::info!(
        jobs_completed = stats.jobs_completed,
        jobs_failed = stats.jobs_failed,
        jobs_abandoned = stats.jobs_abandoned,
        rows_applied = stats.rows_applied,
        rows_failed = stats.rows_failed,
        "upload worker exited"
    );
    Ok(())
}
