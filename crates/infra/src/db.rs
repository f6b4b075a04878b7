//! Postgres schema and shared SQLx helpers.
//!
//! ## Tables
//!
//! | table | key | notes |
//! |-------|-----|-------|
//! | `upload_jobs` | `id` | payload as JSONB, partial index over pending jobs for discovery |
//! | `customer_numbers` | `customer_id` | `UNIQUE (branch_id, mobile_number)` backs the conditional create |
//! | `customer_transactions` | `id` | amounts in thousandths of a point |

use sqlx::PgPool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS upload_jobs (
        id                UUID PRIMARY KEY,
        submitter_id      UUID NOT NULL,
        branch_id         UUID NOT NULL,
        source_label      TEXT NOT NULL,
        status            TEXT NOT NULL,
        total_rows        BIGINT NOT NULL CHECK (total_rows >= 0),
        processed_rows    BIGINT NOT NULL DEFAULT 0,
        failed_rows       BIGINT NOT NULL DEFAULT 0,
        skipped_rows      BIGINT NOT NULL DEFAULT 0,
        payload           JSONB NOT NULL,
        error_message     TEXT NULL,
        created_at        TIMESTAMPTZ NOT NULL,
        started_at        TIMESTAMPTZ NULL,
        completed_at      TIMESTAMPTZ NULL,
        CHECK (processed_rows + failed_rows + skipped_rows <= total_rows)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS upload_jobs_pending_idx
        ON upload_jobs (created_at, id)
        WHERE status = 'pending'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS upload_jobs_submitter_idx
        ON upload_jobs (submitter_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customer_numbers (
        customer_id       UUID PRIMARY KEY,
        branch_id         UUID NOT NULL,
        mobile_number     TEXT NOT NULL,
        created_at        TIMESTAMPTZ NOT NULL,
        UNIQUE (branch_id, mobile_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS customer_transactions (
        id                UUID PRIMARY KEY,
        customer_id       UUID NOT NULL REFERENCES customer_numbers (customer_id),
        branch_id         UUID NOT NULL,
        job_id            UUID NULL,
        amount_milli      BIGINT NOT NULL,
        external_id       TEXT NULL,
        transaction_date  TIMESTAMPTZ NOT NULL,
        note              TEXT NULL,
        recorded_at       TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS customer_transactions_customer_idx
        ON customer_transactions (customer_id)
    "#,
];

/// Create the tables and indexes the adapters use, if missing.
///
/// Each statement runs on its own; a prepared statement holds one command.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!(statements = SCHEMA.len(), "database schema ensured");
    Ok(())
}

/// Check if an error is a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

/// Render an SQLx error with the operation it came from.
pub(crate) fn describe_sqlx_error(operation: &str, err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => {
            format!("database error in {}: {}", operation, db_err.message())
        }
        sqlx::Error::PoolClosed => format!("connection pool closed in {}", operation),
        sqlx::Error::RowNotFound => format!("unexpected row not found in {}", operation),
        _ => format!("sqlx error in {}: {}", operation, err),
    }
}
