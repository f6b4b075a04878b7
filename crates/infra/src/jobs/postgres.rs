//! Postgres-backed upload job store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError | Scenario |
//! |------------|----------------------|---------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateId` | Insert of an id that already exists |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! ## Conditional updates
//!
//! `update_status` locks the row (`SELECT ... FOR UPDATE`), checks the update
//! against the current record with [`UploadJob::apply_update`], and writes the
//! mutable columns back in the same transaction. A concurrent claim and
//! cancel of one job serialize on the row lock; the loser sees the winner's
//! status and gets `Conflict`.
//!
//! The lock reads only the state columns. The JSONB payload is written once
//! on insert and read back only by `get`, the listings and `claim`, so
//! per-chunk progress writes cost the same for any upload size.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use branchpoints_core::{BranchId, JobId, SubmitterId};
use branchpoints_uploads::{JobProgress, JobStatus, StatusUpdate, TransactionRow, UploadJob};

use super::store::{JobStats, JobStore, JobStoreError};
use crate::db::{describe_sqlx_error, is_unique_violation};

const JOB_STATE_COLUMNS: &str = r#"
    id,
    submitter_id,
    branch_id,
    source_label,
    status,
    total_rows,
    processed_rows,
    failed_rows,
    skipped_rows,
    error_message,
    created_at,
    started_at,
    completed_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_jobs(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<UploadJob>, JobStoreError> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter().map(decode_job).collect()
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, rows = job.progress.total), err)]
    async fn insert(&self, job: UploadJob) -> Result<(), JobStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_jobs (
                id,
                submitter_id,
                branch_id,
                source_label,
                status,
                total_rows,
                processed_rows,
                failed_rows,
                skipped_rows,
                payload,
                error_message,
                created_at,
                started_at,
                completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.submitter_id.as_uuid())
        .bind(job.branch_id.as_uuid())
        .bind(&job.source_label)
        .bind(job.status.as_str())
        .bind(to_db_count(job.progress.total)?)
        .bind(to_db_count(job.progress.processed)?)
        .bind(to_db_count(job.progress.failed)?)
        .bind(to_db_count(job.progress.skipped)?)
        .bind(Json(&job.payload))
        .bind(job.error_message.as_deref())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(JobStoreError::DuplicateId(job.id)),
            Err(e) => Err(map_sqlx_error("insert_job", e)),
        }
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
        let sql = format!("SELECT {JOB_STATE_COLUMNS}, payload FROM upload_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;

        match row {
            Some(row) => decode_job(&row),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    #[instrument(skip(self), fields(submitter_id = %submitter_id), err)]
    async fn list_by_submitter(
        &self,
        submitter_id: SubmitterId,
    ) -> Result<Vec<UploadJob>, JobStoreError> {
        let sql = format!(
            "SELECT {JOB_STATE_COLUMNS}, payload FROM upload_jobs WHERE submitter_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        self.fetch_jobs(
            "list_by_submitter",
            sqlx::query(&sql).bind(*submitter_id.as_uuid()),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        let sql = format!(
            "SELECT {JOB_STATE_COLUMNS}, payload FROM upload_jobs \
             ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        self.fetch_jobs("list_recent", sqlx::query(&sql).bind(to_db_limit(limit)))
            .await
    }

    #[instrument(skip(self), err)]
    async fn list_pending(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        let sql = format!(
            "SELECT {JOB_STATE_COLUMNS}, payload FROM upload_jobs WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT $1"
        );
        self.fetch_jobs("list_pending", sqlx::query(&sql).bind(to_db_limit(limit)))
            .await
    }

    #[instrument(
        skip(self, update),
        fields(job_id = %job_id, expected = %update.expected, status = %update.status),
        err
    )]
    async fn update_status(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<UploadJob, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(&lock_job_sql())
            .bind(job_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_job", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(JobStoreError::NotFound(job_id));
        };

        let mut job = decode_job_state(&row)?;
        if let Err(e) = job.apply_update(&update, Utc::now()) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(JobStoreError::from_transition(job_id, e));
        }

        sqlx::query(
            r#"
            UPDATE upload_jobs
            SET status = $2,
                processed_rows = $3,
                failed_rows = $4,
                skipped_rows = $5,
                error_message = $6,
                started_at = $7,
                completed_at = $8
            WHERE id = $1
            "#,
        )
        .bind(job_id.as_uuid())
        .bind(job.status.as_str())
        .bind(to_db_count(job.progress.processed)?)
        .bind(to_db_count(job.progress.failed)?)
        .bind(to_db_count(job.progress.skipped)?)
        .bind(job.error_message.as_deref())
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_status", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS jobs FROM upload_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("job_stats", e))?;
            let jobs: i64 = row
                .try_get("jobs")
                .map_err(|e| map_sqlx_error("job_stats", e))?;
            let status: JobStatus = status
                .parse()
                .map_err(|e| JobStoreError::Storage(format!("unknown job status: {}", e)))?;
            let jobs = usize::try_from(jobs).unwrap_or_default();
            match status {
                JobStatus::Pending => stats.pending = jobs,
                JobStatus::Processing => stats.processing = jobs,
                JobStatus::Completed => stats.completed = jobs,
                JobStatus::Failed => stats.failed = jobs,
                JobStatus::Cancelled => stats.cancelled = jobs,
            }
        }
        Ok(stats)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(describe_sqlx_error(operation, &err))
}

fn to_db_count(value: u64) -> Result<i64, JobStoreError> {
    i64::try_from(value)
        .map_err(|_| JobStoreError::Storage(format!("row count {} exceeds BIGINT", value)))
}

fn to_db_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn lock_job_sql() -> String {
    format!("SELECT {JOB_STATE_COLUMNS} FROM upload_jobs WHERE id = $1 FOR UPDATE")
}

/// Decode a row selected with `JOB_STATE_COLUMNS`; the payload is left empty.
fn decode_job_state(row: &sqlx::postgres::PgRow) -> Result<UploadJob, JobStoreError> {
    JobRow::from_row(row)
        .map_err(|e| JobStoreError::Storage(format!("failed to deserialize job row: {}", e)))?
        .try_into()
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<UploadJob, JobStoreError> {
    let mut job = decode_job_state(row)?;
    let payload: Json<Vec<TransactionRow>> = row
        .try_get("payload")
        .map_err(|e| JobStoreError::Storage(format!("job {}: bad payload: {}", job.id, e)))?;
    job.payload = payload.0;
    Ok(job)
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: uuid::Uuid,
    submitter_id: uuid::Uuid,
    branch_id: uuid::Uuid,
    source_label: String,
    status: String,
    total_rows: i64,
    processed_rows: i64,
    failed_rows: i64,
    skipped_rows: i64,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            submitter_id: row.try_get("submitter_id")?,
            branch_id: row.try_get("branch_id")?,
            source_label: row.try_get("source_label")?,
            status: row.try_get("status")?,
            total_rows: row.try_get("total_rows")?,
            processed_rows: row.try_get("processed_rows")?,
            failed_rows: row.try_get("failed_rows")?,
            skipped_rows: row.try_get("skipped_rows")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl TryFrom<JobRow> for UploadJob {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let count = |value: i64, column: &str| {
            u64::try_from(value)
                .map_err(|_| JobStoreError::Storage(format!("negative {} in job {}", column, id)))
        };

        let status = row
            .status
            .parse()
            .map_err(|e| JobStoreError::Storage(format!("job {}: {}", row.id, e)))?;

        Ok(UploadJob {
            id: JobId::from_uuid(row.id),
            submitter_id: SubmitterId::from_uuid(row.submitter_id),
            branch_id: BranchId::from_uuid(row.branch_id),
            status,
            progress: JobProgress {
                total: count(row.total_rows, "total_rows")?,
                processed: count(row.processed_rows, "processed_rows")?,
                failed: count(row.failed_rows, "failed_rows")?,
                skipped: count(row.skipped_rows, "skipped_rows")?,
            },
            source_label: row.source_label,
            payload: Vec::new(),
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
