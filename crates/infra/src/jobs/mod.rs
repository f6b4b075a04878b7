//! Upload job storage and background processing.
//!
//! ## Components
//!
//! - `JobStore`: durable job records with conditional status updates
//! - `UploadWorker`: polls for pending jobs, claims them and drives ingestion
//! - `RetryPolicy`: backoff for transient store failures

pub mod postgres;
pub mod retry;
pub mod store;
pub mod worker;

pub use postgres::PostgresJobStore;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use worker::{ProcessError, UploadWorker, WorkerConfig, WorkerHandle, WorkerStats};
