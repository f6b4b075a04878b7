//! Infrastructure layer: job storage, customer adapters, ingestion, worker.

pub mod config;
pub mod customers;
pub mod db;
pub mod ingest;
pub mod jobs;
pub mod queue;


pub use config::Settings;
pub use ingest::{BatchIngestor, IngestError, RowOutcome};
pub use jobs::{JobStore, JobStoreError, UploadWorker, WorkerConfig, WorkerHandle};
pub use queue::{UploadError, UploadQueue};
