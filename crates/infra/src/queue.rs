//! Service facade the submission surface calls: admission, status queries and
//! cancellation, all straight against the job store.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use branchpoints_core::{DomainError, JobId, SubmitterId};
use branchpoints_uploads::{AdmissionPolicy, NewUpload, StatusUpdate, UploadJob};

use crate::jobs::{JobStats, JobStore, JobStoreError};

/// Error text stored on a job cancelled through [`UploadQueue::cancel`].
pub const CANCEL_NOTE: &str = "cancelled by submitter";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("upload job not found: {0}")]
    NotFound(JobId),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<DomainError> for UploadError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                UploadError::Validation(msg)
            }
        }
    }
}

impl From<JobStoreError> for UploadError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => UploadError::NotFound(id),
            JobStoreError::Conflict { .. } => UploadError::Conflict(err.to_string()),
            JobStoreError::DuplicateId(_)
            | JobStoreError::InvalidUpdate { .. }
            | JobStoreError::Storage(_) => UploadError::Persistence(err.to_string()),
        }
    }
}

/// Upload queue operations over a job store.
#[derive(Debug)]
pub struct UploadQueue<S> {
    store: Arc<S>,
    admission: AdmissionPolicy,
}

impl<S> Clone for UploadQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            admission: self.admission.clone(),
        }
    }
}

impl<S: JobStore> UploadQueue<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_admission(store, AdmissionPolicy::default())
    }

    pub fn with_admission(store: Arc<S>, admission: AdmissionPolicy) -> Self {
        Self { store, admission }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and enqueue an upload. Returns as soon as the pending job is
    /// stored; no row is processed here.
    pub async fn submit(&self, upload: NewUpload) -> Result<JobId, UploadError> {
        let job = UploadJob::admit(upload, &self.admission, Utc::now())?;
        let (job_id, rows) = (job.id, job.progress.total);
        let submitter_id = job.submitter_id;

        self.store.insert(job).await?;
        info!(job_id = %job_id, submitter_id = %submitter_id, rows, "upload job queued");
        Ok(job_id)
    }

    pub async fn status(&self, job_id: JobId) -> Result<UploadJob, UploadError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Jobs of one submitter, most recent first.
    pub async fn list_jobs(&self, submitter_id: SubmitterId) -> Result<Vec<UploadJob>, UploadError> {
        Ok(self.store.list_by_submitter(submitter_id).await?)
    }

    /// Jobs of all submitters, most recent first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<UploadJob>, UploadError> {
        Ok(self.store.list_recent(limit).await?)
    }

    /// Cancel a job that has not been claimed yet.
    pub async fn cancel(&self, job_id: JobId) -> Result<UploadJob, UploadError> {
        let job = self
            .store
            .update_status(job_id, StatusUpdate::cancel(CANCEL_NOTE))
            .await?;
        info!(job_id = %job_id, "upload job cancelled");
        Ok(job)
    }

    pub async fn stats(&self) -> Result<JobStats, UploadError> {
        Ok(self.store.stats().await?)
    }
}
