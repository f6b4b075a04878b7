//! Upload job storage: the boundary trait and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use branchpoints_core::{JobId, SubmitterId};
use branchpoints_uploads::{JobStatus, StatusUpdate, TransitionError, UploadJob};

/// Durable keyed storage for upload jobs.
///
/// Every mutation after admission goes through [`JobStore::update_status`],
/// which must apply the update atomically with respect to other writers of
/// the same job and only if the job is still in `update.expected`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a newly admitted job. A duplicate id is a hard error.
    async fn insert(&self, job: UploadJob) -> Result<(), JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<UploadJob, JobStoreError>;

    /// Jobs of one submitter, most recent first.
    async fn list_by_submitter(
        &self,
        submitter_id: SubmitterId,
    ) -> Result<Vec<UploadJob>, JobStoreError>;

    /// Jobs of all submitters, most recent first, at most `limit`.
    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError>;

    /// Pending jobs, oldest first, at most `limit`.
    async fn list_pending(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError>;

    /// Conditionally rewrite status, progress and error text; returns the
    /// stored record after the write without its payload, which never
    /// changes after admission.
    async fn update_status(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<UploadJob, JobStoreError>;

    async fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Claim a pending job for processing and return it with its payload.
    /// Fails with [`JobStoreError::Conflict`] if another caller claimed or
    /// cancelled it first.
    async fn claim(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
        self.update_status(job_id, StatusUpdate::claim()).await?;
        self.get(job_id).await
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job already exists: {0}")]
    DuplicateId(JobId),

    /// The conditional write lost against another writer.
    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("invalid update for job {job_id}: {reason}")]
    InvalidUpdate { job_id: JobId, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    /// Failures worth retrying (the store was unreachable, not the write wrong).
    pub fn is_transient(&self) -> bool {
        matches!(self, JobStoreError::Storage(_))
    }

    pub(crate) fn from_transition(job_id: JobId, err: TransitionError) -> Self {
        match err {
            TransitionError::StatusMismatch { expected, actual } => JobStoreError::Conflict {
                job_id,
                expected,
                actual,
            },
            other => JobStoreError::InvalidUpdate {
                job_id,
                reason: other.to_string(),
            },
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl JobStats {
    pub fn count(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed + self.cancelled
    }
}

/// In-memory job store for tests/dev.
///
/// A single `RwLock` guards the map, so every `update_status` is an atomic
/// read-check-write.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, UploadJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<JobId, UploadJob>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<JobId, UploadJob>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Storage("job map lock poisoned".to_string()))
    }

    fn newest_first(mut jobs: Vec<UploadJob>) -> Vec<UploadJob> {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: UploadJob) -> Result<(), JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::DuplicateId(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
        self.read()?
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    async fn list_by_submitter(
        &self,
        submitter_id: SubmitterId,
    ) -> Result<Vec<UploadJob>, JobStoreError> {
        let jobs: Vec<_> = self
            .read()?
            .values()
            .filter(|j| j.submitter_id == submitter_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(jobs))
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        let jobs: Vec<_> = self.read()?.values().cloned().collect();
        let mut jobs = Self::newest_first(jobs);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        let jobs = self.read()?;
        let mut pending: Vec<&UploadJob> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();

        // FIFO; the v7 id breaks ties between jobs admitted in the same instant
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(pending.into_iter().take(limit).cloned().collect())
    }

    async fn update_status(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<UploadJob, JobStoreError> {
        let mut jobs = self.write()?;
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        job.apply_update(&update, Utc::now())
            .map_err(|e| JobStoreError::from_transition(job_id, e))?;
        Ok(job.without_payload())
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        let mut stats = JobStats::default();
        for job in self.read()?.values() {
            stats.count(job.status);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn insert(&self, job: UploadJob) -> Result<(), JobStoreError> {
        (**self).insert(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
        (**self).get(job_id).await
    }

    async fn list_by_submitter(
        &self,
        submitter_id: SubmitterId,
    ) -> Result<Vec<UploadJob>, JobStoreError> {
        (**self).list_by_submitter(submitter_id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        (**self).list_recent(limit).await
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
        (**self).list_pending(limit).await
    }

    async fn update_status(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<UploadJob, JobStoreError> {
        (**self).update_status(job_id, update).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats().await
    }

    async fn claim(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
        (**self).claim(job_id).await
    }
}
