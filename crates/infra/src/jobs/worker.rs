//! Upload worker: discovery loop, claim, chunked processing.
//!
//! One long-lived task polls the store on a fixed interval, claims up to the
//! free capacity in pending jobs (oldest first) and spawns one processing task
//! per claimed job into a bounded `JoinSet`. A processing task walks the
//! payload in fixed-size chunks and persists progress after each chunk, then
//! makes the terminal transition.
//!
//! Cancellation of a job is store-mediated: a job cancelled before its claim is
//! never dispatched, and in-flight jobs are never interrupted. Stopping the
//! worker itself (`WorkerHandle::shutdown`) stops discovery and waits for the
//! in-flight jobs to finish.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use branchpoints_core::JobId;
use branchpoints_uploads::{ChunkTally, CompletionPolicy, JobStatus, StatusUpdate, UploadJob};

use super::retry::RetryPolicy;
use super::store::{JobStore, JobStoreError};
use crate::customers::{CustomerDirectory, TransactionLedger};
use crate::ingest::{BatchIngestor, RowOutcome};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upload worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name for logging
    pub name: String,
    /// Time between discovery polls, independent of how long a poll takes
    pub poll_interval: Duration,
    /// Most pending jobs fetched per poll
    pub pending_limit: usize,
    /// Most jobs processed at once
    pub max_in_flight: usize,
    /// Rows per progress write
    pub chunk_size: usize,
    /// Pause between row ingestions
    pub row_pause: Duration,
    /// Backoff for progress and terminal writes
    pub write_retry: RetryPolicy,
    pub completion: CompletionPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "upload-worker".to_string(),
            poll_interval: Duration::from_secs(2),
            pending_limit: 10,
            max_in_flight: 10,
            chunk_size: 100,
            row_pause: Duration::from_millis(10),
            write_retry: RetryPolicy::default(),
            completion: CompletionPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Clamped to at least one millisecond.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_pending_limit(mut self, limit: usize) -> Self {
        self.pending_limit = limit;
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Zero is treated as one.
    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = rows.max(1);
        self
    }

    pub fn with_row_pause(mut self, pause: Duration) -> Self {
        self.row_pause = pause;
        self
    }

    pub fn with_write_retry(mut self, policy: RetryPolicy) -> Self {
        self.write_retry = policy;
        self
    }

    pub fn with_completion_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion = policy;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    /// Jobs whose store writes gave up; they stay in processing
    pub jobs_abandoned: u64,
    /// Claims lost to another worker or a cancellation
    pub claims_lost: u64,
    pub polls_failed: u64,
    pub rows_applied: u64,
    pub rows_failed: u64,
    pub rows_skipped: u64,
    pub current_running: usize,
}

/// A processing task stopped before its terminal write.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id}: store write failed after {attempts} attempt(s): {source}")]
pub struct ProcessError {
    pub job_id: JobId,
    pub attempts: u32,
    #[source]
    pub source: JobStoreError,
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Stop discovery, wait for in-flight jobs to finish and return the
    /// final statistics.
    pub async fn shutdown(self) -> WorkerStats {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "upload worker task ended abnormally");
        }
        read_stats(&self.stats)
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }
}

/// Background upload worker.
///
/// Cheap to clone; clones share the store, the ingestor and the statistics.
pub struct UploadWorker<S, D, L> {
    store: Arc<S>,
    ingestor: Arc<BatchIngestor<D, L>>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S, D, L> Clone for UploadWorker<S, D, L> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ingestor: self.ingestor.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<S, D, L> UploadWorker<S, D, L>
where
    S: JobStore + 'static,
    D: CustomerDirectory + 'static,
    L: TransactionLedger + 'static,
{
    pub fn new(store: Arc<S>, ingestor: Arc<BatchIngestor<D, L>>, config: WorkerConfig) -> Self {
        Self {
            store,
            ingestor,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> WorkerStats {
        read_stats(&self.stats)
    }

    /// Spawn the discovery loop on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(cancel.clone()));

        WorkerHandle {
            cancel,
            join,
            stats,
        }
    }

    /// Poll once for pending jobs and claim up to `capacity` of them.
    ///
    /// A lost claim means another worker or a cancellation won; the job is
    /// skipped. Poll failures are logged and yield nothing.
    pub async fn discover(&self, capacity: usize) -> Vec<UploadJob> {
        let limit = self.config.pending_limit.min(capacity);
        if limit == 0 {
            return Vec::new();
        }

        let pending = match self.store.list_pending(limit).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(worker = %self.config.name, error = %e, "failed to poll pending jobs");
                self.update_stats(|s| s.polls_failed += 1);
                return Vec::new();
            }
        };

        let mut claimed = Vec::with_capacity(pending.len());
        for job in pending {
            match self.store.claim(job.id).await {
                Ok(job) => {
                    info!(
                        worker = %self.config.name,
                        job_id = %job.id,
                        rows = job.progress.total,
                        "claimed upload job"
                    );
                    self.update_stats(|s| s.jobs_claimed += 1);
                    claimed.push(job);
                }
                Err(e @ (JobStoreError::Conflict { .. } | JobStoreError::NotFound(_))) => {
                    debug!(worker = %self.config.name, job_id = %job.id, error = %e, "claim lost");
                    self.update_stats(|s| s.claims_lost += 1);
                }
                Err(e) => {
                    warn!(worker = %self.config.name, job_id = %job.id, error = %e, "failed to claim job");
                }
            }
        }
        claimed
    }

    /// Drive a claimed job through its rows and make the terminal transition.
    ///
    /// Row failures are counted, never escalated. An error is returned only
    /// when a store write gives up, in which case the job stays in processing.
    pub async fn process(&self, job: UploadJob) -> Result<UploadJob, ProcessError> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut progress = job.progress;
        let mut last_error: Option<String> = None;
        let mut session = self.ingestor.session(job.branch_id, job.id);

        for (chunk_index, chunk) in job.payload.chunks(chunk_size).enumerate() {
            let mut tally = ChunkTally::default();
            let mut chunk_error = None;

            for (offset, row) in chunk.iter().enumerate() {
                let row_number = chunk_index * chunk_size + offset + 1;
                if row_number > 1 && !self.config.row_pause.is_zero() {
                    tokio::time::sleep(self.config.row_pause).await;
                }

                match session.apply(row).await {
                    RowOutcome::Applied(_) => tally.applied += 1,
                    RowOutcome::Skipped => {
                        debug!(job_id = %job.id, row = row_number, "duplicate transaction id, row skipped");
                        tally.skipped += 1;
                    }
                    RowOutcome::Failed(e) => {
                        debug!(job_id = %job.id, row = row_number, error = %e, "row failed");
                        tally.failed += 1;
                        chunk_error = Some(format!("row {row_number}: {e}"));
                    }
                }
            }

            progress.record(tally);
            if chunk_error.is_some() {
                last_error.clone_from(&chunk_error);
            }
            self.write_with_retry(job.id, StatusUpdate::progress(progress, chunk_error))
                .await?;
            self.update_stats(|s| {
                s.rows_applied += tally.applied;
                s.rows_failed += tally.failed;
                s.rows_skipped += tally.skipped;
            });

            debug!(
                worker = %self.config.name,
                job_id = %job.id,
                chunk = chunk_index + 1,
                processed = progress.processed,
                failed = progress.failed,
                skipped = progress.skipped,
                total = progress.total,
                "chunk persisted"
            );
        }

        let status = self.config.completion.terminal_status(&progress);
        let message = self
            .config
            .completion
            .terminal_message(&progress, last_error.as_deref());
        let finished = self
            .write_with_retry(job.id, StatusUpdate::finish(status, progress, message))
            .await?;

        info!(
            worker = %self.config.name,
            job_id = %finished.id,
            status = %finished.status,
            processed = finished.progress.processed,
            failed = finished.progress.failed,
            skipped = finished.progress.skipped,
            "upload job finished"
        );
        Ok(finished)
    }

    /// Claim and process everything one poll finds, sequentially.
    pub async fn run_once(&self) -> Vec<Result<UploadJob, ProcessError>> {
        let mut results = Vec::new();
        for job in self.discover(self.config.max_in_flight).await {
            results.push(self.process(job).await);
        }
        results
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            worker = %self.config.name,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_in_flight = self.config.max_in_flight,
            "upload worker started"
        );

        let mut poll = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.task_ended(result);
                }
                _ = poll.tick() => {
                    let capacity = self.config.max_in_flight.saturating_sub(in_flight.len());
                    if capacity == 0 {
                        debug!(worker = %self.config.name, "at capacity, skipping poll");
                        continue;
                    }
                    for job in self.discover(capacity).await {
                        let worker = self.clone();
                        self.update_stats(|s| s.current_running += 1);
                        in_flight.spawn(async move { worker.process_and_record(job).await });
                    }
                }
            }
        }

        info!(
            worker = %self.config.name,
            in_flight = in_flight.len(),
            "upload worker stopping"
        );
        while let Some(result) = in_flight.join_next().await {
            self.task_ended(result);
        }
        info!(worker = %self.config.name, "upload worker stopped");
    }

    async fn process_and_record(self, job: UploadJob) {
        match self.process(job).await {
            Ok(job) => self.update_stats(|s| match job.status {
                JobStatus::Failed => s.jobs_failed += 1,
                _ => s.jobs_completed += 1,
            }),
            Err(e) => {
                error!(worker = %self.config.name, error = %e, "upload job abandoned in processing");
                self.update_stats(|s| s.jobs_abandoned += 1);
            }
        }
    }

    fn task_ended(&self, result: Result<(), JoinError>) {
        self.update_stats(|s| s.current_running = s.current_running.saturating_sub(1));
        if let Err(e) = result {
            error!(worker = %self.config.name, error = %e, "upload job task panicked");
            self.update_stats(|s| s.jobs_abandoned += 1);
        }
    }

    /// Write a status update, retrying transient store failures with backoff.
    async fn write_with_retry(
        &self,
        job_id: JobId,
        update: StatusUpdate,
    ) -> Result<UploadJob, ProcessError> {
        let policy = &self.config.write_retry;
        let mut attempt = 0u32;

        loop {
            let err = match self.store.update_status(job_id, update.clone()).await {
                Ok(job) => return Ok(job),
                Err(err) => err,
            };

            // a retried write may find its own earlier attempt already applied
            if attempt > 0 && matches!(err, JobStoreError::Conflict { .. }) {
                if let Ok(current) = self.store.get(job_id).await {
                    if current.status == update.status
                        && update.progress.is_none_or(|p| p == current.progress)
                    {
                        return Ok(current.without_payload());
                    }
                }
            }

            if err.is_transient() && policy.should_retry(attempt) {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    worker = %self.config.name,
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job store write failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            error!(
                worker = %self.config.name,
                job_id = %job_id,
                attempts = attempt + 1,
                error = %err,
                "giving up on job store write"
            );
            return Err(ProcessError {
                job_id,
                attempts: attempt + 1,
                source: err,
            });
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

fn read_stats(stats: &Mutex<WorkerStats>) -> WorkerStats {
    stats.lock().map(|s| s.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::customers::{InMemoryCustomerDirectory, InMemoryTransactionLedger};
    use crate::jobs::store::{InMemoryJobStore, JobStats};
    use branchpoints_core::{BranchId, SubmitterId};
    use branchpoints_uploads::{AdmissionPolicy, JobProgress, NewUpload, TransactionRow};

    /// Wraps the in-memory store, recording updates and failing the first
    /// `fail_updates` of them with a storage error.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryJobStore,
        fail_updates: AtomicUsize,
        updates: Mutex<Vec<StatusUpdate>>,
    }

    impl ScriptedStore {
        fn failing(n: usize) -> Self {
            Self {
                fail_updates: AtomicUsize::new(n),
                ..Default::default()
            }
        }

        fn progress_writes(&self) -> Vec<StatusUpdate> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.expected == JobStatus::Processing && u.status == JobStatus::Processing)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl JobStore for ScriptedStore {
        async fn insert(&self, job: UploadJob) -> Result<(), JobStoreError> {
            self.inner.insert(job).await
        }

        async fn get(&self, job_id: JobId) -> Result<UploadJob, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn list_by_submitter(
            &self,
            submitter_id: SubmitterId,
        ) -> Result<Vec<UploadJob>, JobStoreError> {
            self.inner.list_by_submitter(submitter_id).await
        }

        async fn list_recent(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
            self.inner.list_recent(limit).await
        }

        async fn list_pending(&self, limit: usize) -> Result<Vec<UploadJob>, JobStoreError> {
            self.inner.list_pending(limit).await
        }

        async fn update_status(
            &self,
            job_id: JobId,
            update: StatusUpdate,
        ) -> Result<UploadJob, JobStoreError> {
            let failing = self
                .fail_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(JobStoreError::Storage("connection reset".to_string()));
            }
            self.updates.lock().unwrap().push(update.clone());
            self.inner.update_status(job_id, update).await
        }

        async fn stats(&self) -> Result<JobStats, JobStoreError> {
            self.inner.stats().await
        }
    }

    type TestWorker<S> =
        UploadWorker<S, Arc<InMemoryCustomerDirectory>, Arc<InMemoryTransactionLedger>>;

    fn worker<S: JobStore + 'static>(store: Arc<S>, config: WorkerConfig) -> TestWorker<S> {
        let ingestor = Arc::new(BatchIngestor::new(
            Arc::new(InMemoryCustomerDirectory::new()),
            Arc::new(InMemoryTransactionLedger::new()),
        ));
        UploadWorker::new(store, ingestor, config)
    }

    async fn submit<S: JobStore>(store: &S, rows: Vec<TransactionRow>) -> UploadJob {
        let job = UploadJob::admit(
            NewUpload::new(SubmitterId::new(), BranchId::new(), "upload.xlsx", rows),
            &AdmissionPolicy::default(),
            Utc::now(),
        )
        .unwrap();
        store.insert(job.clone()).await.unwrap();
        job
    }

    fn rows(n: usize) -> Vec<TransactionRow> {
        (0..n)
            .map(|i| TransactionRow::new(format!("05500{:05}", i % 7), 1.0))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn persists_progress_after_each_chunk() {
        let store = Arc::new(ScriptedStore::default());
        let worker = worker(store.clone(), WorkerConfig::default().with_chunk_size(4));
        let job = submit(&*store, rows(10)).await;

        let results = worker.run_once().await;
        let finished = results.into_iter().next().unwrap().unwrap();

        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.processed, 10);
        assert!(finished.error_message.is_none());
        assert!(finished.completed_at.is_some());

        let processed: Vec<_> = store
            .progress_writes()
            .iter()
            .map(|u| u.progress.unwrap().processed)
            .collect();
        assert_eq!(processed, vec![4, 8, 10]);
        assert_eq!(store.get(job.id).await.unwrap().without_payload(), finished);
    }

    #[tokio::test(start_paused = true)]
    async fn row_failures_are_counted_with_row_numbers() {
        let store = Arc::new(ScriptedStore::default());
        let worker = worker(store.clone(), WorkerConfig::default().with_chunk_size(2));
        let job = submit(
            &*store,
            vec![
                TransactionRow::new("0551234567", 5.0),
                TransactionRow::new("", 5.0),
                TransactionRow::new("0551234567", 5.0),
            ],
        )
        .await;

        let finished = worker.run_once().await.remove(0).unwrap();
        assert_eq!(finished.id, job.id);
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(
            finished.progress,
            JobProgress {
                total: 3,
                processed: 2,
                failed: 1,
                skipped: 0,
            }
        );
        assert_eq!(
            finished.error_message.as_deref(),
            Some("1 of 3 rows failed; last error: row 2: mobile number is empty")
        );

        let messages: Vec<_> = store
            .progress_writes()
            .into_iter()
            .map(|u| u.error_message)
            .collect();
        assert_eq!(
            messages,
            vec![Some("row 2: mobile number is empty".to_string()), None]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_external_ids_are_skipped() {
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(store.clone(), WorkerConfig::default());
        submit(
            &*store,
            vec![
                TransactionRow::new("0551234567", 5.0).with_external_id("T-1"),
                TransactionRow::new("0551234567", 5.0).with_external_id("T-1"),
            ],
        )
        .await;

        let finished = worker.run_once().await.remove(0).unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.processed, 1);
        assert_eq!(finished.progress.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_threshold_fails_partial_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let config = WorkerConfig::default()
            .with_completion_policy(CompletionPolicy::with_max_failure_rate(0.25));
        let worker = worker(store.clone(), config);
        submit(
            &*store,
            vec![
                TransactionRow::new("0551234567", 5.0),
                TransactionRow::new("bogus", 5.0),
            ],
        )
        .await;

        let finished = worker.run_once().await.remove(0).unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_write_failures_are_retried() {
        let store = Arc::new(ScriptedStore::failing(2));
        let worker = worker(store.clone(), WorkerConfig::default());
        let job = submit(&*store, rows(3)).await;
        // claim through the inner store so the scripted failures hit progress writes
        let claimed = store.inner.claim(job.id).await.unwrap();

        let finished = worker.process(claimed).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn giving_up_leaves_job_processing() {
        let store = Arc::new(ScriptedStore::failing(usize::MAX));
        let config = WorkerConfig::default().with_write_retry(RetryPolicy::fixed(
            2,
            Duration::from_millis(50),
        ));
        let worker = worker(store.clone(), config);
        let job = submit(&*store, rows(3)).await;
        let claimed = store.inner.claim(job.id).await.unwrap();

        let err = worker.process(claimed).await.unwrap_err();
        assert_eq!(err.job_id, job.id);
        assert_eq!(err.attempts, 3);
        assert!(err.source.is_transient());

        let stored = store.get(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
        assert_eq!(stored.progress, JobProgress::new(3));
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_respects_capacity_and_skips_cancelled() {
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(store.clone(), WorkerConfig::default().with_pending_limit(2));

        let first = submit(&*store, rows(1)).await;
        let cancelled = submit(&*store, rows(1)).await;
        let third = submit(&*store, rows(1)).await;
        store
            .update_status(cancelled.id, StatusUpdate::cancel("cancelled by submitter"))
            .await
            .unwrap();

        assert!(worker.discover(0).await.is_empty());

        let claimed: Vec<_> = worker.discover(5).await.iter().map(|j| j.id).collect();
        assert_eq!(claimed, vec![first.id, third.id]);
        assert_eq!(worker.stats().jobs_claimed, 2);
        assert_eq!(
            store.get(cancelled.id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_worker_drains_queue_and_shuts_down() {
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(
            store.clone(),
            WorkerConfig::default().with_max_in_flight(2),
        );
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(submit(&*store, rows(3)).await.id);
        }

        let handle = worker.spawn();
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            if store.stats().await.unwrap().completed == ids.len() {
                break;
            }
        }

        assert_eq!(handle.stats().jobs_claimed, 5);
        let stats = handle.shutdown().await;

        for id in ids {
            assert_eq!(store.get(id).await.unwrap().status, JobStatus::Completed);
        }
        assert_eq!(stats.jobs_completed, 5);
        assert_eq!(stats.rows_applied, 15);
        assert_eq!(stats.current_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_still_processes() {
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::ZERO)
            .with_row_pause(Duration::ZERO);
        assert_eq!(config.poll_interval, Duration::from_millis(1));

        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(store.clone(), config);
        let job = submit(&*store, rows(2)).await;

        let handle = worker.spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = handle.shutdown().await;

        assert_eq!(stats.jobs_claimed, 1);
        assert_eq!(stats.jobs_completed, 1);
        assert_eq!(stats.jobs_abandoned, 0);
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_job() {
        let store = Arc::new(InMemoryJobStore::new());
        let worker = worker(
            store.clone(),
            WorkerConfig::default().with_row_pause(Duration::from_secs(1)),
        );
        let job = submit(&*store, rows(5)).await;

        let handle = worker.spawn();
        // first tick fires immediately and claims the job
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Processing);

        handle.shutdown().await;
        let finished = store.get(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress.processed, 5);
    }
}
