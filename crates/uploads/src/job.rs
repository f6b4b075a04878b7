//! The upload job record and its guarded mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use branchpoints_core::{BranchId, DomainResult, JobId, SubmitterId};

use crate::admission::{AdmissionPolicy, NewUpload};
use crate::progress::JobProgress;
use crate::row::TransactionRow;
use crate::status::JobStatus;

/// One admitted bulk upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: JobId,
    pub submitter_id: SubmitterId,
    pub branch_id: BranchId,
    pub source_label: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    /// Rows in submission order; never modified after admission
    pub payload: Vec<TransactionRow>,
    /// Latest error text, replaced on every write
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set on the claim, never changed afterwards
    pub started_at: Option<DateTime<Utc>>,
    /// Set on the terminal transition, never changed afterwards
    pub completed_at: Option<DateTime<Utc>>,
}

/// Why a status update was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The optimistic precondition failed: someone else moved the job first.
    #[error("expected job to be {expected}, found {actual}")]
    StatusMismatch {
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    #[error("progress total is fixed at {expected}, update carried {found}")]
    TotalChanged { expected: u64, found: u64 },

    #[error("progress counters must not decrease or exceed the total")]
    ProgressRegressed,

    #[error("{status} requires every row accounted for ({accounted} of {total})")]
    Unaccounted {
        status: JobStatus,
        accounted: u64,
        total: u64,
    },
}

/// A conditional write of a job's mutable fields.
///
/// Applied only if the job is currently in `expected`; this precondition is
/// what makes the claim and the cancellation atomic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub expected: JobStatus,
    pub status: JobStatus,
    /// `None` keeps the current counters
    pub progress: Option<JobProgress>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    /// Pending → processing.
    pub fn claim() -> Self {
        Self {
            expected: JobStatus::Pending,
            status: JobStatus::Processing,
            progress: None,
            error_message: None,
        }
    }

    /// Pending → cancelled.
    pub fn cancel(note: impl Into<String>) -> Self {
        Self {
            expected: JobStatus::Pending,
            status: JobStatus::Cancelled,
            progress: None,
            error_message: Some(note.into()),
        }
    }

    /// Per-chunk progress write while processing.
    pub fn progress(progress: JobProgress, error_message: Option<String>) -> Self {
        Self {
            expected: JobStatus::Processing,
            status: JobStatus::Processing,
            progress: Some(progress),
            error_message,
        }
    }

    /// Processing → completed | failed.
    pub fn finish(status: JobStatus, progress: JobProgress, error_message: Option<String>) -> Self {
        Self {
            expected: JobStatus::Processing,
            status,
            progress: Some(progress),
            error_message,
        }
    }
}

impl UploadJob {
    /// Validate an upload request and build the pending job for it.
    pub fn admit(
        upload: NewUpload,
        policy: &AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        policy.validate(&upload)?;

        let NewUpload {
            submitter_id,
            branch_id,
            source_label,
            rows,
        } = upload;

        Ok(Self {
            id: JobId::new(),
            submitter_id,
            branch_id,
            source_label: source_label.trim().to_string(),
            status: JobStatus::Pending,
            progress: JobProgress::new(rows.len() as u64),
            payload: rows,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// A copy of the record with an empty payload.
    pub fn without_payload(&self) -> Self {
        Self {
            source_label: self.source_label.clone(),
            payload: Vec::new(),
            error_message: self.error_message.clone(),
            ..*self
        }
    }

    /// Check an update against the current record without applying it.
    pub fn check_update(&self, update: &StatusUpdate) -> Result<(), TransitionError> {
        if self.status != update.expected {
            return Err(TransitionError::StatusMismatch {
                expected: update.expected,
                actual: self.status,
            });
        }
        if !self.status.can_transition_to(update.status) {
            return Err(TransitionError::IllegalTransition {
                from: self.status,
                to: update.status,
            });
        }

        let next = update.progress.unwrap_or(self.progress);
        if next.total != self.progress.total {
            return Err(TransitionError::TotalChanged {
                expected: self.progress.total,
                found: next.total,
            });
        }
        if !self.progress.admits(&next) {
            return Err(TransitionError::ProgressRegressed);
        }
        if matches!(update.status, JobStatus::Completed | JobStatus::Failed)
            && !next.is_exhausted()
        {
            return Err(TransitionError::Unaccounted {
                status: update.status,
                accounted: next.accounted(),
                total: next.total,
            });
        }

        Ok(())
    }

    /// Apply a conditional update, stamping `started_at` / `completed_at` the
    /// first time the job enters processing / a terminal state.
    pub fn apply_update(
        &mut self,
        update: &StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.check_update(update)?;

        self.status = update.status;
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        self.error_message = update.error_message.clone();

        if self.status == JobStatus::Processing && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if self.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ChunkTally;
    use branchpoints_core::DomainError;
    use chrono::Duration;
    use proptest::prelude::*;

    fn admit(rows: usize) -> UploadJob {
        let rows = (0..rows)
            .map(|i| TransactionRow::new(format!("05500000{i:02}"), 10.0))
            .collect();
        UploadJob::admit(
            NewUpload::new(SubmitterId::new(), BranchId::new(), "  upload.xlsx ", rows),
            &AdmissionPolicy::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn admission_builds_pending_job() {
        let job = admit(3);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, JobProgress::new(3));
        assert_eq!(job.payload.len(), 3);
        assert_eq!(job.source_label, "upload.xlsx");
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn admission_rejects_invalid_upload() {
        let err = UploadJob::admit(
            NewUpload::new(SubmitterId::new(), BranchId::new(), "empty.xlsx", vec![]),
            &AdmissionPolicy::default(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn lifecycle_sets_timestamps_once() {
        let mut job = admit(2);
        let t0 = Utc::now();

        job.apply_update(&StatusUpdate::claim(), t0).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(t0));

        let mut progress = job.progress;
        progress.record(ChunkTally {
            applied: 1,
            failed: 1,
            skipped: 0,
        });
        let t1 = t0 + Duration::seconds(5);
        job.apply_update(&StatusUpdate::progress(progress, Some("row 2: boom".into())), t1)
            .unwrap();
        assert_eq!(job.started_at, Some(t0));
        assert!(job.completed_at.is_none());
        assert_eq!(job.error_message.as_deref(), Some("row 2: boom"));

        let t2 = t1 + Duration::seconds(5);
        job.apply_update(
            &StatusUpdate::finish(JobStatus::Completed, progress, None),
            t2,
        )
        .unwrap();
        assert_eq!(job.completed_at, Some(t2));
        assert!(job.error_message.is_none());
    }

    #[test]
    fn second_claim_is_a_status_mismatch() {
        let mut job = admit(1);
        job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap();

        let err = job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            TransitionError::StatusMismatch {
                expected: JobStatus::Pending,
                actual: JobStatus::Processing,
            }
        );
    }

    #[test]
    fn cancel_after_claim_is_rejected() {
        let mut job = admit(1);
        job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap();
        let before = job.clone();

        assert!(job.apply_update(&StatusUpdate::cancel("by user"), Utc::now()).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn cancel_marks_completion_time() {
        let mut job = admit(1);
        let now = Utc::now();
        job.apply_update(&StatusUpdate::cancel("cancelled by submitter"), now)
            .unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_at, Some(now));
        assert!(job.started_at.is_none());
    }

    #[test]
    fn finishing_with_unaccounted_rows_is_rejected() {
        let mut job = admit(4);
        job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap();

        let mut progress = job.progress;
        progress.record(ChunkTally {
            applied: 3,
            ..Default::default()
        });
        let err = job
            .apply_update(
                &StatusUpdate::finish(JobStatus::Completed, progress, None),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, TransitionError::Unaccounted { accounted: 3, total: 4, .. }));
    }

    #[test]
    fn total_cannot_be_rewritten() {
        let mut job = admit(4);
        job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap();

        let err = job
            .apply_update(&StatusUpdate::progress(JobProgress::new(5), None), Utc::now())
            .unwrap_err();
        assert_eq!(err, TransitionError::TotalChanged { expected: 4, found: 5 });
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: feeding any partition of the rows through progress writes
        /// keeps the counters within the total, and the final write balances.
        #[test]
        fn chunked_progress_never_exceeds_total(
            outcomes in prop::collection::vec(0u8..3, 1..300),
            chunk in 1usize..50,
        ) {
            let mut job = admit(outcomes.len());
            job.apply_update(&StatusUpdate::claim(), Utc::now()).unwrap();

            let mut progress = job.progress;
            for slice in outcomes.chunks(chunk) {
                let mut tally = ChunkTally::default();
                for outcome in slice {
                    match outcome {
                        0 => tally.applied += 1,
                        1 => tally.failed += 1,
                        _ => tally.skipped += 1,
                    }
                }
                progress.record(tally);
                job.apply_update(&StatusUpdate::progress(progress, None), Utc::now()).unwrap();
                prop_assert!(job.progress.accounted() <= job.progress.total);
                prop_assert_eq!(job.progress.total, outcomes.len() as u64);
            }

            job.apply_update(
                &StatusUpdate::finish(JobStatus::Completed, progress, None),
                Utc::now(),
            ).unwrap();
            prop_assert_eq!(job.progress.accounted(), job.progress.total);
        }
    }
}
