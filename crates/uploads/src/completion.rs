use crate::progress::JobProgress;
use crate::status::JobStatus;

/// Decides the terminal status of a job whose rows have all been accounted for.
///
/// A job fails when no row was applied or every row failed. Partial success
/// completes, unless `max_failure_rate` is set and the share of failed rows
/// exceeds it.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct CompletionPolicy {
    /// Failure share (`0.0..=1.0`) above which the job is marked failed
    pub max_failure_rate: Option<f64>,
}

impl CompletionPolicy {
    pub fn with_max_failure_rate(rate: f64) -> Self {
        Self {
            max_failure_rate: Some(rate.clamp(0.0, 1.0)),
        }
    }

    pub fn terminal_status(&self, progress: &JobProgress) -> JobStatus {
        let all_failed = progress.total > 0 && progress.failed == progress.total;
        let none_applied = progress.total > 0 && progress.processed == 0;
        let over_threshold = self
            .max_failure_rate
            .is_some_and(|rate| progress.failure_rate() > rate);

        if all_failed || none_applied || over_threshold {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    /// Error text stored with the terminal transition: a summary when rows
    /// failed, nothing for a clean run.
    pub fn terminal_message(&self, progress: &JobProgress, last_error: Option<&str>) -> Option<String> {
        if progress.failed == 0 {
            return None;
        }
        let summary = format!("{} of {} rows failed", progress.failed, progress.total);
        Some(match last_error {
            Some(err) => format!("{summary}; last error: {err}"),
            None => summary,
        })
    }
}
