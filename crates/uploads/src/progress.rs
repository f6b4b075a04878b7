use serde::{Deserialize, Serialize};

/// Row counters of an upload job.
///
/// `total` is fixed at admission. The other counters only grow, and their sum
/// never exceeds `total`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: u64,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Outcome counts of one chunk.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ChunkTally {
    pub applied: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl ChunkTally {
    pub fn rows(&self) -> u64 {
        self.applied + self.failed + self.skipped
    }
}

impl JobProgress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Rows that have an outcome (applied, failed or skipped).
    pub fn accounted(&self) -> u64 {
        self.processed + self.failed + self.skipped
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.accounted())
    }

    pub fn is_exhausted(&self) -> bool {
        self.accounted() == self.total
    }

    /// Fold a chunk's counts into the running totals.
    pub fn record(&mut self, tally: ChunkTally) {
        self.processed += tally.applied;
        self.failed += tally.failed;
        self.skipped += tally.skipped;
    }

    /// Whether `next` is a legal successor of `self`: same total, no counter
    /// moving backwards, and nothing accounted beyond the total.
    pub fn admits(&self, next: &JobProgress) -> bool {
        next.total == self.total
            && next.processed >= self.processed
            && next.failed >= self.failed
            && next.skipped >= self.skipped
            && next.accounted() <= next.total
    }

    /// Share of rows that failed, in `0.0..=1.0`.
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failed as f64 / self.total as f64
        }
    }
}
