//! Per-row ingestion: resolve the customer, append the transaction.

use std::collections::HashSet;

use chrono::Utc;
use tracing::debug;

use branchpoints_core::{BranchId, CustomerId, JobId, TransactionId};
use branchpoints_uploads::{RowError, TransactionRow};

use crate::customers::{
    CustomerDirectory, DirectoryError, LedgerError, NewTransaction, TransactionLedger,
};

/// Why a single row could not be applied. Counted, never fatal to the job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Row(#[from] RowError),

    #[error("customer resolution failed: {0}")]
    Directory(#[from] DirectoryError),

    #[error("transaction write failed: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedRow {
    pub customer_id: CustomerId,
    pub transaction_id: TransactionId,
    /// The row created the customer identity
    pub new_customer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Applied(AppliedRow),
    /// External transaction id already applied earlier in the same job
    Skipped,
    Failed(IngestError),
}

impl RowOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RowOutcome::Applied(_))
    }
}

/// Applies transaction rows against a customer directory and a ledger.
///
/// Stateless across calls; duplicate detection within a job lives in
/// [`IngestSession`].
#[derive(Debug)]
pub struct BatchIngestor<D, L> {
    directory: D,
    ledger: L,
}

impl<D: CustomerDirectory, L: TransactionLedger> BatchIngestor<D, L> {
    pub fn new(directory: D, ledger: L) -> Self {
        Self { directory, ledger }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Apply one row outside of any job.
    pub async fn apply(&self, branch_id: BranchId, row: &TransactionRow) -> RowOutcome {
        match self.apply_row(branch_id, None, row).await {
            Ok(applied) => RowOutcome::Applied(applied),
            Err(e) => RowOutcome::Failed(e),
        }
    }

    /// Start applying the rows of one job.
    pub fn session(&self, branch_id: BranchId, job_id: JobId) -> IngestSession<'_, D, L> {
        IngestSession {
            ingestor: self,
            branch_id,
            job_id,
            seen: HashSet::new(),
        }
    }

    async fn apply_row(
        &self,
        branch_id: BranchId,
        job_id: Option<JobId>,
        row: &TransactionRow,
    ) -> Result<AppliedRow, IngestError> {
        let mobile = row.mobile_number()?;
        let amount = row.points()?;

        let resolved = self.directory.resolve_or_create(branch_id, &mobile).await?;
        if resolved.created {
            debug!(
                customer_id = %resolved.identity.customer_id,
                branch_id = %branch_id,
                "created customer identity"
            );
        }

        let recorded = self
            .ledger
            .append(NewTransaction {
                customer_id: resolved.identity.customer_id,
                branch_id,
                job_id,
                amount,
                external_id: row.external_key().map(str::to_string),
                transaction_date: row.date.unwrap_or_else(Utc::now),
                note: row.note.clone(),
            })
            .await?;

        Ok(AppliedRow {
            customer_id: recorded.customer_id,
            transaction_id: recorded.id,
            new_customer: resolved.created,
        })
    }
}

/// Row application scoped to one job.
pub struct IngestSession<'a, D, L> {
    ingestor: &'a BatchIngestor<D, L>,
    branch_id: BranchId,
    job_id: JobId,
    /// External ids applied so far in this job
    seen: HashSet<String>,
}

impl<D: CustomerDirectory, L: TransactionLedger> IngestSession<'_, D, L> {
    pub async fn apply(&mut self, row: &TransactionRow) -> RowOutcome {
        let key = row.external_key();
        if key.is_some_and(|k| self.seen.contains(k)) {
            return RowOutcome::Skipped;
        }

        match self
            .ingestor
            .apply_row(self.branch_id, Some(self.job_id), row)
            .await
        {
            Ok(applied) => {
                if let Some(k) = key {
                    self.seen.insert(k.to_string());
                }
                RowOutcome::Applied(applied)
            }
            Err(e) => RowOutcome::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::customers::{InMemoryCustomerDirectory, InMemoryTransactionLedger};

    type MemIngestor =
        BatchIngestor<Arc<InMemoryCustomerDirectory>, Arc<InMemoryTransactionLedger>>;

    fn ingestor() -> MemIngestor {
        BatchIngestor::new(
            Arc::new(InMemoryCustomerDirectory::new()),
            Arc::new(InMemoryTransactionLedger::new()),
        )
    }

    #[tokio::test]
    async fn applies_row_and_reuses_identity() {
        let ingestor = ingestor();
        let branch = BranchId::new();

        let first = ingestor
            .apply(branch, &TransactionRow::new("0551234567", 10.0))
            .await;
        let second = ingestor
            .apply(branch, &TransactionRow::new("055-123-4567", 5.0))
            .await;

        let (RowOutcome::Applied(a), RowOutcome::Applied(b)) = (first, second) else {
            panic!("both rows should apply");
        };
        assert!(a.new_customer);
        assert!(!b.new_customer);
        assert_eq!(a.customer_id, b.customer_id);
        assert_eq!(ingestor.ledger().balance(a.customer_id).as_milli(), 15_000);
    }

    #[tokio::test]
    async fn malformed_rows_fail_without_side_effects() {
        let ingestor = ingestor();
        let branch = BranchId::new();

        let empty = ingestor.apply(branch, &TransactionRow::new("  ", 10.0)).await;
        assert_eq!(empty, RowOutcome::Failed(IngestError::Row(RowError::EmptyMobile)));

        let nan = ingestor
            .apply(branch, &TransactionRow::new("0551234567", f64::NAN))
            .await;
        assert_eq!(nan, RowOutcome::Failed(IngestError::Row(RowError::NonFiniteAmount)));

        assert!(ingestor.directory().is_empty());
        assert!(ingestor.ledger().is_empty());
    }

    #[tokio::test]
    async fn session_skips_repeated_external_id() {
        let ingestor = ingestor();
        let mut session = ingestor.session(BranchId::new(), JobId::new());

        let row = TransactionRow::new("0551234567", 10.0).with_external_id("INV-7");
        assert!(session.apply(&row).await.is_applied());
        assert_eq!(session.apply(&row).await, RowOutcome::Skipped);

        let other = TransactionRow::new("0551234567", 10.0).with_external_id("INV-8");
        assert!(session.apply(&other).await.is_applied());
        assert_eq!(ingestor.ledger().len(), 2);
    }

    #[tokio::test]
    async fn failed_row_does_not_reserve_its_external_id() {
        let ingestor = ingestor();
        let mut session = ingestor.session(BranchId::new(), JobId::new());

        let bad = TransactionRow::new("", 10.0).with_external_id("INV-1");
        let good = TransactionRow::new("0551234567", 10.0).with_external_id("INV-1");
        assert!(matches!(session.apply(&bad).await, RowOutcome::Failed(_)));
        assert!(session.apply(&good).await.is_applied());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolution_creates_one_identity() {
        let ingestor = Arc::new(ingestor());
        let branch = BranchId::new();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let ingestor = ingestor.clone();
            tasks.spawn(async move {
                ingestor
                    .apply(branch, &TransactionRow::new("0551234567", 1.0))
                    .await
            });
        }

        let mut customers = HashSet::new();
        let mut created = 0;
        while let Some(outcome) = tasks.join_next().await {
            let RowOutcome::Applied(applied) = outcome.unwrap() else {
                panic!("row should apply");
            };
            customers.insert(applied.customer_id);
            created += usize::from(applied.new_customer);
        }

        assert_eq!(customers.len(), 1);
        assert_eq!(created, 1);
        assert_eq!(ingestor.directory().len(), 1);
        assert_eq!(ingestor.ledger().len(), 32);
    }
}
