use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use branchpoints_core::{BranchId, CustomerId, JobId, TransactionId};
use branchpoints_uploads::Points;

/// A balance-affecting record to append for a resolved customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    /// The upload job the record came from
    pub job_id: Option<JobId>,
    pub amount: Points,
    pub external_id: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedTransaction {
    pub id: TransactionId,
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    pub job_id: Option<JobId>,
    pub amount: Points,
    pub external_id: Option<String>,
    pub transaction_date: DateTime<Utc>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedTransaction {
    pub fn from_new(id: TransactionId, tx: NewTransaction, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id,
            customer_id: tx.customer_id,
            branch_id: tx.branch_id,
            job_id: tx.job_id,
            amount: tx.amount,
            external_id: tx.external_id,
            transaction_date: tx.transaction_date,
            note: tx.note,
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only store of customer transactions.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn append(&self, tx: NewTransaction) -> Result<RecordedTransaction, LedgerError>;
}

#[async_trait]
impl<L: TransactionLedger + ?Sized> TransactionLedger for Arc<L> {
    async fn append(&self, tx: NewTransaction) -> Result<RecordedTransaction, LedgerError> {
        (**self).append(tx).await
    }
}

/// In-memory ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLedger {
    records: Mutex<Vec<RecordedTransaction>>,
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records of one customer in append order.
    pub fn transactions_for(&self, customer_id: CustomerId) -> Vec<RecordedTransaction> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.customer_id == customer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sum of a customer's amounts.
    pub fn balance(&self, customer_id: CustomerId) -> Points {
        self.transactions_for(customer_id)
            .iter()
            .fold(Points::ZERO, |acc, r| acc.saturating_add(r.amount))
    }
}

#[async_trait]
impl TransactionLedger for InMemoryTransactionLedger {
    async fn append(&self, tx: NewTransaction) -> Result<RecordedTransaction, LedgerError> {
        let recorded = RecordedTransaction::from_new(TransactionId::new(), tx, Utc::now());
        self.records
            .lock()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))?
            .push(recorded.clone());
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(customer_id: CustomerId, amount: f64) -> NewTransaction {
        NewTransaction {
            customer_id,
            branch_id: BranchId::new(),
            job_id: None,
            amount: Points::from_amount(amount).unwrap(),
            external_id: None,
            transaction_date: Utc::now(),
            note: None,
        }
    }

    #[tokio::test]
    async fn balance_sums_amounts_including_reversals() {
        let ledger = InMemoryTransactionLedger::new();
        let alice = CustomerId::new();
        let bob = CustomerId::new();

        ledger.append(tx(alice, 100.0)).await.unwrap();
        ledger.append(tx(alice, -25.5)).await.unwrap();
        ledger.append(tx(bob, 3.0)).await.unwrap();

        assert_eq!(ledger.balance(alice).as_milli(), 74_500);
        assert_eq!(ledger.transactions_for(alice).len(), 2);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.balance(CustomerId::new()), Points::ZERO);
    }
}
