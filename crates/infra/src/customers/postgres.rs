//! Postgres-backed customer directory and transaction ledger.
//!
//! Identity resolution is a single `INSERT ... ON CONFLICT DO UPDATE ...
//! RETURNING` against the `(branch_id, mobile_number)` unique constraint, so
//! concurrent resolutions of the same pair converge on one row without a
//! separate existence check. The no-op `DO UPDATE` makes `RETURNING` yield the
//! existing row; `xmax = 0` tells a fresh insert from a conflict.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use branchpoints_core::{BranchId, CustomerId, TransactionId};
use branchpoints_uploads::MobileNumber;

use super::directory::{CustomerDirectory, CustomerIdentity, DirectoryError, Resolved};
use super::ledger::{LedgerError, NewTransaction, RecordedTransaction, TransactionLedger};
use crate::db::describe_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresCustomerDirectory {
    pool: Arc<PgPool>,
}

impl PostgresCustomerDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CustomerDirectory for PostgresCustomerDirectory {
    #[instrument(skip(self, mobile), fields(branch_id = %branch_id), err)]
    async fn resolve_or_create(
        &self,
        branch_id: BranchId,
        mobile: &MobileNumber,
    ) -> Result<Resolved, DirectoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO customer_numbers (customer_id, branch_id, mobile_number, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (branch_id, mobile_number)
                DO UPDATE SET mobile_number = EXCLUDED.mobile_number
            RETURNING customer_id, branch_id, mobile_number, created_at, (xmax = 0) AS created
            "#,
        )
        .bind(CustomerId::new().as_uuid())
        .bind(branch_id.as_uuid())
        .bind(mobile.as_str())
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| DirectoryError::Storage(describe_sqlx_error("resolve_or_create", &e)))?;

        let created: bool = row
            .try_get("created")
            .map_err(|e| DirectoryError::Storage(describe_sqlx_error("resolve_or_create", &e)))?;
        let identity = CustomerRow::from_row(&row)
            .map_err(|e| DirectoryError::Storage(format!("failed to decode customer row: {}", e)))?
            .into_identity()?;

        Ok(Resolved { identity, created })
    }
}

#[derive(Debug, Clone)]
pub struct PostgresTransactionLedger {
    pool: Arc<PgPool>,
}

impl PostgresTransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl TransactionLedger for PostgresTransactionLedger {
    #[instrument(
        skip(self, tx),
        fields(customer_id = %tx.customer_id, amount = %tx.amount),
        err
    )]
    async fn append(&self, tx: NewTransaction) -> Result<RecordedTransaction, LedgerError> {
        let recorded = RecordedTransaction::from_new(TransactionId::new(), tx, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO customer_transactions (
                id,
                customer_id,
                branch_id,
                job_id,
                amount_milli,
                external_id,
                transaction_date,
                note,
                recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(recorded.id.as_uuid())
        .bind(recorded.customer_id.as_uuid())
        .bind(recorded.branch_id.as_uuid())
        .bind(recorded.job_id.map(|id| *id.as_uuid()))
        .bind(recorded.amount.as_milli())
        .bind(recorded.external_id.as_deref())
        .bind(recorded.transaction_date)
        .bind(recorded.note.as_deref())
        .bind(recorded.recorded_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| LedgerError::Storage(describe_sqlx_error("append_transaction", &e)))?;

        Ok(recorded)
    }
}

// SQLx row types

#[derive(Debug)]
struct CustomerRow {
    customer_id: uuid::Uuid,
    branch_id: uuid::Uuid,
    mobile_number: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for CustomerRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(CustomerRow {
            customer_id: row.try_get("customer_id")?,
            branch_id: row.try_get("branch_id")?,
            mobile_number: row.try_get("mobile_number")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl CustomerRow {
    fn into_identity(self) -> Result<CustomerIdentity, DirectoryError> {
        let mobile = MobileNumber::parse(&self.mobile_number).map_err(|e| {
            DirectoryError::Storage(format!("stored mobile number is invalid: {}", e))
        })?;
        Ok(CustomerIdentity {
            customer_id: CustomerId::from_uuid(self.customer_id),
            branch_id: BranchId::from_uuid(self.branch_id),
            mobile,
            created_at: self.created_at,
        })
    }
}
