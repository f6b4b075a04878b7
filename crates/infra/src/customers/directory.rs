use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use branchpoints_core::{BranchId, CustomerId};
use branchpoints_uploads::MobileNumber;

/// Stable customer id a mobile number resolves to within a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerIdentity {
    pub customer_id: CustomerId,
    pub branch_id: BranchId,
    pub mobile: MobileNumber,
    pub created_at: DateTime<Utc>,
}

/// Result of [`CustomerDirectory::resolve_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub identity: CustomerIdentity,
    /// `true` if this call created the identity
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Maps `(mobile, branch)` to customer identities.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Return the identity for `(mobile, branch)`, creating it if absent.
    ///
    /// Must be a single conditional write: concurrent callers for the same
    /// pair all observe the same identity and exactly one sees `created`.
    async fn resolve_or_create(
        &self,
        branch_id: BranchId,
        mobile: &MobileNumber,
    ) -> Result<Resolved, DirectoryError>;
}

#[async_trait]
impl<D: CustomerDirectory + ?Sized> CustomerDirectory for Arc<D> {
    async fn resolve_or_create(
        &self,
        branch_id: BranchId,
        mobile: &MobileNumber,
    ) -> Result<Resolved, DirectoryError> {
        (**self).resolve_or_create(branch_id, mobile).await
    }
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCustomerDirectory {
    identities: Mutex<HashMap<(BranchId, MobileNumber), CustomerIdentity>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities across all branches.
    pub fn len(&self) -> usize {
        self.identities.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<
        std::sync::MutexGuard<'_, HashMap<(BranchId, MobileNumber), CustomerIdentity>>,
        DirectoryError,
    > {
        self.identities
            .lock()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".to_string()))
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn resolve_or_create(
        &self,
        branch_id: BranchId,
        mobile: &MobileNumber,
    ) -> Result<Resolved, DirectoryError> {
        let mut identities = self.lock()?;
        match identities.entry((branch_id, mobile.clone())) {
            Entry::Occupied(existing) => Ok(Resolved {
                identity: existing.get().clone(),
                created: false,
            }),
            Entry::Vacant(slot) => {
                let identity = slot
                    .insert(CustomerIdentity {
                        customer_id: CustomerId::new(),
                        branch_id,
                        mobile: mobile.clone(),
                        created_at: Utc::now(),
                    })
                    .clone();
                Ok(Resolved {
                    identity,
                    created: true,
                })
            }
        }
    }
}
