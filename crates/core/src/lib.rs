//! Identifiers and the error model shared by every `branchpoints` crate.
//!
//! Nothing in here knows about jobs, storage or async runtimes.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BranchId, CustomerId, JobId, SubmitterId, TransactionId};
