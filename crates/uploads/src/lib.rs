//! Upload job domain module.
//!
//! Business rules for bulk transaction uploads, implemented as deterministic
//! domain logic (no IO, no async runtime, no storage). Stores and workers in
//! `branchpoints-infra` call into these types so every adapter enforces the
//! same state machine.

pub mod admission;
pub mod completion;
pub mod job;
pub mod progress;
pub mod row;
pub mod status;

pub use admission::{AdmissionPolicy, AmountPolicy, NewUpload};
pub use completion::CompletionPolicy;
pub use job::{StatusUpdate, TransitionError, UploadJob};
pub use progress::{ChunkTally, JobProgress};
pub use row::{MobileNumber, Points, RowError, TransactionRow};
pub use status::JobStatus;
