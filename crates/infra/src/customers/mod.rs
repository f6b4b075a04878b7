//! Customer identities and their point transactions.
//!
//! The ingestor reaches both through narrow traits:
//!
//! - `CustomerDirectory`: resolves `(mobile, branch)` to a stable customer id
//!   with an atomic conditional create
//! - `TransactionLedger`: appends balance-affecting records for a customer
//!
//! In-memory implementations back tests and benchmarks; the Postgres
//! implementations back the worker binary.

pub mod directory;
pub mod ledger;
pub mod postgres;

pub use directory::{
    CustomerDirectory, CustomerIdentity, DirectoryError, InMemoryCustomerDirectory, Resolved,
};
pub use ledger::{
    InMemoryTransactionLedger, LedgerError, NewTransaction, RecordedTransaction, TransactionLedger,
};
pub use postgres::{PostgresCustomerDirectory, PostgresTransactionLedger};
