//! Database layer for Healthpost

mod canonical_repository;
mod connection;
mod local_repository;
mod migrations;
mod queue_repository;

pub use canonical_repository::{AppliedOperation, CanonicalRepository};
pub use connection::{Database, Schema};
pub use local_repository::LibSqlLocalRecords;
pub use queue_repository::{LibSqlOperationQueue, OperationQueue};
