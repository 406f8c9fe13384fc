//! Server-side domain apply engine
//!
//! Validates one operation against canonical state and applies it inside a
//! single transaction. [`rules`] holds the pure business checks, [`ApplyEngine`]
//! does the reads and writes around them and [`batch`] drives ordered,
//! fail-fast batches.

pub mod batch;
mod engine;
mod payload;
pub mod rules;

pub use batch::{BatchFailure, BatchPolicy};
pub use engine::{AppliedRecord, ApplyEngine, ApplyOutcome};
pub use payload::{coerce_integer, PayloadReader};

use crate::protocol::ErrorKind;
use thiserror::Error;

/// Why an operation was rejected
#[derive(Error, Debug)]
pub enum ApplyError {
    /// Missing or malformed fields, or an unsupported operation
    #[error("{0}")]
    Validation(String),

    /// Target row (or referenced inventory item) does not exist
    #[error("{0}")]
    NotFound(String),

    /// Caller does not own the target row
    #[error("{0}")]
    Forbidden(String),

    /// Operation conflicts with current state, e.g. insufficient stock
    #[error("{0}")]
    Conflict(String),

    /// Storage failure; the transaction was rolled back
    #[error("storage error: {0}")]
    Storage(#[from] crate::Error),
}

impl ApplyError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl From<libsql::Error> for ApplyError {
    fn from(error: libsql::Error) -> Self {
        Self::Storage(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_not_permanent() {
        let err = ApplyError::Storage(crate::Error::Database("disk full".to_string()));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.kind().is_permanent());
        assert!(ApplyError::Conflict("x".to_string()).kind().is_permanent());
    }
}
