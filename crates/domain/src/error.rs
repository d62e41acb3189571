//! Domain error types.

use thiserror::Error;

use crate::credit::CreditError;
use crate::storage::StorageError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in a backing data store.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A credit record failed validation.
    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),
}

/// Convenience type alias for domain results.
pub type Result<T> = std::result::Result<T, DomainError>;
