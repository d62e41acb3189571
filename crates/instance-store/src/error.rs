use thiserror::Error;

use crate::{IdempotencyKey, InstanceId, Version};

/// Errors that can occur when interacting with the instance store.
#[derive(Debug, Error)]
pub enum InstanceStoreError {
    /// A conditional update found a different version than expected.
    /// Another executor has written the record in the meantime.
    #[error(
        "Concurrency conflict for instance {instance_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        instance_id: InstanceId,
        expected: Version,
        actual: Version,
    },

    /// The idempotency key is already claimed by a different instance
    /// than the caller expected.
    #[error("Idempotency key {key} is already claimed")]
    IdempotencyConflict { key: IdempotencyKey },

    /// A record with this ID already exists.
    #[error("Instance already exists: {0}")]
    AlreadyExists(InstanceId),

    /// No record exists with this ID.
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for instance store operations.
pub type Result<T> = std::result::Result<T, InstanceStoreError>;
