//! Saga error types.

use common::InstanceId;
use domain::{CreditError, NotificationError, StorageError};
use instance_store::InstanceStoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::SagaStatus;

/// Retry classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Retrying the same call may succeed (network blips, throttling, timeouts).
    Transient,
    /// Retrying cannot help (validation failures, rejected input).
    Permanent,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transient => write!(f, "transient"),
            ErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// A classified failure reported by a step invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} error: {message}")]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

impl StepError {
    /// Creates a retryable error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a non-retryable error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Classifies an arbitrary error. Anything not known to be transient is
    /// permanent so that unknown failures never loop on retries.
    pub fn unclassified(error: &dyn std::fmt::Display) -> Self {
        Self::permanent(error.to_string())
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

impl From<StorageError> for StepError {
    fn from(err: StorageError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}

impl From<NotificationError> for StepError {
    fn from(err: NotificationError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}

impl From<CreditError> for StepError {
    fn from(err: CreditError) -> Self {
        Self::permanent(err.to_string())
    }
}

/// A saga definition failed offline validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Definition '{definition}' has no steps")]
    NoSteps { definition: String },

    #[error("Definition '{definition}' declares step '{step}' more than once")]
    DuplicateStep { definition: String, step: String },

    #[error("Step '{step}' references unregistered action '{action}'")]
    UnknownAction { step: String, action: String },

    #[error("Step '{step}' branches to unknown step '{target}'")]
    UnknownTarget { step: String, target: String },

    #[error("Definition '{definition}' contains a cycle through step '{step}'")]
    Cycle { definition: String, step: String },

    #[error("Step '{step}' has a zero timeout")]
    ZeroStepTimeout { step: String },

    #[error("Definition '{definition}' has a zero timeout")]
    ZeroSagaTimeout { definition: String },

    #[error("Step '{step}' allows zero attempts")]
    ZeroAttempts { step: String },

    #[error("Definition '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Errors returned to callers of the saga executor.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No definition is registered under this name.
    #[error("Saga definition not found: {0}")]
    DefinitionNotFound(String),

    /// No instance exists with this ID.
    #[error("Saga instance not found: {0}")]
    InstanceNotFound(InstanceId),

    /// A definition failed validation.
    #[error("Invalid saga definition: {0}")]
    InvalidDefinition(#[from] DefinitionError),

    /// The instance is in the wrong status for the requested operation.
    #[error("Saga instance {instance_id} is {status}")]
    InvalidState {
        instance_id: InstanceId,
        status: SagaStatus,
    },

    /// Instance store error.
    #[error("Instance store error: {0}")]
    Store(#[from] InstanceStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if another writer advanced the instance first.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(
            self,
            SagaError::Store(InstanceStoreError::ConcurrencyConflict { .. })
        )
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
