//! Saga status state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga instance in its lifecycle.
///
/// State transitions:
/// ```text
/// Running ──┬──► Succeeded
///           └──► Compensating ──┬──► Failed
///                               └──► CompensationFailed
/// ```
///
/// `Compensating` is persisted so an interrupted unwind can be resumed, but
/// no forward step ever runs again once it is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// Forward steps are being executed.
    #[default]
    Running,

    /// A step failed, the saga timed out or was cancelled; compensations
    /// are being run in reverse order.
    Compensating,

    /// Every step on the taken path completed (terminal state).
    Succeeded,

    /// The saga was unwound and every compensation succeeded (terminal state).
    Failed,

    /// At least one compensation gave up; needs operator attention (terminal state).
    CompensationFailed,
}

impl SagaStatus {
    /// Returns true if forward steps may still run.
    pub fn can_advance(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if the saga can begin compensation.
    pub fn can_compensate(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if the unwind can be finished from this status.
    pub fn can_finish_unwind(&self) -> bool {
        matches!(self, SagaStatus::Compensating)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Succeeded | SagaStatus::Failed | SagaStatus::CompensationFailed
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Succeeded => "Succeeded",
            SagaStatus::Failed => "Failed",
            SagaStatus::CompensationFailed => "CompensationFailed",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
