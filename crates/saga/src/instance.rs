//! Saga instance: one execution of a definition for one request.

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, InstanceId};
use instance_store::InstanceRecord;
use serde::{Deserialize, Serialize};

use crate::context::{INSTANCE_ID_KEY, SagaContext};
use crate::error::StepError;
use crate::state::SagaStatus;

/// Whether an invocation attempt succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failure,
}

/// Outcome of one invocation attempt of a forward or compensating action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    /// 1-based attempt number for this step.
    pub attempt: u32,
    pub outcome: StepOutcome,
    /// Present on success.
    pub output: Option<SagaContext>,
    /// Present on failure.
    pub error: Option<StepError>,
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn success(step_name: impl Into<String>, attempt: u32, output: SagaContext) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            outcome: StepOutcome::Success,
            output: Some(output),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(step_name: impl Into<String>, attempt: u32, error: StepError) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            outcome: StepOutcome::Failure,
            output: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// One execution of a saga definition.
///
/// The instance is a plain value: the executor mutates it through the
/// methods below and persists it after every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    instance_id: InstanceId,
    definition_name: String,
    idempotency_key: IdempotencyKey,
    status: SagaStatus,
    initial_context: SagaContext,
    context: SagaContext,
    /// Next forward step to run while `Running`.
    current_step: Option<String>,
    /// Every forward attempt, in order.
    completed_steps: Vec<StepResult>,
    /// Every compensation attempt, in order.
    compensations: Vec<StepResult>,
    /// Steps whose compensation is finished, successfully or not.
    unwound: Vec<String>,
    failure_reason: Option<String>,
    last_error: Option<StepError>,
    started_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl SagaInstance {
    /// Creates a running instance positioned at `first_step`.
    pub fn new(
        definition_name: impl Into<String>,
        idempotency_key: IdempotencyKey,
        first_step: impl Into<String>,
        initial_context: SagaContext,
        timeout: std::time::Duration,
    ) -> Self {
        let instance_id = InstanceId::new();
        let initial_context = initial_context.with(INSTANCE_ID_KEY, instance_id.to_string());
        let started_at = Utc::now();
        let deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            instance_id,
            definition_name: definition_name.into(),
            idempotency_key,
            status: SagaStatus::Running,
            context: initial_context.clone(),
            initial_context,
            current_step: Some(first_step.into()),
            completed_steps: Vec::new(),
            compensations: Vec::new(),
            unwound: Vec::new(),
            failure_reason: None,
            last_error: None,
            started_at,
            deadline,
            finished_at: None,
        }
    }

    /// Appends a forward attempt. A success merges its output into the context.
    pub fn record_step(&mut self, result: StepResult) {
        if let Some(ref output) = result.output
            && result.is_success()
        {
            self.context.merge(output);
        }
        if let Some(ref error) = result.error {
            self.last_error = Some(error.clone());
        }
        self.completed_steps.push(result);
    }

    /// Moves the forward cursor to `step`.
    pub fn advance_to(&mut self, step: impl Into<String>) {
        self.current_step = Some(step.into());
    }

    /// Ends the forward path successfully.
    pub fn succeed(&mut self) {
        if self.status.can_advance() {
            self.status = SagaStatus::Succeeded;
            self.current_step = None;
            self.finished_at = Some(Utc::now());
        }
    }

    /// Switches to `Compensating`. Returns false if the instance is not running.
    pub fn begin_compensation(&mut self, reason: impl Into<String>) -> bool {
        if !self.status.can_compensate() {
            return false;
        }
        self.status = SagaStatus::Compensating;
        self.current_step = None;
        self.failure_reason = Some(reason.into());
        true
    }

    /// Appends a compensation attempt.
    pub fn record_compensation(&mut self, result: StepResult) {
        if let Some(ref error) = result.error {
            self.last_error = Some(error.clone());
        }
        self.compensations.push(result);
    }

    /// Marks the compensation of `step` as finished.
    pub fn mark_unwound(&mut self, step: impl Into<String>) {
        let step = step.into();
        if !self.unwound.contains(&step) {
            self.unwound.push(step);
        }
    }

    /// Ends the unwind as `Failed`, or `CompensationFailed` if any
    /// compensation gave up.
    pub fn finish_unwind(&mut self) {
        if self.status.can_finish_unwind() {
            self.status = if self.has_failed_compensation() {
                SagaStatus::CompensationFailed
            } else {
                SagaStatus::Failed
            };
            self.finished_at = Some(Utc::now());
        }
    }

    /// Context as it stood right after `step` succeeded.
    pub fn context_after(&self, step: &str) -> SagaContext {
        let mut context = self.initial_context.clone();
        for result in &self.completed_steps {
            if let Some(ref output) = result.output
                && result.is_success()
            {
                context.merge(output);
                if result.step_name == step {
                    break;
                }
            }
        }
        context
    }

    /// Successful forward results, most recent first.
    pub fn steps_to_unwind(&self) -> Vec<&StepResult> {
        self.completed_steps
            .iter()
            .filter(|r| r.is_success())
            .rev()
            .collect()
    }

    /// Number of forward attempts already made for `step`.
    pub fn attempts_for(&self, step: &str) -> u32 {
        self.completed_steps
            .iter()
            .filter(|r| r.step_name == step)
            .count() as u32
    }

    /// Number of compensation attempts already made for `step`.
    pub fn compensation_attempts_for(&self, step: &str) -> u32 {
        self.compensations
            .iter()
            .filter(|r| r.step_name == step)
            .count() as u32
    }

    pub fn is_unwound(&self, step: &str) -> bool {
        self.unwound.iter().any(|s| s == step)
    }

    /// True if some compensation's last attempt failed.
    pub fn has_failed_compensation(&self) -> bool {
        self.unwound.iter().any(|step| {
            self.compensations
                .iter()
                .rev()
                .find(|r| &r.step_name == step)
                .is_some_and(|r| !r.is_success())
        })
    }

    /// Returns true once the saga deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }

    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.deadline - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Builds the store envelope for this instance.
    pub fn to_record(&self) -> Result<InstanceRecord, serde_json::Error> {
        let mut record = InstanceRecord::from_payload(
            self.instance_id,
            self.definition_name.clone(),
            self.idempotency_key.clone(),
            self.status.as_str(),
            self.status.is_terminal(),
            self,
        )?;
        record.created_at = self.started_at;
        Ok(record)
    }

    /// Restores an instance from its store envelope.
    pub fn from_record(record: &InstanceRecord) -> Result<Self, serde_json::Error> {
        record.decode()
    }
}

// Query methods
impl SagaInstance {
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn definition_name(&self) -> &str {
        &self.definition_name
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn context(&self) -> &SagaContext {
        &self.context
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    /// Every forward attempt in order, failed attempts included.
    pub fn completed_steps(&self) -> &[StepResult] {
        &self.completed_steps
    }

    /// Names of the forward steps that succeeded, in order.
    pub fn succeeded_step_names(&self) -> Vec<&str> {
        self.completed_steps
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.step_name.as_str())
            .collect()
    }

    pub fn compensations(&self) -> &[StepResult] {
        &self.compensations
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn last_error(&self) -> Option<&StepError> {
        self.last_error.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}
