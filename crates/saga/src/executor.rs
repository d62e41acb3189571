//! Saga executor: drives instances from `Running` to a terminal status.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use common::{IdempotencyKey, InstanceId, Version};
use domain::{Monitoring, NoopMonitoring};
use instance_store::{InstanceQuery, InstanceStore, InstanceStoreError, KeyClaim};

use crate::context::SagaContext;
use crate::definition::{SagaDefinition, StepDefinition, TerminalOutcome, Transition};
use crate::error::{DefinitionError, Result, SagaError, StepError};
use crate::instance::{SagaInstance, StepResult};
use crate::invoker::{ActionRegistry, StepInvoker};
use crate::registry::DefinitionRegistry;
use crate::retry::RetryPolicy;
use crate::state::SagaStatus;

pub const REASON_TIMED_OUT: &str = "saga timed out";
pub const REASON_CANCELLED: &str = "saga cancelled";

/// Defaults applied to steps that do not set their own policy.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub default_retry: RetryPolicy,
    pub default_step_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            default_step_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of [`SagaExecutor::admit`].
#[derive(Debug, Clone)]
pub struct Admission {
    pub instance: SagaInstance,
    /// False if an existing instance answered for the idempotency key.
    pub created: bool,
}

enum Invocation {
    Completed(std::result::Result<SagaContext, StepError>),
    TimedOut,
}

type InFlight = Arc<Mutex<HashSet<InstanceId>>>;

/// Marks an instance as driven by this executor until dropped.
struct InFlightGuard {
    set: InFlight,
    instance_id: InstanceId,
}

impl InFlightGuard {
    fn acquire(set: &InFlight, instance_id: InstanceId) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(instance_id).then(|| Self {
            set: Arc::clone(set),
            instance_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.instance_id);
    }
}

/// Runs saga instances against a definition registry.
///
/// Every attempt is persisted with a compare-and-swap on the instance
/// version, so two executors sharing a store can never both advance the
/// same instance: the loser gets a concurrency conflict and stops.
pub struct SagaExecutor<S: InstanceStore> {
    store: S,
    definitions: Arc<DefinitionRegistry>,
    actions: Arc<ActionRegistry>,
    monitoring: Arc<dyn Monitoring>,
    config: ExecutorConfig,
    in_flight: InFlight,
}

impl<S: InstanceStore> SagaExecutor<S> {
    /// Creates an executor with default config and no-op monitoring.
    pub fn new(store: S, definitions: DefinitionRegistry, actions: ActionRegistry) -> Self {
        Self {
            store,
            definitions: Arc::new(definitions),
            actions: Arc::new(actions),
            monitoring: Arc::new(NoopMonitoring),
            config: ExecutorConfig::default(),
            in_flight: Arc::default(),
        }
    }

    pub fn with_monitoring(mut self, monitoring: Arc<dyn Monitoring>) -> Self {
        self.monitoring = monitoring;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Returns true if this executor is currently driving the instance.
    pub fn is_in_flight(&self, instance_id: InstanceId) -> bool {
        let guard = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        guard.contains(&instance_id)
    }

    fn definition(&self, name: &str) -> Result<Arc<SagaDefinition>> {
        self.definitions
            .get(name)
            .ok_or_else(|| SagaError::DefinitionNotFound(name.to_string()))
    }

    /// Submits a request and returns the ID of the instance answering for it.
    pub async fn submit(
        &self,
        definition_name: &str,
        initial_context: SagaContext,
        idempotency_key: IdempotencyKey,
    ) -> Result<InstanceId> {
        let instance = self
            .start(definition_name, initial_context, idempotency_key)
            .await?;
        Ok(instance.instance_id())
    }

    /// Starts a saga and drives it to a terminal status.
    ///
    /// If an instance already answers for `idempotency_key` and it is
    /// non-terminal or succeeded, that instance is returned as it stands and
    /// nothing is executed.
    #[tracing::instrument(skip(self, initial_context))]
    pub async fn start(
        &self,
        definition_name: &str,
        initial_context: SagaContext,
        idempotency_key: IdempotencyKey,
    ) -> Result<SagaInstance> {
        let admission = self
            .admit(definition_name, initial_context, idempotency_key)
            .await?;
        if !admission.created {
            return Ok(admission.instance);
        }
        self.run(admission.instance.instance_id()).await
    }

    /// Persists a new instance for a request without running it, or returns
    /// the instance already answering for the key.
    ///
    /// A key whose instance ended `Failed` or `CompensationFailed` is moved
    /// to a fresh instance; the old one is kept for audit.
    pub async fn admit(
        &self,
        definition_name: &str,
        initial_context: SagaContext,
        idempotency_key: IdempotencyKey,
    ) -> Result<Admission> {
        let definition = self.definition(definition_name)?;
        let first_step = definition
            .first_step()
            .ok_or_else(|| DefinitionError::NoSteps {
                definition: definition.name.clone(),
            })?;

        let claim = match self.store.find_by_idempotency_key(&idempotency_key).await? {
            Some(record) => {
                let existing = SagaInstance::from_record(&record)?;
                match existing.status() {
                    SagaStatus::Failed | SagaStatus::CompensationFailed => {
                        KeyClaim::Supersede(existing.instance_id())
                    }
                    _ => {
                        tracing::info!(
                            instance_id = %existing.instance_id(),
                            status = %existing.status(),
                            "idempotent resubmission"
                        );
                        return Ok(Admission {
                            instance: existing,
                            created: false,
                        });
                    }
                }
            }
            None => KeyClaim::New,
        };

        let instance = SagaInstance::new(
            definition.name.clone(),
            idempotency_key.clone(),
            first_step.name.clone(),
            initial_context,
            definition.timeout,
        );

        match self.store.create(instance.to_record()?, claim).await {
            Ok(_) => {
                self.monitoring.increment_counter("saga_submissions_total");
                tracing::info!(instance_id = %instance.instance_id(), "saga instance created");
                Ok(Admission {
                    instance,
                    created: true,
                })
            }
            Err(err @ InstanceStoreError::IdempotencyConflict { .. }) => {
                // A concurrent submission claimed the key first.
                match self.store.find_by_idempotency_key(&idempotency_key).await? {
                    Some(record) => Ok(Admission {
                        instance: SagaInstance::from_record(&record)?,
                        created: false,
                    }),
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the current state of an instance.
    pub async fn get_status(&self, instance_id: InstanceId) -> Result<SagaInstance> {
        let record = self
            .store
            .get(instance_id)
            .await?
            .ok_or(SagaError::InstanceNotFound(instance_id))?;
        Ok(SagaInstance::from_record(&record)?)
    }

    /// Requests cancellation of a running instance.
    ///
    /// The executor driving the instance observes the request at the next
    /// step boundary and unwinds.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, instance_id: InstanceId) -> Result<SagaInstance> {
        let instance = self.get_status(instance_id).await?;
        if !instance.status().can_compensate() {
            return Err(SagaError::InvalidState {
                instance_id,
                status: instance.status(),
            });
        }
        self.store.request_cancellation(instance_id).await?;
        tracing::info!("cancellation requested");
        Ok(instance)
    }

    /// IDs of every non-terminal instance, oldest first.
    pub async fn active_instances(&self) -> Result<Vec<InstanceId>> {
        let records = self.store.query(InstanceQuery::active()).await?;
        Ok(records.into_iter().map(|r| r.instance_id).collect())
    }

    /// Drives an instance until it is terminal and returns its final state.
    ///
    /// Resumes from whatever was last persisted, so it is safe to call after
    /// a crash. If this executor is already driving the instance the current
    /// state is returned without doing anything.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, instance_id: InstanceId) -> Result<SagaInstance> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, instance_id) else {
            tracing::debug!("instance already in flight");
            return self.get_status(instance_id).await;
        };

        let record = self
            .store
            .get(instance_id)
            .await?
            .ok_or(SagaError::InstanceNotFound(instance_id))?;
        let mut version = record.version;
        let mut instance = SagaInstance::from_record(&record)?;

        if instance.status().is_terminal() {
            return Ok(instance);
        }

        let definition = self.definition(instance.definition_name())?;
        self.drive(&definition, &mut instance, &mut version).await?;
        Ok(instance)
    }

    async fn drive(
        &self,
        definition: &SagaDefinition,
        instance: &mut SagaInstance,
        version: &mut Version,
    ) -> Result<()> {
        loop {
            match instance.status() {
                SagaStatus::Running => self.step_forward(definition, instance, version).await?,
                SagaStatus::Compensating => self.unwind(definition, instance, version).await?,
                SagaStatus::Succeeded | SagaStatus::Failed | SagaStatus::CompensationFailed => {
                    self.record_outcome(instance);
                    return Ok(());
                }
            }
        }
    }

    /// Runs one forward attempt of the current step and persists the result.
    async fn step_forward(
        &self,
        definition: &SagaDefinition,
        instance: &mut SagaInstance,
        version: &mut Version,
    ) -> Result<()> {
        let now = Utc::now();
        let Some(remaining) = instance.remaining(now) else {
            tracing::warn!(deadline = %instance.deadline(), "saga timed out");
            instance.begin_compensation(REASON_TIMED_OUT);
            return self.persist(instance, version).await;
        };

        if self
            .store
            .is_cancellation_requested(instance.instance_id())
            .await?
        {
            tracing::info!("cancellation observed");
            instance.begin_compensation(REASON_CANCELLED);
            return self.persist(instance, version).await;
        }

        let Some(step) = instance.current_step().and_then(|name| definition.step(name)) else {
            instance.begin_compensation("instance is positioned at an unknown step");
            return self.persist(instance, version).await;
        };

        let attempt = instance.attempts_for(&step.name) + 1;
        let policy = self.retry_policy(step);
        let step_timeout = self.step_timeout(step);
        let bounded_by_deadline = remaining < step_timeout;
        let bound = step_timeout.min(remaining);

        tracing::info!(step = %step.name, attempt, "step started");
        self.monitoring.increment_counter("saga_step_attempts_total");

        let result = match self.actions.get(step.action.as_str()) {
            Some(invoker) => {
                let timer = self.monitoring.start_timer("saga_step");
                let invocation = invoke(invoker, instance.context().clone(), bound).await;
                timer.end();
                match invocation {
                    Invocation::Completed(result) => result,
                    Invocation::TimedOut
                        if bounded_by_deadline || instance.is_expired(Utc::now()) =>
                    {
                        tracing::warn!(step = %step.name, "saga timed out during step; result discarded");
                        instance.begin_compensation(REASON_TIMED_OUT);
                        return self.persist(instance, version).await;
                    }
                    Invocation::TimedOut => Err(StepError::transient(format!(
                        "step '{}' timed out after {:?}",
                        step.name, bound
                    ))),
                }
            }
            None => Err(StepError::permanent(format!(
                "action '{}' is not registered",
                step.action
            ))),
        };

        match result {
            Ok(output) => {
                let transition = definition.transition_after(&step.name, &output);
                instance.record_step(StepResult::success(&step.name, attempt, output));
                tracing::info!(step = %step.name, attempt, "step succeeded");

                match transition {
                    Transition::NextStep(next) => instance.advance_to(next),
                    Transition::Terminal(TerminalOutcome::Succeeded) => instance.succeed(),
                    Transition::Terminal(TerminalOutcome::Failed) => {
                        instance.begin_compensation(format!(
                            "step '{}' routed to failure",
                            step.name
                        ));
                    }
                }
                self.persist(instance, version).await
            }
            Err(error) => {
                tracing::warn!(step = %step.name, attempt, error = %error, "step failed");
                self.monitoring.record_error("saga_step", &error);

                let retry = policy.should_retry(attempt, error.kind);
                let reason = format!("step '{}' failed: {}", step.name, error);
                instance.record_step(StepResult::failure(&step.name, attempt, error));

                if !retry {
                    instance.begin_compensation(reason);
                    return self.persist(instance, version).await;
                }

                self.monitoring.increment_counter("saga_step_retries_total");
                self.persist(instance, version).await?;

                // Never back off past the saga deadline.
                let delay = instance
                    .remaining(Utc::now())
                    .map_or(Duration::ZERO, |left| policy.delay_for(attempt).min(left));
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Compensates every successful step, most recent first, then finishes
    /// the instance as `Failed` or `CompensationFailed`.
    ///
    /// A compensation that gives up is recorded and the unwind moves on to
    /// the earlier steps.
    async fn unwind(
        &self,
        definition: &SagaDefinition,
        instance: &mut SagaInstance,
        version: &mut Version,
    ) -> Result<()> {
        tracing::info!(reason = instance.failure_reason().unwrap_or_default(), "unwinding saga");

        let pending: Vec<String> = instance
            .steps_to_unwind()
            .into_iter()
            .map(|r| r.step_name.clone())
            .filter(|name| !instance.is_unwound(name))
            .collect();

        for step_name in pending {
            let Some(step) = definition.step(&step_name) else {
                instance.mark_unwound(&step_name);
                continue;
            };
            let Some(compensation) = step.compensation.as_ref() else {
                instance.mark_unwound(&step_name);
                continue;
            };

            let context = instance.context_after(&step_name);
            let policy = self.retry_policy(step);
            let bound = self.step_timeout(step);

            loop {
                let attempt = instance.compensation_attempts_for(&step_name) + 1;
                tracing::info!(step = %step_name, action = %compensation, attempt, "compensation started");

                let result = match self.actions.get(compensation.as_str()) {
                    Some(invoker) => {
                        let timer = self.monitoring.start_timer("saga_compensation");
                        let invocation = invoke(invoker, context.clone(), bound).await;
                        timer.end();
                        match invocation {
                            Invocation::Completed(result) => result,
                            Invocation::TimedOut => Err(StepError::transient(format!(
                                "compensation '{compensation}' timed out after {bound:?}"
                            ))),
                        }
                    }
                    None => Err(StepError::permanent(format!(
                        "action '{compensation}' is not registered"
                    ))),
                };

                match result {
                    Ok(output) => {
                        instance.record_compensation(StepResult::success(
                            &step_name, attempt, output,
                        ));
                        instance.mark_unwound(&step_name);
                        tracing::info!(step = %step_name, attempt, "compensation succeeded");
                        self.persist(instance, version).await?;
                        break;
                    }
                    Err(error) => {
                        self.monitoring.record_error("saga_compensation", &error);
                        let retry = policy.should_retry(attempt, error.kind);
                        instance.record_compensation(StepResult::failure(
                            &step_name,
                            attempt,
                            error.clone(),
                        ));

                        if retry {
                            tracing::warn!(step = %step_name, attempt, error = %error, "compensation failed, retrying");
                            self.persist(instance, version).await?;
                            tokio::time::sleep(policy.delay_for(attempt)).await;
                            continue;
                        }

                        tracing::warn!(step = %step_name, attempt, error = %error, "compensation gave up");
                        instance.mark_unwound(&step_name);
                        self.persist(instance, version).await?;
                        break;
                    }
                }
            }
        }

        instance.finish_unwind();
        self.persist(instance, version).await
    }

    fn retry_policy<'a>(&'a self, step: &'a StepDefinition) -> &'a RetryPolicy {
        step.retry.as_ref().unwrap_or(&self.config.default_retry)
    }

    fn step_timeout(&self, step: &StepDefinition) -> Duration {
        step.timeout.unwrap_or(self.config.default_step_timeout)
    }

    async fn persist(&self, instance: &SagaInstance, version: &mut Version) -> Result<()> {
        let record = instance.to_record()?;
        *version = self.store.update(record, *version).await?;
        Ok(())
    }

    fn record_outcome(&self, instance: &SagaInstance) {
        let finished = instance.finished_at().unwrap_or_else(Utc::now);
        let elapsed = (finished - instance.started_at()).to_std().unwrap_or_default();
        self.monitoring.record_duration("saga", elapsed);
        let duration = elapsed.as_secs_f64();

        match instance.status() {
            SagaStatus::Succeeded => {
                self.monitoring.increment_counter("saga_succeeded");
                tracing::info!(duration, "saga succeeded");
            }
            SagaStatus::Failed => {
                self.monitoring.increment_counter("saga_failed");
                tracing::info!(duration, reason = instance.failure_reason().unwrap_or_default(), "saga failed");
            }
            SagaStatus::CompensationFailed => {
                self.monitoring.increment_counter("saga_compensation_failed");
                tracing::warn!(
                    duration,
                    reason = instance.failure_reason().unwrap_or_default(),
                    "saga compensation failed; manual intervention required"
                );
            }
            SagaStatus::Running | SagaStatus::Compensating => {}
        }
    }
}

/// Invokes an action on a detached task bounded by `bound`.
///
/// A timed-out call is not cancelled: it runs to completion in the
/// background and its result is dropped.
async fn invoke(
    invoker: Arc<dyn StepInvoker>,
    context: SagaContext,
    bound: Duration,
) -> Invocation {
    let handle = tokio::spawn(async move { invoker.invoke(context).await });
    match tokio::time::timeout(bound, handle).await {
        Ok(Ok(result)) => Invocation::Completed(result),
        Ok(Err(join_error)) => Invocation::Completed(Err(StepError::permanent(format!(
            "invoker panicked: {join_error}"
        )))),
        Err(_) => Invocation::TimedOut,
    }
}
