//! Background worker that resumes instances nobody is driving.

use std::sync::Arc;
use std::time::Duration;

use instance_store::InstanceStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::executor::SagaExecutor;

/// Periodically sweeps the instance store and drives every active instance
/// that this process is not already driving.
///
/// This is what moves instances left behind by a crash, and instances whose
/// saga timeout elapsed while nothing was running them, to a terminal status.
pub struct SagaWorker<S: InstanceStore + 'static> {
    executor: Arc<SagaExecutor<S>>,
    interval: Duration,
}

impl<S: InstanceStore + 'static> SagaWorker<S> {
    pub fn new(executor: Arc<SagaExecutor<S>>, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// Spawns a run for every active instance not already in flight.
    /// Returns how many were spawned.
    pub async fn sweep(&self) -> Result<usize> {
        let mut resumed = 0;
        for instance_id in self.executor.active_instances().await? {
            if self.executor.is_in_flight(instance_id) {
                continue;
            }
            let executor = Arc::clone(&self.executor);
            tokio::spawn(async move {
                match executor.run(instance_id).await {
                    Ok(instance) => {
                        tracing::debug!(%instance_id, status = %instance.status(), "instance resumed");
                    }
                    // Another executor advanced the instance first.
                    Err(err) if err.is_concurrency_conflict() => {
                        tracing::debug!(%instance_id, error = %err, "instance owned elsewhere");
                    }
                    Err(err) => {
                        tracing::warn!(%instance_id, error = %err, "failed to resume instance");
                    }
                }
            });
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Sweeps on every tick until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(interval = ?self.interval, "saga worker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => {}
                        Ok(resumed) => tracing::info!(resumed, "resumed active instances"),
                        Err(err) => tracing::warn!(error = %err, "instance sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("saga worker stopped");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use common::IdempotencyKey;
    use instance_store::InMemoryInstanceStore;

    use super::*;
    use crate::context::SagaContext;
    use crate::definition::{SagaDefinition, StepDefinition};
    use crate::error::StepError;
    use crate::executor::REASON_TIMED_OUT;
    use crate::instance::SagaInstance;
    use crate::invoker::{ActionRegistry, StepInvoker};
    use crate::registry::DefinitionRegistry;
    use crate::state::SagaStatus;

    struct Echo;

    #[async_trait]
    impl StepInvoker for Echo {
        async fn invoke(&self, _context: SagaContext) -> std::result::Result<SagaContext, StepError> {
            Ok(SagaContext::new().with("echoed", true))
        }
    }

    fn executor(timeout: Duration) -> Arc<SagaExecutor<InMemoryInstanceStore>> {
        let mut actions = ActionRegistry::new();
        actions.register("echo", Arc::new(Echo));
        let mut definitions = DefinitionRegistry::new();
        definitions
            .register(
                SagaDefinition::builder("echo")
                    .step(StepDefinition::new("first", "echo"))
                    .step(StepDefinition::new("second", "echo"))
                    .timeout(timeout)
                    .build(),
                &actions,
            )
            .unwrap();
        Arc::new(SagaExecutor::new(
            InMemoryInstanceStore::new(),
            definitions,
            actions,
        ))
    }

    async fn wait_terminal(
        executor: &SagaExecutor<InMemoryInstanceStore>,
        instance: &SagaInstance,
    ) -> SagaInstance {
        for _ in 0..200 {
            let current = executor.get_status(instance.instance_id()).await.unwrap();
            if current.status().is_terminal() {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("instance {} never finished", instance.instance_id());
    }

    #[tokio::test]
    async fn test_sweep_drives_admitted_instances() {
        let executor = executor(Duration::from_secs(60));
        let admitted = executor
            .admit("echo", SagaContext::new(), IdempotencyKey::new("k-1"))
            .await
            .unwrap()
            .instance;
        assert_eq!(admitted.status(), SagaStatus::Running);

        let worker = SagaWorker::new(Arc::clone(&executor), Duration::from_secs(1));
        assert_eq!(worker.sweep().await.unwrap(), 1);

        let finished = wait_terminal(&executor, &admitted).await;
        assert_eq!(finished.status(), SagaStatus::Succeeded);
        assert_eq!(finished.succeeded_step_names(), vec!["first", "second"]);
        assert_eq!(worker.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_fails_expired_instances() {
        let executor = executor(Duration::from_millis(1));
        let admitted = executor
            .admit("echo", SagaContext::new(), IdempotencyKey::new("k-1"))
            .await
            .unwrap()
            .instance;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let worker = SagaWorker::new(Arc::clone(&executor), Duration::from_secs(1));
        worker.sweep().await.unwrap();

        let finished = wait_terminal(&executor, &admitted).await;
        assert_eq!(finished.status(), SagaStatus::Failed);
        assert_eq!(finished.failure_reason(), Some(REASON_TIMED_OUT));
        assert!(finished.completed_steps().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let executor = executor(Duration::from_secs(60));
        let admitted = executor
            .admit("echo", SagaContext::new(), IdempotencyKey::new("k-1"))
            .await
            .unwrap()
            .instance;

        let (tx, rx) = watch::channel(false);
        let handle = SagaWorker::new(Arc::clone(&executor), Duration::from_millis(10)).spawn(rx);

        let finished = wait_terminal(&executor, &admitted).await;
        assert_eq!(finished.status(), SagaStatus::Succeeded);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
