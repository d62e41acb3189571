//! HTTP API server for the saga workflow engine.
//!
//! Provides REST endpoints to submit sagas, query and cancel instances,
//! and approve credit limits directly, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chrono::Utc;
use domain::{
    CreditApprovalService, CreditLimitRow, CreditRecord, CustomerId, DataWriter, InMemoryDataStore,
    InMemoryNotifier, LedgerEntry, Money, Monitoring, StorageError,
};
use instance_store::InstanceStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    BuiltinServices, DefinitionError, ExecutorConfig, SagaExecutor, builtin_actions,
    builtin_definitions,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
pub struct AppState<S: InstanceStore + 'static> {
    pub executor: Arc<SagaExecutor<S>>,
    pub approvals: CreditApprovalService<InMemoryDataStore<CreditRecord>>,
}

/// Data stores and notifier the built-in step invokers talk to.
#[derive(Debug, Clone, Default)]
pub struct Collaborators {
    pub credit: InMemoryDataStore<CreditRecord>,
    pub ledger: InMemoryDataStore<LedgerEntry>,
    pub wide_column: InMemoryDataStore<CreditLimitRow>,
    pub notifier: InMemoryNotifier,
}

impl Collaborators {
    /// Empty in-memory collaborators.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads a handful of customers covering each credit outcome.
    pub async fn seed_demo_data(&self) -> Result<(), StorageError> {
        let customers = [
            ("cust-excellent", 780, 9_000, 1_500),
            ("cust-good", 700, 5_000, 1_000),
            ("cust-fair", 640, 4_000, 1_400),
            ("cust-poor", 480, 3_000, 1_800),
        ];
        for (id, score, income, debts) in customers {
            self.credit
                .write_item(CreditRecord {
                    customer_id: CustomerId::new(id),
                    credit_score: score,
                    monthly_income: Money::from_dollars(income),
                    existing_debts: Money::from_dollars(debts),
                    created_at: Utc::now(),
                })
                .await?;
        }
        tracing::info!(customers = customers.len(), "seeded demo credit data");
        Ok(())
    }
}

/// Wires the built-in definitions and invokers over `store`.
pub fn create_state<S: InstanceStore + 'static>(
    store: S,
    collaborators: &Collaborators,
    monitoring: Arc<dyn Monitoring>,
    executor_config: ExecutorConfig,
) -> Result<Arc<AppState<S>>, DefinitionError> {
    let actions = builtin_actions(&BuiltinServices {
        credit: Arc::new(collaborators.credit.clone()),
        ledger: Arc::new(collaborators.ledger.clone()),
        wide_column: Arc::new(collaborators.wide_column.clone()),
        notifier: Arc::new(collaborators.notifier.clone()),
    });
    let definitions = builtin_definitions(&actions)?;
    let executor = SagaExecutor::new(store, definitions, actions)
        .with_monitoring(Arc::clone(&monitoring))
        .with_config(executor_config);

    Ok(Arc::new(AppState {
        executor: Arc::new(executor),
        approvals: CreditApprovalService::new(collaborators.credit.clone(), monitoring),
    }))
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: InstanceStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/definitions", get(routes::system::definitions::<S>))
        .route(
            "/credit-decisions",
            post(routes::sagas::submit_credit_decision::<S>),
        )
        .route("/transactions", post(routes::sagas::submit_transaction::<S>))
        .route(
            "/reconciliations",
            post(routes::sagas::submit_reconciliation::<S>),
        )
        .route("/sagas/{id}", get(routes::sagas::get::<S>))
        .route("/sagas/{id}/cancel", post(routes::sagas::cancel::<S>))
        .route("/credit-approvals", post(routes::credit::approve::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
