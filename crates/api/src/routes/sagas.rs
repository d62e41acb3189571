//! Saga submission, status and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{IdempotencyKey, InstanceId};
use domain::Money;
use instance_store::InstanceStore;
use saga::definitions::{CREDIT_DECISION, DUAL_WRITE, RECONCILIATION, keys};
use saga::{SagaContext, SagaInstance, SagaStatus, StepError, StepResult};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct CreditDecisionRequest {
    pub idempotency_key: String,
    pub customer_id: String,
    pub requested_limit_cents: i64,
}

#[derive(Deserialize)]
pub struct TransactionRequest {
    pub idempotency_key: String,
    pub transaction_id: String,
    pub customer_id: String,
    pub amount_cents: i64,
}

#[derive(Deserialize)]
pub struct ReconciliationRequest {
    pub idempotency_key: String,
    /// Restricts the run to one customer's transactions.
    pub customer_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SubmissionResponse {
    pub instance_id: String,
    pub definition: String,
    pub status: SagaStatus,
}

#[derive(Serialize)]
pub struct SagaStatusResponse {
    pub instance_id: String,
    pub definition: String,
    pub idempotency_key: String,
    pub status: SagaStatus,
    pub current_step: Option<String>,
    pub context: SagaContext,
    pub completed_steps: Vec<StepResult>,
    pub compensations: Vec<StepResult>,
    pub failure_reason: Option<String>,
    pub last_error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&SagaInstance> for SagaStatusResponse {
    fn from(instance: &SagaInstance) -> Self {
        Self {
            instance_id: instance.instance_id().to_string(),
            definition: instance.definition_name().to_string(),
            idempotency_key: instance.idempotency_key().to_string(),
            status: instance.status(),
            current_step: instance.current_step().map(String::from),
            context: instance.context().clone(),
            completed_steps: instance.completed_steps().to_vec(),
            compensations: instance.compensations().to_vec(),
            failure_reason: instance.failure_reason().map(String::from),
            last_error: instance.last_error().cloned(),
            started_at: instance.started_at(),
            deadline: instance.deadline(),
            finished_at: instance.finished_at(),
        }
    }
}

// -- Handlers --

/// POST /credit-decisions: start a credit-decision saga.
#[tracing::instrument(skip(state, payload))]
pub async fn submit_credit_decision<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreditDecisionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let Json(req) = payload?;
    require("idempotency_key", &req.idempotency_key)?;
    require("customer_id", &req.customer_id)?;
    if req.requested_limit_cents < 0 {
        return Err(ApiError::BadRequest(
            "requested_limit_cents must not be negative".to_string(),
        ));
    }

    let context = SagaContext::new()
        .with(keys::CUSTOMER_ID, req.customer_id)
        .with(
            keys::REQUESTED_LIMIT,
            Money::from_cents(req.requested_limit_cents),
        );
    submit(&state, CREDIT_DECISION, context, req.idempotency_key).await
}

/// POST /transactions: start a ledger / wide-column dual write.
#[tracing::instrument(skip(state, payload))]
pub async fn submit_transaction<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let Json(req) = payload?;
    require("idempotency_key", &req.idempotency_key)?;
    require("transaction_id", &req.transaction_id)?;
    require("customer_id", &req.customer_id)?;

    let context = SagaContext::new()
        .with(keys::TRANSACTION_ID, req.transaction_id)
        .with(keys::CUSTOMER_ID, req.customer_id)
        .with(keys::AMOUNT, Money::from_cents(req.amount_cents));
    submit(&state, DUAL_WRITE, context, req.idempotency_key).await
}

/// POST /reconciliations: start a data-reconciliation run.
#[tracing::instrument(skip(state, payload))]
pub async fn submit_reconciliation<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<ReconciliationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let Json(req) = payload?;
    require("idempotency_key", &req.idempotency_key)?;

    let mut context = SagaContext::new();
    if let Some(customer_id) = req.customer_id.filter(|c| !c.is_empty()) {
        context.insert(keys::CUSTOMER_ID, customer_id);
    }
    submit(&state, RECONCILIATION, context, req.idempotency_key).await
}

/// GET /sagas/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaStatusResponse>, ApiError> {
    let instance_id = parse_instance_id(&id)?;
    let instance = state.executor.get_status(instance_id).await?;
    Ok(Json(SagaStatusResponse::from(&instance)))
}

/// POST /sagas/{id}/cancel: request cancellation of a running instance.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let instance_id = parse_instance_id(&id)?;
    let instance = state.executor.cancel(instance_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmissionResponse {
            instance_id: id,
            definition: instance.definition_name().to_string(),
            status: instance.status(),
        }),
    ))
}

/// Admits the request and drives a newly created instance in the
/// background. An idempotent replay answers 200 with the existing instance.
async fn submit<S: InstanceStore + 'static>(
    state: &AppState<S>,
    definition: &str,
    context: SagaContext,
    idempotency_key: String,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let admission = state
        .executor
        .admit(definition, context, IdempotencyKey::new(idempotency_key))
        .await?;
    let instance_id = admission.instance.instance_id();

    let status = if admission.created {
        let executor = Arc::clone(&state.executor);
        tokio::spawn(async move {
            if let Err(err) = executor.run(instance_id).await {
                tracing::warn!(%instance_id, error = %err, "saga run failed");
            }
        });
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(SubmissionResponse {
            instance_id: instance_id.to_string(),
            definition: definition.to_string(),
            status: admission.instance.status(),
        }),
    ))
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

fn parse_instance_id(id: &str) -> Result<InstanceId, ApiError> {
    InstanceId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
