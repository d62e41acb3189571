//! Synchronous credit limit approval.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use domain::{CreditDecision, CustomerId, Money};
use instance_store::InstanceStore;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreditApprovalRequest {
    pub customer_id: String,
    pub requested_limit_cents: i64,
}

/// POST /credit-approvals: decide on a limit without running a saga.
///
/// An unknown customer is a denial, not a 404.
#[tracing::instrument(skip(state, payload))]
pub async fn approve<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreditApprovalRequest>, JsonRejection>,
) -> Result<Json<CreditDecision>, ApiError> {
    let Json(req) = payload?;
    if req.customer_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "customer_id must not be empty".to_string(),
        ));
    }
    if req.requested_limit_cents < 0 {
        return Err(ApiError::BadRequest(
            "requested_limit_cents must not be negative".to_string(),
        ));
    }

    let decision = state
        .approvals
        .approve_credit_limit(
            &CustomerId::new(req.customer_id),
            Money::from_cents(req.requested_limit_cents),
        )
        .await?;
    Ok(Json(decision))
}
