//! Health, metrics and discovery endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use instance_store::InstanceStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct DefinitionsResponse {
    pub definitions: Vec<String>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// GET /metrics: Prometheus text exposition.
pub async fn metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

/// GET /definitions: names of the registered saga definitions.
pub async fn definitions<S: InstanceStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<DefinitionsResponse> {
    let definitions = state
        .executor
        .definitions()
        .names()
        .into_iter()
        .map(String::from)
        .collect();
    Json(DefinitionsResponse { definitions })
}
