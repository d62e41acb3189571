//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{AppState, Collaborators};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{DataReader, NoopMonitoring};
use instance_store::InMemoryInstanceStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::ExecutorConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: axum::Router,
    state: Arc<AppState<InMemoryInstanceStore>>,
    collaborators: Collaborators,
}

async fn setup() -> TestApp {
    let collaborators = Collaborators::in_memory();
    collaborators.seed_demo_data().await.unwrap();
    let state = api::create_state(
        InMemoryInstanceStore::new(),
        &collaborators,
        Arc::new(NoopMonitoring),
        ExecutorConfig::default(),
    )
    .unwrap();
    let app = api::create_app(state.clone(), get_metrics_handle());
    TestApp {
        app,
        state,
        collaborators,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Polls the status endpoint until the instance reaches a terminal status.
async fn wait_for_terminal(app: &axum::Router, instance_id: &str) -> Value {
    for _ in 0..200 {
        let (status, json) = send(app, get(&format!("/sagas/{instance_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if matches!(
            json["status"].as_str(),
            Some("Succeeded" | "Failed" | "CompensationFailed")
        ) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("saga {instance_id} did not finish");
}

#[tokio::test]
async fn test_health_check() {
    let t = setup().await;
    let (status, json) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let t = setup().await;
    let response = t.app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_definitions() {
    let t = setup().await;
    let (status, json) = send(&t.app, get("/definitions")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["definitions"],
        json!([
            "credit-decision",
            "data-reconciliation",
            "ledger-wide-column-dual-write"
        ])
    );
}

#[tokio::test]
async fn test_credit_decision_saga_approves() {
    let t = setup().await;
    let (status, json) = send(
        &t.app,
        post_json(
            "/credit-decisions",
            json!({
                "idempotency_key": "req-1",
                "customer_id": "cust-good",
                "requested_limit_cents": 1_000_000
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["definition"], "credit-decision");
    let instance_id = json["instance_id"].as_str().unwrap().to_string();

    let saga = wait_for_terminal(&t.app, &instance_id).await;
    assert_eq!(saga["status"], "Succeeded");
    assert_eq!(saga["idempotency_key"], "req-1");
    assert_eq!(saga["context"]["approved"]["value"], true);
    assert!(saga["failure_reason"].is_null());
    assert_eq!(t.collaborators.notifier.sent().await.len(), 1);
}

#[tokio::test]
async fn test_credit_decision_saga_denies_poor_credit() {
    let t = setup().await;
    let (status, json) = send(
        &t.app,
        post_json(
            "/credit-decisions",
            json!({
                "idempotency_key": "req-poor",
                "customer_id": "cust-poor",
                "requested_limit_cents": 500_000
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let saga = wait_for_terminal(&t.app, json["instance_id"].as_str().unwrap()).await;
    assert_eq!(saga["status"], "Succeeded");
    assert_eq!(saga["context"]["approved"]["value"], false);
}

#[tokio::test]
async fn test_resubmission_returns_existing_instance() {
    let t = setup().await;
    let body = json!({
        "idempotency_key": "same-key",
        "customer_id": "cust-good",
        "requested_limit_cents": 100_000
    });

    let (first_status, first) = send(&t.app, post_json("/credit-decisions", body.clone())).await;
    assert_eq!(first_status, StatusCode::ACCEPTED);
    let instance_id = first["instance_id"].as_str().unwrap().to_string();
    wait_for_terminal(&t.app, &instance_id).await;

    let (second_status, second) = send(&t.app, post_json("/credit-decisions", body)).await;
    assert_eq!(second_status, StatusCode::OK);
    assert_eq!(second["instance_id"], instance_id.as_str());
    assert_eq!(second["status"], "Succeeded");
}

#[tokio::test]
async fn test_transaction_dual_write() {
    let t = setup().await;
    let (status, json) = send(
        &t.app,
        post_json(
            "/transactions",
            json!({
                "idempotency_key": "tx-key-1",
                "transaction_id": "tx-1",
                "customer_id": "cust-good",
                "amount_cents": 12_500
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let saga = wait_for_terminal(&t.app, json["instance_id"].as_str().unwrap()).await;
    assert_eq!(saga["status"], "Succeeded");
    assert_eq!(saga["completed_steps"].as_array().unwrap().len(), 2);
    assert!(t.collaborators.ledger.read_item("tx-1").await.unwrap().is_some());
    assert!(
        t.collaborators
            .wide_column
            .read_item("tx-1")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_reconciliation_with_nothing_to_repair() {
    let t = setup().await;
    let (status, json) = send(
        &t.app,
        post_json(
            "/reconciliations",
            json!({ "idempotency_key": "recon-1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let saga = wait_for_terminal(&t.app, json["instance_id"].as_str().unwrap()).await;
    assert_eq!(saga["status"], "Succeeded");
    assert_eq!(saga["context"]["inconsistencies_found"]["value"], false);
}

#[tokio::test]
async fn test_cancel_finished_saga_conflicts() {
    let t = setup().await;
    let (_, json) = send(
        &t.app,
        post_json(
            "/credit-decisions",
            json!({
                "idempotency_key": "cancel-late",
                "customer_id": "cust-good",
                "requested_limit_cents": 100_000
            }),
        ),
    )
    .await;
    let instance_id = json["instance_id"].as_str().unwrap().to_string();
    wait_for_terminal(&t.app, &instance_id).await;

    let (status, json) = send(
        &t.app,
        post_json(&format!("/sagas/{instance_id}/cancel"), Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_get_nonexistent_saga() {
    let t = setup().await;
    let id = common::InstanceId::new();
    let (status, _) = send(&t.app, get(&format!("/sagas/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_saga_id_format() {
    let t = setup().await;
    let (status, _) = send(&t.app, get("/sagas/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submission_validation() {
    let t = setup().await;

    let (status, _) = send(
        &t.app,
        post_json(
            "/credit-decisions",
            json!({
                "idempotency_key": "",
                "customer_id": "cust-good",
                "requested_limit_cents": 100
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        post_json(
            "/credit-decisions",
            json!({
                "idempotency_key": "neg",
                "customer_id": "cust-good",
                "requested_limit_cents": -1
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        post_json("/transactions", json!({ "idempotency_key": "x" })),
    )
    .await;
    assert!(status.is_client_error());

    assert!(t.state.executor.active_instances().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_credit_approval() {
    let t = setup().await;

    let (status, json) = send(
        &t.app,
        post_json(
            "/credit-approvals",
            json!({ "customer_id": "cust-excellent", "requested_limit_cents": 2_000_000 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["approved"], true);

    let (status, json) = send(
        &t.app,
        post_json(
            "/credit-approvals",
            json!({ "customer_id": "nobody", "requested_limit_cents": 1_000 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["approved"], false);
}
