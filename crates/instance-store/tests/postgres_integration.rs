//! PostgreSQL integration tests
//!
//! These tests start a shared PostgreSQL container and are ignored by
//! default. Run with:
//!
//! ```bash
//! cargo test -p instance-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use instance_store::{
    IdempotencyKey, InstanceId, InstanceQuery, InstanceRecord, InstanceStore, InstanceStoreError,
    InstanceStoreExt, KeyClaim, PostgresInstanceStore, Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_instances_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresInstanceStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE idempotency_keys, saga_instances")
        .execute(&pool)
        .await
        .unwrap();

    PostgresInstanceStore::new(pool)
}

fn record(key: &str) -> InstanceRecord {
    InstanceRecord::from_payload(
        InstanceId::new(),
        "ledger-wide-column-dual-write",
        IdempotencyKey::new(key),
        "Running",
        false,
        &serde_json::json!({"cursor": 0}),
    )
    .unwrap()
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_create_and_get() {
    let store = get_test_store().await;
    let r = record("create-get");
    let id = r.instance_id;

    let version = store.create(r, KeyClaim::New).await.unwrap();
    assert_eq!(version, Version::first());

    let loaded = store.get(id).await.unwrap().unwrap();
    assert_eq!(loaded.definition_name, "ledger-wide-column-dual-write");
    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.payload["cursor"], 0);

    let by_key = store
        .find_by_idempotency_key(&IdempotencyKey::new("create-get"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.instance_id, id);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_duplicate_key_is_rejected_atomically() {
    let store = get_test_store().await;
    store.create(record("dup"), KeyClaim::New).await.unwrap();

    let loser = record("dup");
    let loser_id = loser.instance_id;
    let result = store.create(loser, KeyClaim::New).await;
    assert!(matches!(
        result,
        Err(InstanceStoreError::IdempotencyConflict { .. })
    ));

    // The losing insert was rolled back with the key claim.
    assert!(store.get(loser_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_supersede_moves_key() {
    let store = get_test_store().await;
    let first = record("retry");
    let first_id = first.instance_id;
    store.create(first, KeyClaim::New).await.unwrap();

    let second = record("retry");
    let second_id = second.instance_id;
    store
        .create(second, KeyClaim::Supersede(first_id))
        .await
        .unwrap();

    let current = store
        .find_by_idempotency_key(&IdempotencyKey::new("retry"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.instance_id, second_id);
    assert!(store.exists(first_id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_conditional_update() {
    let store = get_test_store().await;
    let r = record("cas");
    let id = r.instance_id;
    store.create(r, KeyClaim::New).await.unwrap();

    let mut loaded = store.get(id).await.unwrap().unwrap();
    loaded.status = "Succeeded".to_string();
    loaded.terminal = true;

    let v2 = store.update(loaded.clone(), Version::first()).await.unwrap();
    assert_eq!(v2, Version::new(2));

    let stale = store.update(loaded, Version::first()).await;
    assert!(matches!(
        stale,
        Err(InstanceStoreError::ConcurrencyConflict { actual, .. }) if actual == Version::new(2)
    ));

    let missing = store.update(record("none"), Version::first()).await;
    assert!(matches!(missing, Err(InstanceStoreError::NotFound(_))));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_active_query_and_cancellation() {
    let store = get_test_store().await;
    let running = record("q1");
    let running_id = running.instance_id;
    let mut done = record("q2");
    done.terminal = true;
    store.create(running, KeyClaim::New).await.unwrap();
    store.create(done, KeyClaim::New).await.unwrap();

    let active = store.active_instances().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].instance_id, running_id);

    let other = store
        .query(InstanceQuery::new().definition("credit-decision"))
        .await
        .unwrap();
    assert!(other.is_empty());

    assert!(!store.is_cancellation_requested(running_id).await.unwrap());
    store.request_cancellation(running_id).await.unwrap();
    assert!(store.is_cancellation_requested(running_id).await.unwrap());
    assert_eq!(
        store.get(running_id).await.unwrap().unwrap().version,
        Version::first()
    );
}
