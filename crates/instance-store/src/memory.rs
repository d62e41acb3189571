use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    IdempotencyKey, InstanceId, InstanceQuery, InstanceRecord, InstanceStoreError, KeyClaim,
    Result, Version, store::InstanceStore,
};

#[derive(Default)]
struct State {
    records: HashMap<InstanceId, InstanceRecord>,
    keys: HashMap<IdempotencyKey, InstanceId>,
    cancellations: HashSet<InstanceId>,
}

/// In-memory instance store implementation for testing.
///
/// Provides the same guarantees as the PostgreSQL implementation:
/// atomic key claims and version-checked updates.
#[derive(Clone, Default)]
pub struct InMemoryInstanceStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryInstanceStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored records.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create(&self, mut record: InstanceRecord, claim: KeyClaim) -> Result<Version> {
        let mut state = self.state.write().await;

        if state.records.contains_key(&record.instance_id) {
            return Err(InstanceStoreError::AlreadyExists(record.instance_id));
        }

        let current = state.keys.get(&record.idempotency_key).copied();
        let claim_holds = match claim {
            KeyClaim::New => current.is_none(),
            KeyClaim::Supersede(previous) => current == Some(previous),
        };
        if !claim_holds {
            return Err(InstanceStoreError::IdempotencyConflict {
                key: record.idempotency_key,
            });
        }

        record.version = Version::first();
        state
            .keys
            .insert(record.idempotency_key.clone(), record.instance_id);
        state.records.insert(record.instance_id, record);

        Ok(Version::first())
    }

    async fn update(&self, mut record: InstanceRecord, expected: Version) -> Result<Version> {
        let mut state = self.state.write().await;
        let instance_id = record.instance_id;

        let current = state
            .records
            .get_mut(&instance_id)
            .ok_or(InstanceStoreError::NotFound(instance_id))?;

        if current.version != expected {
            return Err(InstanceStoreError::ConcurrencyConflict {
                instance_id,
                expected,
                actual: current.version,
            });
        }

        let next = expected.next();
        record.version = next;
        record.created_at = current.created_at;
        record.updated_at = Utc::now();
        *current = record;

        Ok(next)
    }

    async fn get(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>> {
        Ok(self.state.read().await.records.get(&instance_id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<InstanceRecord>> {
        let state = self.state.read().await;
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.records.get(id))
            .cloned())
    }

    async fn query(&self, query: InstanceQuery) -> Result<Vec<InstanceRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.instance_id.as_uuid().cmp(&b.instance_id.as_uuid()))
        });

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }

        Ok(records)
    }

    async fn request_cancellation(&self, instance_id: InstanceId) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(&instance_id) {
            return Err(InstanceStoreError::NotFound(instance_id));
        }
        state.cancellations.insert(instance_id);
        Ok(())
    }

    async fn is_cancellation_requested(&self, instance_id: InstanceId) -> Result<bool> {
        Ok(self.state.read().await.cancellations.contains(&instance_id))
    }
}
