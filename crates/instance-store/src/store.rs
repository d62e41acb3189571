use std::sync::Arc;

use async_trait::async_trait;

use crate::{IdempotencyKey, InstanceId, InstanceQuery, InstanceRecord, KeyClaim, Result, Version};

/// Durable persistence for saga instance records.
///
/// All implementations must be thread-safe (Send + Sync). Writes are
/// guarded by optimistic concurrency: a record can only be replaced by a
/// writer that read its current version.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Persists a new record and claims its idempotency key.
    ///
    /// The key claim and the insert are atomic. Fails with
    /// `IdempotencyConflict` if the key is not in the state described by
    /// `claim`, and with `AlreadyExists` if the ID is taken.
    ///
    /// Returns the version of the stored record.
    async fn create(&self, record: InstanceRecord, claim: KeyClaim) -> Result<Version>;

    /// Replaces a record if it is still at `expected`.
    ///
    /// Fails with `ConcurrencyConflict` if another writer got there first
    /// and with `NotFound` if the record does not exist.
    ///
    /// Returns the new version.
    async fn update(&self, record: InstanceRecord, expected: Version) -> Result<Version>;

    /// Loads a record by ID.
    async fn get(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>>;

    /// Loads the record currently answering for an idempotency key.
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey)
    -> Result<Option<InstanceRecord>>;

    /// Lists records matching a query, oldest first.
    async fn query(&self, query: InstanceQuery) -> Result<Vec<InstanceRecord>>;

    /// Flags a record for cancellation.
    ///
    /// The flag lives outside the versioned record so it never conflicts
    /// with an executor's conditional update.
    async fn request_cancellation(&self, instance_id: InstanceId) -> Result<()>;

    /// Returns true if cancellation has been requested for the record.
    async fn is_cancellation_requested(&self, instance_id: InstanceId) -> Result<bool>;
}

#[async_trait]
impl<T: InstanceStore + ?Sized> InstanceStore for Arc<T> {
    async fn create(&self, record: InstanceRecord, claim: KeyClaim) -> Result<Version> {
        (**self).create(record, claim).await
    }

    async fn update(&self, record: InstanceRecord, expected: Version) -> Result<Version> {
        (**self).update(record, expected).await
    }

    async fn get(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>> {
        (**self).get(instance_id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<InstanceRecord>> {
        (**self).find_by_idempotency_key(key).await
    }

    async fn query(&self, query: InstanceQuery) -> Result<Vec<InstanceRecord>> {
        (**self).query(query).await
    }

    async fn request_cancellation(&self, instance_id: InstanceId) -> Result<()> {
        (**self).request_cancellation(instance_id).await
    }

    async fn is_cancellation_requested(&self, instance_id: InstanceId) -> Result<bool> {
        (**self).is_cancellation_requested(instance_id).await
    }
}

/// Extension trait providing convenience methods for instance stores.
#[async_trait]
pub trait InstanceStoreExt: InstanceStore {
    /// Lists every non-terminal record.
    async fn active_instances(&self) -> Result<Vec<InstanceRecord>> {
        self.query(InstanceQuery::active()).await
    }

    /// Checks if a record exists.
    async fn exists(&self, instance_id: InstanceId) -> Result<bool> {
        Ok(self.get(instance_id).await?.is_some())
    }
}

// Blanket implementation for all InstanceStore implementations
impl<T: InstanceStore + ?Sized> InstanceStoreExt for T {}
