//! In-memory data store for tests and local runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DataReader, DataStorage, DataWriter, Record, Result, StorageError, StorageMetrics};

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Query,
    Write,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct Failures {
    queued: HashMap<Operation, VecDeque<StorageError>>,
    always: HashMap<Operation, StorageError>,
}

impl Failures {
    fn take(&mut self, op: Operation) -> Option<StorageError> {
        if let Some(err) = self.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(err);
        }
        self.always.get(&op).cloned()
    }
}

#[derive(Debug)]
struct InMemoryState<R> {
    items: BTreeMap<String, R>,
    failures: Failures,
    metrics: StorageMetrics,
}

impl<R> Default for InMemoryState<R> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            failures: Failures::default(),
            metrics: StorageMetrics::default(),
        }
    }
}

/// In-memory data store keyed by [`Record::record_id`].
///
/// Failures can be injected per operation to exercise retry and
/// compensation paths.
#[derive(Debug)]
pub struct InMemoryDataStore<R> {
    state: Arc<RwLock<InMemoryState<R>>>,
}

impl<R> Clone for InMemoryDataStore<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R> Default for InMemoryDataStore<R> {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryState::default())),
        }
    }
}

impl<R: Record> InMemoryDataStore<R> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with the given items.
    pub async fn with_items(items: impl IntoIterator<Item = R>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for item in items {
                state.items.insert(item.record_id().to_string(), item);
            }
        }
        store
    }

    /// Makes the next `times` calls of `op` fail with `error`.
    pub async fn fail_next(&self, op: Operation, error: StorageError, times: usize) {
        let mut state = self.state.write().await;
        let queue = state.failures.queued.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Makes every call of `op` fail with `error` until cleared.
    pub async fn fail_always(&self, op: Operation, error: StorageError) {
        self.state.write().await.failures.always.insert(op, error);
    }

    /// Removes all injected failures.
    pub async fn clear_failures(&self) {
        self.state.write().await.failures = Failures::default();
    }

    /// Returns the number of stored items.
    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    /// Returns true if no items are stored.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    /// Returns true if an item exists with the given key.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.read().await.items.contains_key(id)
    }
}

#[async_trait]
impl<R: Record> DataReader<R> for InMemoryDataStore<R> {
    async fn read_item(&self, id: &str) -> Result<Option<R>> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.take(Operation::Read) {
            return Err(err);
        }
        state.metrics.reads += 1;
        Ok(state.items.get(id).cloned())
    }

    async fn query(&self, filter: &R::Filter) -> Result<Vec<R>> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.take(Operation::Query) {
            return Err(err);
        }
        state.metrics.reads += 1;
        Ok(state
            .items
            .values()
            .filter(|item| item.matches(filter))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl<R: Record> DataWriter<R> for InMemoryDataStore<R> {
    async fn write_item(&self, item: R) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.take(Operation::Write) {
            return Err(err);
        }
        let id = item.record_id().to_string();
        if state.items.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id));
        }
        state.items.insert(id, item);
        state.metrics.writes += 1;
        Ok(())
    }

    async fn update_item(&self, id: &str, patch: R::Patch) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.take(Operation::Update) {
            return Err(err);
        }
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        item.apply_patch(patch);
        state.metrics.writes += 1;
        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(err) = state.failures.take(Operation::Delete) {
            return Err(err);
        }
        state
            .items
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        state.metrics.deletes += 1;
        Ok(())
    }
}

#[async_trait]
impl<R: Record> DataStorage<R> for InMemoryDataStore<R> {
    async fn metrics(&self) -> Result<StorageMetrics> {
        let state = self.state.read().await;
        Ok(StorageMetrics {
            item_count: state.items.len(),
            ..state.metrics
        })
    }
}
