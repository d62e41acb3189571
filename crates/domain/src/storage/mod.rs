//! Data store seams consumed by the saga step invokers.
//!
//! The relational ledger and the wide-column store are external systems.
//! Invokers only see them through the [`DataReader`] / [`DataWriter`]
//! traits, parameterised by a typed [`Record`].

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use memory::{InMemoryDataStore, Operation};

/// A typed row stored in a data store.
pub trait Record: Clone + Send + Sync + 'static {
    /// Partial update applied by [`DataWriter::update_item`].
    type Patch: Send + Sync + 'static;

    /// Predicate type accepted by [`DataReader::query`].
    type Filter: Send + Sync + 'static;

    /// Returns the primary key of the record.
    fn record_id(&self) -> &str;

    /// Applies a partial update in place.
    fn apply_patch(&mut self, patch: Self::Patch);

    /// Returns true if the record satisfies the filter.
    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// Errors reported by a data store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No item exists with the given key.
    #[error("Item not found: {0}")]
    NotFound(String),

    /// An item with the given key already exists.
    #[error("Item already exists: {0}")]
    AlreadyExists(String),

    /// The store could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request because of rate limits.
    #[error("Request throttled")]
    Throttled,

    /// The store rejected the request as invalid.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl StorageError {
    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Throttled)
    }
}

/// Convenience type alias for storage results.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Operational counters exposed by a data store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageMetrics {
    pub item_count: usize,
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// Read side of a data store.
#[async_trait]
pub trait DataReader<R: Record>: Send + Sync {
    /// Reads a single item by key. Returns `None` if it does not exist.
    async fn read_item(&self, id: &str) -> Result<Option<R>>;

    /// Returns every item matching the filter, ordered by key.
    async fn query(&self, filter: &R::Filter) -> Result<Vec<R>>;
}

/// Write side of a data store.
#[async_trait]
pub trait DataWriter<R: Record>: Send + Sync {
    /// Inserts a new item. Fails with `AlreadyExists` if the key is taken.
    async fn write_item(&self, item: R) -> Result<()>;

    /// Applies a patch to an existing item. Fails with `NotFound` if missing.
    async fn update_item(&self, id: &str, patch: R::Patch) -> Result<()>;

    /// Deletes an item. Fails with `NotFound` if missing.
    async fn delete_item(&self, id: &str) -> Result<()>;
}

/// A full data store: reads, writes and operational metrics.
#[async_trait]
pub trait DataStorage<R: Record>: DataReader<R> + DataWriter<R> {
    /// Returns the current operational counters.
    async fn metrics(&self) -> Result<StorageMetrics>;
}
