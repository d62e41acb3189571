//! Durable saga instance persistence.
//!
//! Records are written with optimistic concurrency: every update names the
//! version it read, and a stale writer gets `ConcurrencyConflict` instead of
//! silently overwriting progress. Idempotency keys are claimed atomically
//! with the insert that uses them.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{IdempotencyKey, InstanceId, Version};
pub use error::{InstanceStoreError, Result};
pub use memory::InMemoryInstanceStore;
pub use postgres::PostgresInstanceStore;
pub use record::{InstanceQuery, InstanceRecord, KeyClaim};
pub use store::{InstanceStore, InstanceStoreExt};
