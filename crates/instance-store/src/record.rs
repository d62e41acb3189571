use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{IdempotencyKey, InstanceId, Version};

/// Persisted form of one saga instance.
///
/// The full instance lives in `payload` as JSON. The other fields are
/// copies the store indexes for lookups, sweeps and concurrency checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub definition_name: String,
    pub idempotency_key: IdempotencyKey,
    pub status: String,
    /// True once the instance can no longer change.
    pub terminal: bool,
    /// Assigned by the store on every successful write.
    pub version: Version,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Creates a not-yet-persisted record from a serializable payload.
    pub fn from_payload<T: Serialize>(
        instance_id: InstanceId,
        definition_name: impl Into<String>,
        idempotency_key: IdempotencyKey,
        status: impl Into<String>,
        terminal: bool,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let now = Utc::now();
        Ok(Self {
            instance_id,
            definition_name: definition_name.into(),
            idempotency_key,
            status: status.into(),
            terminal,
            version: Version::initial(),
            payload: serde_json::to_value(payload)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Deserializes the payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// How a new record relates to its idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClaim {
    /// The key must not be claimed yet.
    New,
    /// The key must currently point at this instance; it is moved to the
    /// new record.
    Supersede(InstanceId),
}

/// Filter for listing instance records.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    /// Only records of this definition.
    pub definition_name: Option<String>,

    /// Only records that are not terminal.
    pub active_only: bool,

    /// Maximum number of records to return.
    pub limit: Option<usize>,
}

impl InstanceQuery {
    /// Creates a query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query matching non-terminal records.
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Default::default()
        }
    }

    /// Restricts the query to a definition.
    pub fn definition(mut self, name: impl Into<String>) -> Self {
        self.definition_name = Some(name.into());
        self
    }

    /// Caps the number of returned records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if the record satisfies the filter (ignores `limit`).
    pub fn matches(&self, record: &InstanceRecord) -> bool {
        if self.active_only && record.terminal {
            return false;
        }
        if let Some(ref name) = self.definition_name
            && &record.definition_name != name
        {
            return false;
        }
        true
    }
}
