//! Domain layer for the saga workflow engine.
//!
//! This crate provides:
//! - Credit data with the credit-worthiness policy and the approval use case
//! - Ledger and wide-column transaction records
//! - Data store, notification and monitoring seams with in-memory implementations

pub mod credit;
pub mod error;
pub mod monitoring;
pub mod notification;
pub mod storage;
pub mod transaction;
pub mod value_objects;

pub use credit::{
    CreditApprovalService, CreditData, CreditDecision, CreditError, CreditFilter, CreditRecord,
    CreditRecordPatch, CreditSummary, RiskBand,
};
pub use error::DomainError;
pub use monitoring::{MetricsMonitoring, Monitoring, NoopMonitoring, RecordingMonitoring, TimerHandle};
pub use notification::{InMemoryNotifier, Notification, NotificationError, Notifier};
pub use storage::{
    DataReader, DataStorage, DataWriter, InMemoryDataStore, Operation, Record, StorageError,
    StorageMetrics,
};
pub use transaction::{CreditLimitRow, LedgerEntry, TransactionFilter};
pub use value_objects::{CustomerId, Money, TransactionId};
