//! Invokers for the ledger / wide-column dual-write saga.
//!
//! Every record is stamped with the id of the instance that wrote it.
//! Forward writes are idempotent for their owner: finding the same record
//! already written by this instance counts as success, so a retried or
//! resumed step never fails on its own earlier write. A record owned by
//! anyone else is never adopted. Rollbacks delete only records this
//! instance owns, and a missing record counts as rolled back.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    CreditLimitRow, CustomerId, DataStorage, LedgerEntry, Record, StorageError, TransactionId,
};

use crate::context::SagaContext;
use crate::definitions::keys;
use crate::error::StepError;
use crate::invoker::StepInvoker;

/// Builds the ledger entry described by the saga context, owned by the
/// running instance.
fn ledger_entry(context: &SagaContext) -> Result<LedgerEntry, StepError> {
    Ok(LedgerEntry::new(
        TransactionId::new(context.get_text(keys::TRANSACTION_ID)?),
        CustomerId::new(context.get_text(keys::CUSTOMER_ID)?),
        context.get_money(keys::AMOUNT)?,
    )
    .owned_by(context.get_text(keys::INSTANCE_ID)?))
}

/// Deletes `id` if `owns` accepts the stored item. A missing item, or one
/// written by someone else, is left alone.
async fn delete_if_owned<R: Record>(
    store: &dyn DataStorage<R>,
    id: &str,
    owns: impl Fn(&R) -> bool,
) -> Result<bool, StorageError> {
    match store.read_item(id).await? {
        Some(item) if owns(&item) => {}
        Some(_) => {
            tracing::warn!(id, "record belongs to another saga; leaving it in place");
            return Ok(false);
        }
        None => return Ok(false),
    }
    match store.delete_item(id).await {
        Ok(()) => Ok(true),
        Err(StorageError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Records the transaction in the relational ledger.
pub struct WriteToLedger {
    ledger: Arc<dyn DataStorage<LedgerEntry>>,
}

impl WriteToLedger {
    pub fn new(ledger: Arc<dyn DataStorage<LedgerEntry>>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl StepInvoker for WriteToLedger {
    #[tracing::instrument(name = "write_to_ledger", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let entry = ledger_entry(&context)?;
        let id = entry.transaction_id.clone();

        match self.ledger.write_item(entry.clone()).await {
            Ok(()) => tracing::info!(transaction_id = %id, "ledger entry written"),
            Err(StorageError::AlreadyExists(_)) => {
                match self.ledger.read_item(id.as_str()).await? {
                    Some(existing)
                        if existing.same_transaction(&entry) && existing.owner == entry.owner =>
                    {
                        tracing::debug!(transaction_id = %id, "ledger entry already present");
                    }
                    Some(existing) if existing.owner != entry.owner => {
                        return Err(StepError::permanent(format!(
                            "transaction {id} is already recorded by another saga"
                        )));
                    }
                    Some(_) => {
                        return Err(StepError::permanent(format!(
                            "transaction {id} is already recorded with different data"
                        )));
                    }
                    None => {
                        return Err(StepError::transient(format!(
                            "ledger entry {id} disappeared during write"
                        )));
                    }
                }
            }
            Err(err) => return Err(err.into()),
        }

        Ok(SagaContext::new().with(keys::LEDGER_WRITTEN, true))
    }
}

/// Mirrors the transaction into the wide-column store.
pub struct WriteToWideColumnStore {
    store: Arc<dyn DataStorage<CreditLimitRow>>,
}

impl WriteToWideColumnStore {
    pub fn new(store: Arc<dyn DataStorage<CreditLimitRow>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepInvoker for WriteToWideColumnStore {
    #[tracing::instrument(name = "write_to_wide_column_store", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let entry = ledger_entry(&context)?;
        let row = CreditLimitRow::from_ledger(&entry);
        let id = entry.transaction_id.clone();

        match self.store.write_item(row.clone()).await {
            Ok(()) => tracing::info!(transaction_id = %id, "wide-column row written"),
            Err(StorageError::AlreadyExists(_)) => {
                match self.store.read_item(id.as_str()).await? {
                    Some(existing) if existing.mirrors(&entry) && existing.owner == row.owner => {
                        tracing::debug!(transaction_id = %id, "wide-column row already present");
                    }
                    Some(existing) if existing.owner != row.owner => {
                        return Err(StepError::permanent(format!(
                            "wide-column row {id} was written by another saga"
                        )));
                    }
                    Some(_) => {
                        return Err(StepError::permanent(format!(
                            "wide-column row {id} holds different data"
                        )));
                    }
                    None => {
                        return Err(StepError::transient(format!(
                            "wide-column row {id} disappeared during write"
                        )));
                    }
                }
            }
            Err(err) => return Err(err.into()),
        }

        Ok(SagaContext::new().with(keys::WIDE_COLUMN_WRITTEN, true))
    }
}

/// Removes the ledger entry written by [`WriteToLedger`] for this instance.
pub struct RollbackLedgerWrite {
    ledger: Arc<dyn DataStorage<LedgerEntry>>,
}

impl RollbackLedgerWrite {
    pub fn new(ledger: Arc<dyn DataStorage<LedgerEntry>>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl StepInvoker for RollbackLedgerWrite {
    #[tracing::instrument(name = "rollback_ledger_write", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let id = context.get_text(keys::TRANSACTION_ID)?;
        let owner = context.get_text(keys::INSTANCE_ID)?;
        let deleted =
            delete_if_owned(self.ledger.as_ref(), &id, |e| e.is_owned_by(&owner)).await?;
        tracing::info!(transaction_id = %id, deleted, "ledger write rolled back");
        Ok(SagaContext::new().with(keys::LEDGER_ROLLED_BACK, true))
    }
}

/// Removes the row written by [`WriteToWideColumnStore`] for this instance.
pub struct RollbackWideColumnWrite {
    store: Arc<dyn DataStorage<CreditLimitRow>>,
}

impl RollbackWideColumnWrite {
    pub fn new(store: Arc<dyn DataStorage<CreditLimitRow>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepInvoker for RollbackWideColumnWrite {
    #[tracing::instrument(name = "rollback_wide_column_write", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let id = context.get_text(keys::TRANSACTION_ID)?;
        let owner = context.get_text(keys::INSTANCE_ID)?;
        let deleted =
            delete_if_owned(self.store.as_ref(), &id, |r| r.is_owned_by(&owner)).await?;
        tracing::info!(transaction_id = %id, deleted, "wide-column write rolled back");
        Ok(SagaContext::new().with(keys::WIDE_COLUMN_ROLLED_BACK, true))
    }
}
