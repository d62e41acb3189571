//! Invokers for the data-reconciliation saga.
//!
//! The ledger is the source of truth. A wide-column row is consistent when
//! it mirrors the ledger entry with the same transaction ID.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{CreditLimitRow, CustomerId, DataStorage, LedgerEntry, StorageError, TransactionFilter};

use crate::context::SagaContext;
use crate::definitions::keys;
use crate::error::StepError;
use crate::invoker::StepInvoker;

/// Restricts a run to one customer when the context names one.
fn scope(context: &SagaContext) -> Result<TransactionFilter, StepError> {
    if context.contains(keys::CUSTOMER_ID) {
        let customer_id = CustomerId::new(context.get_text(keys::CUSTOMER_ID)?);
        Ok(TransactionFilter::for_customer(customer_id))
    } else {
        Ok(TransactionFilter::all())
    }
}

/// Compares the two stores and lists the transaction IDs that drifted.
pub struct DetectInconsistencies {
    ledger: Arc<dyn DataStorage<LedgerEntry>>,
    wide_column: Arc<dyn DataStorage<CreditLimitRow>>,
}

impl DetectInconsistencies {
    pub fn new(
        ledger: Arc<dyn DataStorage<LedgerEntry>>,
        wide_column: Arc<dyn DataStorage<CreditLimitRow>>,
    ) -> Self {
        Self {
            ledger,
            wide_column,
        }
    }
}

#[async_trait]
impl StepInvoker for DetectInconsistencies {
    #[tracing::instrument(name = "detect_inconsistencies", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let filter = scope(&context)?;
        let entries = self.ledger.query(&filter).await?;
        let rows = self.wide_column.query(&filter).await?;

        let rows_by_id: HashMap<&str, &CreditLimitRow> =
            rows.iter().map(|r| (r.transaction_id.as_str(), r)).collect();
        let ledger_ids: HashSet<&str> = entries.iter().map(|e| e.transaction_id.as_str()).collect();

        let mut missing = Vec::new();
        let mut stale = Vec::new();
        for entry in &entries {
            match rows_by_id.get(entry.transaction_id.as_str()) {
                None => missing.push(entry.transaction_id.to_string()),
                Some(row) if !row.mirrors(entry) => stale.push(entry.transaction_id.to_string()),
                Some(_) => {}
            }
        }

        let mut orphaned = Vec::new();
        for row in &rows {
            let id = row.transaction_id.as_str();
            if ledger_ids.contains(id) {
                continue;
            }
            // Outside the scope the row may still belong to a ledger entry
            // recorded under another customer.
            match self.ledger.read_item(id).await? {
                Some(_) => stale.push(id.to_string()),
                None => orphaned.push(id.to_string()),
            }
        }

        let found = !(missing.is_empty() && stale.is_empty() && orphaned.is_empty());
        tracing::info!(
            ledger_entries = entries.len(),
            wide_column_rows = rows.len(),
            missing = missing.len(),
            stale = stale.len(),
            orphaned = orphaned.len(),
            "consistency check complete"
        );

        Ok(SagaContext::new()
            .with(keys::INCONSISTENCIES_FOUND, found)
            .with(keys::MISSING_ROWS, missing)
            .with(keys::STALE_ROWS, stale)
            .with(keys::ORPHANED_ROWS, orphaned))
    }
}

/// Repairs the wide-column store from the ledger for every ID the detector
/// listed.
///
/// Each repair re-reads the ledger, so the step converges on the current
/// truth even if the stores moved since detection and it is safe to retry.
pub struct ReconcileData {
    ledger: Arc<dyn DataStorage<LedgerEntry>>,
    wide_column: Arc<dyn DataStorage<CreditLimitRow>>,
}

impl ReconcileData {
    pub fn new(
        ledger: Arc<dyn DataStorage<LedgerEntry>>,
        wide_column: Arc<dyn DataStorage<CreditLimitRow>>,
    ) -> Self {
        Self {
            ledger,
            wide_column,
        }
    }

    /// Brings one row in line with the ledger. Returns true if anything changed.
    async fn repair(&self, id: &str) -> Result<bool, StorageError> {
        let entry = self.ledger.read_item(id).await?;
        let row = self.wide_column.read_item(id).await?;

        match (entry, row) {
            (Some(entry), Some(row)) if row.mirrors(&entry) => Ok(false),
            (Some(entry), row) => {
                if row.is_some() {
                    match self.wide_column.delete_item(id).await {
                        Ok(()) | Err(StorageError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                match self
                    .wide_column
                    .write_item(CreditLimitRow::from_ledger(&entry))
                    .await
                {
                    Ok(()) => Ok(true),
                    Err(StorageError::AlreadyExists(_)) => Ok(false),
                    Err(err) => Err(err),
                }
            }
            (None, Some(_)) => match self.wide_column.delete_item(id).await {
                Ok(()) => Ok(true),
                Err(StorageError::NotFound(_)) => Ok(false),
                Err(err) => Err(err),
            },
            (None, None) => Ok(false),
        }
    }
}

#[async_trait]
impl StepInvoker for ReconcileData {
    #[tracing::instrument(name = "reconcile_data", skip_all)]
    async fn invoke(&self, context: SagaContext) -> Result<SagaContext, StepError> {
        let mut ids = context.get_text_list(keys::MISSING_ROWS)?;
        ids.extend(context.get_text_list(keys::STALE_ROWS)?);
        ids.extend(context.get_text_list(keys::ORPHANED_ROWS)?);

        let mut reconciled: i64 = 0;
        for id in &ids {
            if self.repair(id).await? {
                reconciled += 1;
            }
        }

        tracing::info!(candidates = ids.len(), reconciled, "wide-column store reconciled");
        Ok(SagaContext::new().with(keys::RECONCILED, reconciled))
    }
}
