//! Records written by the dual-write saga: one row in the relational
//! ledger and one row in the wide-column hot-data store per transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::Record;
use crate::value_objects::{CustomerId, Money, TransactionId};

/// Query filter shared by the transaction records. The default matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub customer_id: Option<CustomerId>,
}

impl TransactionFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches records belonging to one customer.
    pub fn for_customer(customer_id: CustomerId) -> Self {
        Self {
            customer_id: Some(customer_id),
        }
    }

    fn accepts(&self, customer_id: &CustomerId) -> bool {
        self.customer_id.as_ref().is_none_or(|c| c == customer_id)
    }
}

/// Ledger row in the relational store, the source of truth.
///
/// `owner` names the saga instance that wrote the entry; only that
/// instance may roll it back. Entries loaded from elsewhere have none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub transaction_id: TransactionId,
    pub customer_id: CustomerId,
    pub amount: Money,
    #[serde(default)]
    pub owner: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(transaction_id: TransactionId, customer_id: CustomerId, amount: Money) -> Self {
        Self {
            transaction_id,
            customer_id,
            amount,
            owner: None,
            recorded_at: Utc::now(),
        }
    }

    /// Marks the entry as written by `owner`.
    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Returns true if `owner` wrote this entry.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }

    /// Returns true if `other` describes the same business transaction,
    /// ignoring owner and write timestamps.
    pub fn same_transaction(&self, other: &LedgerEntry) -> bool {
        self.transaction_id == other.transaction_id
            && self.customer_id == other.customer_id
            && self.amount == other.amount
    }
}

impl Record for LedgerEntry {
    type Patch = Money;
    type Filter = TransactionFilter;

    fn record_id(&self) -> &str {
        self.transaction_id.as_str()
    }

    fn apply_patch(&mut self, amount: Money) {
        self.amount = amount;
    }

    fn matches(&self, filter: &TransactionFilter) -> bool {
        filter.accepts(&self.customer_id)
    }
}

/// Denormalised row in the wide-column store, read on the hot path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditLimitRow {
    pub transaction_id: TransactionId,
    pub customer_id: CustomerId,
    pub amount: Money,
    #[serde(default)]
    pub owner: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CreditLimitRow {
    /// Derives the wide-column row for a ledger entry, keeping its owner.
    pub fn from_ledger(entry: &LedgerEntry) -> Self {
        Self {
            transaction_id: entry.transaction_id.clone(),
            customer_id: entry.customer_id.clone(),
            amount: entry.amount,
            owner: entry.owner.clone(),
            updated_at: Utc::now(),
        }
    }

    /// Returns true if `owner` wrote this row.
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }

    /// Returns true if this row mirrors the ledger entry. Ownership is not compared.
    pub fn mirrors(&self, entry: &LedgerEntry) -> bool {
        self.transaction_id == entry.transaction_id
            && self.customer_id == entry.customer_id
            && self.amount == entry.amount
    }
}

impl Record for CreditLimitRow {
    type Patch = Money;
    type Filter = TransactionFilter;

    fn record_id(&self) -> &str {
        self.transaction_id.as_str()
    }

    fn apply_patch(&mut self, amount: Money) {
        self.amount = amount;
        self.updated_at = Utc::now();
    }

    fn matches(&self, filter: &TransactionFilter) -> bool {
        filter.accepts(&self.customer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_mirrors_ledger_entry() {
        let entry = LedgerEntry::new("tx-1".into(), "c-1".into(), Money::from_dollars(10));
        let mut row = CreditLimitRow::from_ledger(&entry);
        assert!(row.mirrors(&entry));

        row.apply_patch(Money::from_dollars(11));
        assert!(!row.mirrors(&entry));
    }

    #[test]
    fn test_same_transaction_ignores_timestamps() {
        let a = LedgerEntry::new("tx-1".into(), "c-1".into(), Money::from_dollars(10));
        let mut b = a.clone();
        b.recorded_at = a.recorded_at + chrono::Duration::seconds(5);
        assert!(a.same_transaction(&b));

        b.amount = Money::from_dollars(9);
        assert!(!a.same_transaction(&b));
    }

    #[test]
    fn test_ownership_follows_the_ledger_entry() {
        let entry =
            LedgerEntry::new("tx-1".into(), "c-1".into(), Money::from_dollars(10)).owned_by("saga-a");
        assert!(entry.is_owned_by("saga-a"));
        assert!(!entry.is_owned_by("saga-b"));

        let row = CreditLimitRow::from_ledger(&entry);
        assert!(row.is_owned_by("saga-a"));

        let unowned = LedgerEntry::new("tx-1".into(), "c-1".into(), Money::from_dollars(10));
        assert!(!unowned.is_owned_by("saga-a"));
        assert!(unowned.same_transaction(&entry));
    }

    #[test]
    fn test_filter() {
        let entry = LedgerEntry::new("tx-1".into(), "c-1".into(), Money::from_dollars(10));
        assert!(entry.matches(&TransactionFilter::all()));
        assert!(entry.matches(&TransactionFilter::for_customer("c-1".into())));
        assert!(!entry.matches(&TransactionFilter::for_customer("c-2".into())));
    }
}
