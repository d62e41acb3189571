//! Built-in step invokers.

mod credit_decision;
mod dual_write;
mod reconciliation;

pub use credit_decision::{ApplyDecisionPolicy, ComputeScore, FetchCreditInfo, SendNotification};
pub use dual_write::{
    RollbackLedgerWrite, RollbackWideColumnWrite, WriteToLedger, WriteToWideColumnStore,
};
pub use reconciliation::{DetectInconsistencies, ReconcileData};
