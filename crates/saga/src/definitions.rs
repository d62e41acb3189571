//! Built-in saga definitions and the wiring of their invokers.
//!
//! Three workflows ship with the engine:
//! - `credit-decision`: fetch credit info, score, decide, then notify the
//!   customer on the approval or the denial branch.
//! - `ledger-wide-column-dual-write`: write a transaction to the ledger and
//!   mirror it into the wide-column store, rolling back on failure.
//! - `data-reconciliation`: detect drift between the two stores and repair
//!   the wide-column side from the ledger.

use std::sync::Arc;
use std::time::Duration;

use domain::{CreditLimitRow, CreditRecord, DataReader, DataStorage, LedgerEntry, Notifier};

use crate::definition::{Branch, Condition, SagaDefinition, StepDefinition, Transition};
use crate::error::DefinitionError;
use crate::invoker::ActionRegistry;
use crate::invokers::{
    ApplyDecisionPolicy, ComputeScore, DetectInconsistencies, FetchCreditInfo, ReconcileData,
    RollbackLedgerWrite, RollbackWideColumnWrite, SendNotification, WriteToLedger,
    WriteToWideColumnStore,
};
use crate::registry::DefinitionRegistry;
use crate::retry::RetryPolicy;

pub const CREDIT_DECISION: &str = "credit-decision";
pub const DUAL_WRITE: &str = "ledger-wide-column-dual-write";
pub const RECONCILIATION: &str = "data-reconciliation";

/// Context keys read and written by the built-in invokers.
pub mod keys {
    pub use crate::context::INSTANCE_ID_KEY as INSTANCE_ID;

    pub const CUSTOMER_ID: &str = "customer_id";
    pub const REQUESTED_LIMIT: &str = "requested_limit";
    pub const CREDIT: &str = "credit";
    pub const CREDIT_SCORE: &str = "credit_score";
    pub const DEBT_TO_INCOME_RATIO: &str = "debt_to_income_ratio";
    pub const RISK_BAND: &str = "risk_band";
    pub const APPROVED: &str = "approved";
    pub const APPROVED_LIMIT: &str = "approved_limit";
    pub const DECISION: &str = "decision";
    pub const NOTIFIED: &str = "notified";

    pub const TRANSACTION_ID: &str = "transaction_id";
    pub const AMOUNT: &str = "amount";
    pub const LEDGER_WRITTEN: &str = "ledger_written";
    pub const WIDE_COLUMN_WRITTEN: &str = "wide_column_written";
    pub const LEDGER_ROLLED_BACK: &str = "ledger_rolled_back";
    pub const WIDE_COLUMN_ROLLED_BACK: &str = "wide_column_rolled_back";

    pub const INCONSISTENCIES_FOUND: &str = "inconsistencies_found";
    pub const MISSING_ROWS: &str = "missing_rows";
    pub const STALE_ROWS: &str = "stale_rows";
    pub const ORPHANED_ROWS: &str = "orphaned_rows";
    pub const RECONCILED: &str = "reconciled";
}

/// Step names used by the built-in definitions.
pub mod steps {
    pub const FETCH_CREDIT_INFO: &str = "fetch_credit_info";
    pub const COMPUTE_SCORE: &str = "compute_score";
    pub const APPLY_DECISION_POLICY: &str = "apply_decision_policy";
    pub const NOTIFY_APPROVAL: &str = "notify_approval";
    pub const NOTIFY_DENIAL: &str = "notify_denial";

    pub const WRITE_LEDGER: &str = "write_ledger";
    pub const WRITE_WIDE_COLUMN: &str = "write_wide_column";

    pub const DETECT_INCONSISTENCIES: &str = "detect_inconsistencies";
    pub const RECONCILE_DATA: &str = "reconcile_data";
}

/// Action names the built-in invokers are registered under.
pub mod actions {
    pub const FETCH_CREDIT_INFO: &str = "FetchCreditInfo";
    pub const COMPUTE_SCORE: &str = "ComputeScore";
    pub const APPLY_DECISION_POLICY: &str = "ApplyDecisionPolicy";
    pub const SEND_NOTIFICATION: &str = "SendNotification";

    pub const WRITE_TO_LEDGER: &str = "WriteToLedger";
    pub const WRITE_TO_WIDE_COLUMN_STORE: &str = "WriteToWideColumnStore";
    pub const ROLLBACK_LEDGER_WRITE: &str = "RollbackLedgerWrite";
    pub const ROLLBACK_WIDE_COLUMN_WRITE: &str = "RollbackWideColumnWrite";

    pub const DETECT_INCONSISTENCIES: &str = "DetectInconsistencies";
    pub const RECONCILE_DATA: &str = "ReconcileData";
}

pub const CREDIT_DECISION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const CREDIT_STEP_TIMEOUT: Duration = Duration::from_secs(60);

pub const DUAL_WRITE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DUAL_WRITE_STEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const RECONCILIATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DETECT_STEP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const RECONCILE_STEP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Retry applied to every built-in step: six attempts, doubling from two
/// seconds, for transient service failures only.
pub fn builtin_retry() -> RetryPolicy {
    RetryPolicy::exponential(6, Duration::from_secs(2))
}

fn credit_step(name: &str, action: &str) -> StepDefinition {
    StepDefinition::new(name, action)
        .retry(builtin_retry())
        .timeout(CREDIT_STEP_TIMEOUT)
}

/// Fetch, score, decide, then notify on whichever branch the decision took.
/// Both notification branches end the saga successfully: a denial is a
/// business outcome, not a failure.
pub fn credit_decision_definition() -> SagaDefinition {
    SagaDefinition::builder(CREDIT_DECISION)
        .step(credit_step(steps::FETCH_CREDIT_INFO, actions::FETCH_CREDIT_INFO))
        .step(credit_step(steps::COMPUTE_SCORE, actions::COMPUTE_SCORE))
        .step(
            credit_step(steps::APPLY_DECISION_POLICY, actions::APPLY_DECISION_POLICY).branch(
                Branch::when(
                    Condition::bool_equals(keys::APPROVED, true),
                    Transition::next(steps::NOTIFY_APPROVAL),
                )
                .otherwise(Transition::next(steps::NOTIFY_DENIAL)),
            ),
        )
        .step(
            credit_step(steps::NOTIFY_APPROVAL, actions::SEND_NOTIFICATION)
                .branch(Branch::Always(Transition::succeed())),
        )
        .step(credit_step(steps::NOTIFY_DENIAL, actions::SEND_NOTIFICATION))
        .timeout(CREDIT_DECISION_TIMEOUT)
        .build()
}

/// Ledger first, then the wide-column mirror. Each write carries its own
/// rollback.
pub fn dual_write_definition() -> SagaDefinition {
    SagaDefinition::builder(DUAL_WRITE)
        .step(
            StepDefinition::new(steps::WRITE_LEDGER, actions::WRITE_TO_LEDGER)
                .compensate_with(actions::ROLLBACK_LEDGER_WRITE)
                .retry(builtin_retry())
                .timeout(DUAL_WRITE_STEP_TIMEOUT),
        )
        .step(
            StepDefinition::new(steps::WRITE_WIDE_COLUMN, actions::WRITE_TO_WIDE_COLUMN_STORE)
                .compensate_with(actions::ROLLBACK_WIDE_COLUMN_WRITE)
                .retry(builtin_retry())
                .timeout(DUAL_WRITE_STEP_TIMEOUT),
        )
        .timeout(DUAL_WRITE_TIMEOUT)
        .build()
}

/// Detects drift and repairs it only when there is something to repair.
pub fn reconciliation_definition() -> SagaDefinition {
    SagaDefinition::builder(RECONCILIATION)
        .step(
            StepDefinition::new(steps::DETECT_INCONSISTENCIES, actions::DETECT_INCONSISTENCIES)
                .retry(builtin_retry())
                .timeout(DETECT_STEP_TIMEOUT)
                .branch(
                    Branch::when(
                        Condition::bool_equals(keys::INCONSISTENCIES_FOUND, true),
                        Transition::next(steps::RECONCILE_DATA),
                    )
                    .otherwise(Transition::succeed()),
                ),
        )
        .step(
            StepDefinition::new(steps::RECONCILE_DATA, actions::RECONCILE_DATA)
                .retry(builtin_retry())
                .timeout(RECONCILE_STEP_TIMEOUT),
        )
        .timeout(RECONCILIATION_TIMEOUT)
        .build()
}

/// External collaborators the built-in invokers call.
#[derive(Clone)]
pub struct BuiltinServices {
    pub credit: Arc<dyn DataReader<CreditRecord>>,
    pub ledger: Arc<dyn DataStorage<LedgerEntry>>,
    pub wide_column: Arc<dyn DataStorage<CreditLimitRow>>,
    pub notifier: Arc<dyn Notifier>,
}

/// Registers every built-in invoker under its action name.
pub fn builtin_actions(services: &BuiltinServices) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            actions::FETCH_CREDIT_INFO,
            Arc::new(FetchCreditInfo::new(Arc::clone(&services.credit))),
        )
        .register(actions::COMPUTE_SCORE, Arc::new(ComputeScore))
        .register(actions::APPLY_DECISION_POLICY, Arc::new(ApplyDecisionPolicy))
        .register(
            actions::SEND_NOTIFICATION,
            Arc::new(SendNotification::new(Arc::clone(&services.notifier))),
        )
        .register(
            actions::WRITE_TO_LEDGER,
            Arc::new(WriteToLedger::new(Arc::clone(&services.ledger))),
        )
        .register(
            actions::WRITE_TO_WIDE_COLUMN_STORE,
            Arc::new(WriteToWideColumnStore::new(Arc::clone(&services.wide_column))),
        )
        .register(
            actions::ROLLBACK_LEDGER_WRITE,
            Arc::new(RollbackLedgerWrite::new(Arc::clone(&services.ledger))),
        )
        .register(
            actions::ROLLBACK_WIDE_COLUMN_WRITE,
            Arc::new(RollbackWideColumnWrite::new(Arc::clone(&services.wide_column))),
        )
        .register(
            actions::DETECT_INCONSISTENCIES,
            Arc::new(DetectInconsistencies::new(
                Arc::clone(&services.ledger),
                Arc::clone(&services.wide_column),
            )),
        )
        .register(
            actions::RECONCILE_DATA,
            Arc::new(ReconcileData::new(
                Arc::clone(&services.ledger),
                Arc::clone(&services.wide_column),
            )),
        );
    registry
}

/// Validates and registers the three built-in definitions.
pub fn builtin_definitions(actions: &ActionRegistry) -> Result<DefinitionRegistry, DefinitionError> {
    let mut registry = DefinitionRegistry::new();
    registry.register(credit_decision_definition(), actions)?;
    registry.register(dual_write_definition(), actions)?;
    registry.register(reconciliation_definition(), actions)?;
    Ok(registry)
}
