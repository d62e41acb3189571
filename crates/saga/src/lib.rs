//! Saga workflow engine.
//!
//! This crate provides:
//! - Declarative saga definitions with branches and offline validation
//! - A typed context that carries step outputs between steps
//! - The executor that drives instances forward, retries transient
//!   failures and unwinds completed steps through their compensations
//! - A background worker that resumes instances nobody is driving
//! - Built-in invokers and definitions for the credit-decision,
//!   dual-write and reconciliation workflows
//!
//! Every step attempt is persisted to an [`InstanceStore`] with a
//! compare-and-swap on the instance version, so an instance can be resumed
//! after a crash and is never advanced by two executors at once.

pub mod context;
pub mod definition;
pub mod definitions;
pub mod error;
pub mod executor;
pub mod instance;
pub mod invoker;
pub mod invokers;
pub mod registry;
pub mod retry;
pub mod state;
pub mod worker;

pub use context::{ContextValue, INSTANCE_ID_KEY, SagaContext};
pub use definition::{
    ActionRef, Branch, ChoiceRule, Condition, SagaDefinition, SagaDefinitionBuilder,
    StepDefinition, TerminalOutcome, Transition,
};
pub use definitions::{BuiltinServices, builtin_actions, builtin_definitions};
pub use error::{DefinitionError, ErrorKind, Result, SagaError, StepError};
pub use executor::{Admission, ExecutorConfig, SagaExecutor};
pub use instance::{SagaInstance, StepOutcome, StepResult};
pub use instance_store::InstanceStore;
pub use invoker::{ActionRegistry, StepInvoker};
pub use registry::DefinitionRegistry;
pub use retry::RetryPolicy;
pub use state::SagaStatus;
pub use worker::SagaWorker;

pub use domain::{MetricsMonitoring, Monitoring, NoopMonitoring, RecordingMonitoring};
