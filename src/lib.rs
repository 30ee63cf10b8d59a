/// lendflow: trigger-driven workflow execution engine
///
/// Runs ordered, typed steps (notify, wait, check, mutate) against business
/// entities over time, with idempotent triggering and persisted delays.

// Core configuration and setup
pub mod config;

// Error taxonomy
pub mod error;

// SQLite pool, schema and row helpers
pub mod store;

// Workflow management layer - definitions, storage, and registry
pub mod workflow;

// Runtime records - executions, step logs, deferred jobs, idempotency ledger
pub mod execution;

// Target entities the steps act on
pub mod targets;

// Message templates and mail dispatch
pub mod notify;

// Runtime execution engine - state machine, step dispatch, sweep
pub mod runtime;

// Service setup and initialization
pub mod service;

// Re-export commonly used types for external consumers
pub use config::Config;
pub use error::{DefinitionError, EngineError, SchedulingError, StepError, StorageError, TargetError};
pub use execution::{DeferredJob, Execution, ExecutionStatus, JobStatus, StepExecutionLog};
pub use runtime::{ResumeExecution, SweepReport, TriggerOutcome, WorkflowEngine};
pub use service::{create_app, start_service, App};
pub use store::Database;
pub use targets::{TargetAdapter, TargetRef, TargetRegistry};
pub use workflow::{RawWorkflowDefinition, StepConfig, TriggerEvent, TriggerSpec, WorkflowDefinition};
