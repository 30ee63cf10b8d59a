/// Runtime Execution Engine
///
/// - Step dispatch to typed handlers (executor)
/// - Execution state machine, triggering and deferred-job resumption (engine)
/// - Periodic sweep of due deferred jobs (scheduler)

// Per-step-type handlers
pub mod executor;

// Execution state machine
pub mod engine;

// Background cron sweep
pub mod scheduler;

pub use engine::{ExecutionProgress, JobRun, ResumeExecution, SweepReport, TriggerOutcome, WorkflowEngine};
pub use executor::{StepExecutor, StepOutcome};
pub use scheduler::SweepService;
