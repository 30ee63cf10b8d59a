/// Execution state: runtime records, their storage, and the idempotency ledger

pub mod types;

pub mod storage;

pub mod tracker;

pub use storage::ExecutionStore;
pub use tracker::ExecutionTracker;
pub use types::{
    DeferredJob, Execution, ExecutionStatus, JobStatus, RecordOutcome, StepExecutionLog, StepLogStatus,
    TrackerEntry,
};
