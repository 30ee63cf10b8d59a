/// Workflow management layer
///
/// Definitions (typed steps and triggers with authoring-time validation), their
/// SQLite persistence, and the lock-free in-memory registry used for trigger
/// matching.

pub mod types;

pub mod storage;

pub mod registry;

pub use registry::WorkflowRegistry;
pub use storage::WorkflowStorage;
pub use types::{
    Condition, DelayUnit, RawStepDefinition, RawWorkflowDefinition, StepConfig, StepDefinition, StepType,
    TriggerEvent, TriggerSpec, TriggerType, WorkflowDefinition,
};
