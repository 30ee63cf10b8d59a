/// Error taxonomy for the workflow engine
///
/// Definition errors block persistence at authoring time, step errors fail the
/// owning execution, scheduling errors are recorded on the deferred job.
/// Duplicate run-once triggers are not errors at all (see `TriggerOutcome`).

use thiserror::Error;
use uuid::Uuid;

/// Malformed workflow or step definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("workflow name must not be empty")]
    EmptyName,

    #[error("workflow must contain at least one step")]
    NoSteps,

    #[error("unknown trigger type: '{0}'")]
    UnknownTriggerType(String),

    #[error("invalid trigger conditions for '{trigger_type}': {reason}")]
    InvalidTriggerConditions { trigger_type: String, reason: String },

    #[error("unknown step type at position {position}: '{step_type}'")]
    UnknownStepType { position: i64, step_type: String },

    /// A required configuration key is absent
    #[error("step at position {position} ({step_type}) is missing required configuration field '{field}'")]
    Configuration {
        position: i64,
        step_type: String,
        field: String,
    },

    /// A configuration key is present but has the wrong shape
    #[error("step at position {position} ({step_type}) has invalid configuration field '{field}': {reason}")]
    InvalidConfiguration {
        position: i64,
        step_type: String,
        field: String,
        reason: String,
    },

    /// Two steps share a position, or a position is negative
    #[error("invalid step ordering: position {position} {reason}")]
    Ordering { position: i64, reason: String },
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row could not be mapped back into a domain value
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

/// Failure of a single step handler
#[derive(Debug, Error)]
pub enum StepError {
    #[error("message template not found: '{0}'")]
    TemplateNotFound(String),

    #[error("template rendering failed: {0}")]
    Render(String),

    #[error("mail dispatch failed: {0}")]
    Dispatch(String),

    #[error("no target adapter registered for type '{0}'")]
    UnknownTargetType(String),

    #[error("target rejected the operation: {0}")]
    Target(#[from] TargetError),

    #[error("unsupported step type: {0}")]
    Unsupported(String),

    #[error("delay of {0} cannot be scheduled")]
    DelayOutOfRange(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors reported by a target adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("{target_type} '{target_id}' not found")]
    NotFound {
        target_type: String,
        target_id: String,
    },

    #[error("field '{0}' is not readable on this target")]
    UnreadableField(String),

    #[error("field '{0}' is not writable on this target")]
    UnwritableField(String),

    #[error("value {value} is not allowed for field '{field}'")]
    RejectedValue { field: String, value: String },

    #[error("target backend error: {0}")]
    Backend(String),
}

/// Failure while resuming a deferred job
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("deferred job {0} not found")]
    JobNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("step {step_id} does not belong to workflow {workflow_id}")]
    UnknownStep { workflow_id: Uuid, step_id: Uuid },

    #[error("cannot move cursor backwards from {current} to {target}")]
    StaleCursor { current: i64, target: i64 },

    #[error("deferred job {job_id} is '{status}', only failed jobs can be retried")]
    NotRetryable { job_id: Uuid, status: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Engine(#[from] Box<EngineError>),
}

/// Errors surfaced by the engine's public operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("cannot {action} execution in status '{from}'")]
    InvalidTransition { from: String, action: &'static str },

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(StorageError::Database(e))
    }
}

impl From<EngineError> for SchedulingError {
    fn from(e: EngineError) -> Self {
        SchedulingError::Engine(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_missing_field() {
        let err = DefinitionError::Configuration {
            position: 2,
            step_type: "send_email".to_string(),
            field: "template".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'template'"));
        assert!(msg.contains("position 2"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = EngineError::InvalidTransition {
            from: "completed".to_string(),
            action: "pause",
        };
        assert_eq!(err.to_string(), "cannot pause execution in status 'completed'");
    }

    #[test]
    fn target_error_converts_into_step_error() {
        let err: StepError = TargetError::UnwritableField("secret".to_string()).into();
        assert!(err.to_string().contains("not writable"));
    }
}
