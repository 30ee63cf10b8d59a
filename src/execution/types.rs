/// Runtime records: executions, step logs, deferred jobs and the idempotency ledger

use crate::targets::TargetRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Implements `as_str`, `parse` and `Display` for a snake_case status enum
macro_rules! status_strings {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Lifecycle of an execution
///
/// pending -> running -> {completed | failed | cancelled}, with running <-> paused.
/// `Processing` is accepted when reading rows but never written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

status_strings!(ExecutionStatus {
    Pending => "pending",
    Processing => "processing",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// One running instance of a workflow bound to one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub target: TargetRef,
    /// Key this execution was triggered under
    pub trigger_key: String,
    pub status: ExecutionStatus,
    /// Index into the workflow's ordered steps
    pub current_step_position: i64,
    /// Snapshot captured at trigger time, used for template substitution
    pub context: Map<String, Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(workflow_id: Uuid, target: TargetRef, trigger_key: String, context: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            target,
            trigger_key,
            status: ExecutionStatus::Pending,
            current_step_position: 0,
            context,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Share of steps passed, 0.0–100.0 (informational only)
    pub fn progress_percentage(&self, total_steps: usize) -> f64 {
        if total_steps == 0 {
            return 100.0;
        }
        let done = self.current_step_position.clamp(0, total_steps as i64) as f64;
        done / total_steps as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLogStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

status_strings!(StepLogStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Append-only audit row for one attempt at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionLog {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub step_id: Uuid,
    pub step_position: i64,
    pub step_type: String,
    pub status: StepLogStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl StepExecutionLog {
    pub fn running(execution_id: Uuid, step_id: Uuid, step_position: i64, step_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            step_position,
            step_type: step_type.to_string(),
            status: StepLogStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

status_strings!(JobStatus {
    Scheduled => "scheduled",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Scheduled | JobStatus::Processing)
    }
}

/// Persisted "resume execution E at step S at time T"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredJob {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// Step to resume at; None when the delay was the last step
    pub step_id: Option<Uuid>,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeferredJob {
    pub fn scheduled(execution_id: Uuid, step_id: Option<Uuid>, scheduled_for: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            step_id,
            scheduled_for,
            status: JobStatus::Scheduled,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Scheduled && self.scheduled_for <= now
    }
}

/// Idempotency ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEntry {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub target: TargetRef,
    pub trigger_type: String,
    pub trigger_key: String,
    pub run_once: bool,
    pub executed_at: DateTime<Utc>,
}

/// Result of an insert-if-absent on the ledger
///
/// Storage failures are the third state, carried by the surrounding `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    AlreadyPresent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Processing,
            ExecutionStatus::Running,
            ExecutionStatus::Paused,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("scheduled"), Some(JobStatus::Scheduled));
        assert_eq!(StepLogStatus::parse("exploded"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(!ExecutionStatus::Processing.is_terminal());
    }

    #[test]
    fn progress_is_informational_ratio() {
        let mut execution = Execution::new(Uuid::new_v4(), TargetRef::new("loan", "1"), "k".into(), Map::new());
        assert_eq!(execution.progress_percentage(4), 0.0);
        execution.current_step_position = 1;
        assert_eq!(execution.progress_percentage(4), 25.0);
        execution.current_step_position = 4;
        assert_eq!(execution.progress_percentage(4), 100.0);
        assert_eq!(execution.progress_percentage(0), 100.0);
    }

    #[test]
    fn job_readiness() {
        let now = Utc::now();
        let mut job = DeferredJob::scheduled(Uuid::new_v4(), None, now + Duration::hours(1));
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + Duration::hours(1)));
        job.status = JobStatus::Cancelled;
        assert!(!job.is_ready(now + Duration::hours(2)));
    }
}
