/// Workflow execution engine
///
/// Owns the execution state machine: triggering behind the idempotency gate,
/// the advance loop that chains immediate steps, operator transitions
/// (pause/resume/cancel), and resumption of parked executions by the sweep.

use crate::{
    error::{EngineError, SchedulingError},
    execution::{
        DeferredJob, Execution, ExecutionStatus, ExecutionStore, ExecutionTracker, RecordOutcome,
        StepExecutionLog, StepLogStatus, TrackerEntry,
    },
    runtime::executor::StepExecutor,
    targets::TargetRef,
    workflow::{
        types::{StepType, TriggerEvent, WorkflowDefinition},
        WorkflowRegistry,
    },
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Default number of deferred jobs handled per sweep
pub const DEFAULT_BATCH_SIZE: u32 = 100;

const NON_TERMINAL: [ExecutionStatus; 4] = [
    ExecutionStatus::Pending,
    ExecutionStatus::Processing,
    ExecutionStatus::Running,
    ExecutionStatus::Paused,
];

/// Result of a trigger attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// A new execution was created and driven as far as it could go
    Started(Execution),
    /// The run-once key already fired; nothing happened
    Duplicate,
    /// The workflow exists but is switched off
    Inactive,
}

/// Request to continue an execution at a given step
///
/// `step_id: None` means "past the last step", which completes the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeExecution {
    pub execution_id: Uuid,
    pub step_id: Option<Uuid>,
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub claimed: usize,
    pub completed: usize,
    /// Claimed jobs marked failed
    pub failed: usize,
    pub skipped: usize,
    /// Jobs that could not be looked at or claimed; their rows are unchanged
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, run: &Result<JobRun, EngineError>) {
        match run {
            Ok(JobRun::NotClaimed) => self.skipped += 1,
            Ok(JobRun::Completed) => {
                self.claimed += 1;
                self.completed += 1;
            }
            Ok(JobRun::Failed) => {
                self.claimed += 1;
                self.failed += 1;
            }
            Ok(JobRun::Released) | Ok(JobRun::Discarded) => {
                self.claimed += 1;
                self.skipped += 1;
            }
            Err(_) => self.errors += 1,
        }
    }
}

/// What happened to a single deferred job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRun {
    /// Not ready, or claimed by another sweep
    NotClaimed,
    Completed,
    Failed,
    /// Execution is paused; the job goes back to scheduled
    Released,
    /// Execution already finished; the job is cancelled
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub current_step_position: i64,
    pub total_steps: usize,
    pub percentage: f64,
}

/// Trigger-driven multi-step workflow engine
#[derive(Debug)]
pub struct WorkflowEngine {
    registry: Arc<WorkflowRegistry>,
    store: ExecutionStore,
    tracker: ExecutionTracker,
    executor: Arc<StepExecutor>,
    batch_size: u32,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<WorkflowRegistry>,
        store: ExecutionStore,
        tracker: ExecutionTracker,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            registry,
            store,
            tracker,
            executor,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Triggering
    // ------------------------------------------------------------------

    /// Fire a workflow for a target
    ///
    /// Duplicates of a run-once key are silent no-ops. The tracker row and
    /// the execution are written in one transaction so two racing callers
    /// can't both start and a failed insert never consumes the key.
    pub async fn trigger(
        &self,
        workflow_id: Uuid,
        target: TargetRef,
        trigger_key: &str,
        run_once: bool,
        context: Map<String, Value>,
    ) -> Result<TriggerOutcome, EngineError> {
        let workflow = self.registry.resolve(workflow_id).await?;
        if !workflow.active {
            tracing::debug!("⏭️ Workflow '{}' is inactive, ignoring trigger", workflow.name);
            return Ok(TriggerOutcome::Inactive);
        }

        if self
            .tracker
            .already_executed(workflow.id, &target, trigger_key, run_once)
            .await?
        {
            tracing::debug!("🔁 '{}' already fired for {} ({})", workflow.name, target, trigger_key);
            return Ok(TriggerOutcome::Duplicate);
        }

        let context = snapshot_context(context, &workflow, &target, trigger_key);
        let execution = Execution::new(workflow.id, target, trigger_key.to_string(), context);

        let trigger_type = workflow.trigger.trigger_type();
        match self
            .store
            .insert_triggered_execution(&execution, trigger_type.as_str(), run_once)
            .await?
        {
            RecordOutcome::Inserted => {}
            RecordOutcome::AlreadyPresent => {
                tracing::debug!(
                    "🔁 Lost trigger race for '{}' on {} ({})",
                    workflow.name,
                    execution.target,
                    trigger_key
                );
                return Ok(TriggerOutcome::Duplicate);
            }
        }

        tracing::info!(
            "🎯 Triggered '{}' for {} (execution {}, key '{}')",
            workflow.name,
            execution.target,
            execution.id,
            trigger_key
        );

        let execution = self.start(execution.id).await?;
        Ok(TriggerOutcome::Started(execution))
    }

    /// Trigger every active workflow whose trigger matches the event
    ///
    /// Each workflow is handled independently; an error in one is logged and
    /// does not stop the others.
    pub async fn dispatch_event(&self, event: &TriggerEvent) -> Vec<(Uuid, TriggerOutcome)> {
        let matched = self.registry.matching(event);
        tracing::debug!(
            "📨 {} event for {} matched {} workflows",
            event.trigger_type,
            event.target,
            matched.len()
        );

        let mut context = event.context.clone();
        for (key, value) in &event.attributes {
            context.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let mut outcomes = Vec::with_capacity(matched.len());
        for workflow in matched {
            let trigger_key = event
                .trigger_key
                .clone()
                .unwrap_or_else(|| workflow.trigger.default_trigger_key());

            match self
                .trigger(workflow.id, event.target.clone(), &trigger_key, event.run_once, context.clone())
                .await
            {
                Ok(outcome) => outcomes.push((workflow.id, outcome)),
                Err(e) => {
                    tracing::error!("❌ Failed to trigger '{}' for {}: {}", workflow.name, event.target, e);
                }
            }
        }

        outcomes
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// pending -> running, then advance
    pub async fn start(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.transition(execution_id, &[ExecutionStatus::Pending], ExecutionStatus::Running, "start")
            .await?;
        self.advance(execution_id).await
    }

    /// running -> paused; an outstanding deferred job is left alone
    pub async fn pause(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self
            .transition(execution_id, &[ExecutionStatus::Running], ExecutionStatus::Paused, "pause")
            .await?;

        tracing::info!("⏸️ Paused execution {}", execution_id);
        Ok(execution)
    }

    /// paused -> running
    ///
    /// When a deferred job is still outstanding the execution waits for it
    /// instead of advancing now.
    pub async fn resume(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self
            .transition(execution_id, &[ExecutionStatus::Paused], ExecutionStatus::Running, "resume")
            .await?;
        tracing::info!("▶️ Resumed execution {}", execution_id);

        if self.store.has_active_job(execution_id).await? {
            tracing::debug!("⏳ Execution {} is waiting on a deferred job", execution_id);
            return Ok(execution);
        }

        self.advance(execution_id).await
    }

    /// Any non-terminal status -> cancelled, then its scheduled jobs
    ///
    /// A job claimed in between finds the execution cancelled and is discarded.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let execution = self
            .transition(execution_id, &NON_TERMINAL, ExecutionStatus::Cancelled, "cancel")
            .await?;
        let cancelled_jobs = self.store.cancel_scheduled_jobs(execution_id).await?;

        tracing::info!("🛑 Cancelled execution {} ({} deferred jobs cancelled)", execution_id, cancelled_jobs);
        Ok(execution)
    }

    /// Move an execution's cursor to a step and keep advancing from there
    ///
    /// The cursor never moves backwards. An execution that is not running is
    /// returned untouched.
    pub async fn resume_execution(&self, request: ResumeExecution) -> Result<Execution, SchedulingError> {
        let execution = self
            .store
            .get_execution(request.execution_id)
            .await?
            .ok_or(SchedulingError::ExecutionNotFound(request.execution_id))?;

        if execution.status != ExecutionStatus::Running {
            tracing::debug!(
                "⏭️ Execution {} is '{}', not resuming",
                execution.id,
                execution.status
            );
            return Ok(execution);
        }

        let workflow = self.registry.resolve(execution.workflow_id).await?;
        let target = match request.step_id {
            Some(step_id) => workflow.cursor_of(step_id).ok_or(SchedulingError::UnknownStep {
                workflow_id: workflow.id,
                step_id,
            })?,
            None => workflow.step_count() as i64,
        };

        self.move_cursor(&execution, target).await?;
        Ok(self.advance(execution.id).await?)
    }

    /// Run steps from the cursor until a delay parks the execution, a step
    /// fails, the workflow ends, or another caller pauses/cancels it
    ///
    /// Step failures are recorded on the execution and returned as `Ok`; only
    /// storage and lookup problems surface as errors.
    async fn advance(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let workflow_id = self.load(execution_id).await?.workflow_id;
        let workflow = self.registry.resolve(workflow_id).await?;

        loop {
            // Cooperative cancellation: pick up pause/cancel from other callers.
            let execution = self.load(execution_id).await?;
            if execution.status != ExecutionStatus::Running {
                tracing::debug!("⏹️ Execution {} is '{}', stopping", execution.id, execution.status);
                return Ok(execution);
            }

            let cursor = execution.current_step_position;
            let Some(step) = workflow.step_at(cursor) else {
                if self.finish(execution_id, ExecutionStatus::Completed, None).await? {
                    tracing::info!("✅ Execution {} of '{}' completed", execution_id, workflow.name);
                }
                return self.load(execution_id).await;
            };
            let next_step = workflow.step_at(cursor + 1).map(|s| s.id);

            let mut log = StepExecutionLog::running(execution.id, step.id, step.position, step.step_type().as_str());
            self.store.insert_log(&log).await?;

            let result = self.executor.execute_step(&execution, step, next_step).await;
            log.finished_at = Some(Utc::now());

            match result {
                Ok(outcome) => {
                    log.status = StepLogStatus::Completed;
                    log.result = Some(json!({ "message": outcome.message, "result": outcome.result }));
                    self.store.finish_log(&log).await?;

                    if step.step_type() == StepType::Delay {
                        return self.load(execution_id).await;
                    }

                    self.move_cursor(&execution, cursor + 1).await?;
                }
                Err(e) => {
                    let message = format!("step {} ({}) failed: {}", step.position, step.step_type(), e);
                    log.status = StepLogStatus::Failed;
                    log.error = Some(e.to_string());
                    self.store.finish_log(&log).await?;

                    if self.finish(execution_id, ExecutionStatus::Failed, Some(&message)).await? {
                        tracing::error!("❌ Execution {} failed: {}", execution_id, message);
                    }
                    return self.load(execution_id).await;
                }
            }
        }
    }

    /// running -> terminal; false when another caller already moved it on
    async fn finish(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        last_error: Option<&str>,
    ) -> Result<bool, EngineError> {
        let finished = self
            .store
            .transition_execution(execution_id, &[ExecutionStatus::Running], status, last_error, Utc::now())
            .await?;
        if !finished {
            tracing::debug!("⏹️ Execution {} left 'running' before it could be marked '{}'", execution_id, status);
        }
        Ok(finished)
    }

    async fn move_cursor(&self, execution: &Execution, target: i64) -> Result<(), SchedulingError> {
        let stale = |current| SchedulingError::StaleCursor { current, target };

        if target < execution.current_step_position {
            return Err(stale(execution.current_step_position));
        }
        if target != execution.current_step_position && !self.store.set_cursor(execution.id, target).await? {
            let current = self
                .store
                .get_execution(execution.id)
                .await?
                .map_or(execution.current_step_position, |e| e.current_step_position);
            return Err(stale(current));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deferred jobs
    // ------------------------------------------------------------------

    /// Scheduled jobs due at `now`
    pub async fn ready_jobs(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DeferredJob>, EngineError> {
        Ok(self.store.ready_jobs(now, limit).await?)
    }

    /// One sweep: claim and run every due job, up to the batch size
    pub async fn process_ready_jobs(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let jobs = self.store.ready_jobs(now, self.batch_size).await?;
        let mut report = SweepReport::default();

        for job in jobs {
            let run = self.execute_deferred_job(job.id, now).await;
            if let Err(e) = &run {
                tracing::error!("❌ Deferred job {} could not be processed: {}", job.id, e);
            }
            report.record(&run);
        }

        if report != SweepReport::default() {
            tracing::info!(
                "🧹 Sweep: {} claimed, {} completed, {} failed, {} skipped, {} errors",
                report.claimed,
                report.completed,
                report.failed,
                report.skipped,
                report.errors
            );
        }
        Ok(report)
    }

    /// Claim and run one deferred job
    pub async fn execute_deferred_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<JobRun, EngineError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(SchedulingError::JobNotFound(job_id))?;

        if !job.is_ready(now) || !self.store.claim_job(job_id).await? {
            return Ok(JobRun::NotClaimed);
        }

        match self.run_claimed_job(&job).await {
            Ok(JobRun::Completed) => {
                self.store.complete_job(job_id).await?;
                Ok(JobRun::Completed)
            }
            Ok(run) => Ok(run),
            Err(e) => {
                tracing::warn!("⚠️ Deferred job {} failed: {}", job_id, e);
                self.store.fail_job(job_id, &e.to_string()).await?;
                Ok(JobRun::Failed)
            }
        }
    }

    async fn run_claimed_job(&self, job: &DeferredJob) -> Result<JobRun, SchedulingError> {
        let execution = self
            .store
            .get_execution(job.execution_id)
            .await?
            .ok_or(SchedulingError::ExecutionNotFound(job.execution_id))?;

        if execution.status.is_terminal() {
            self.store.discard_job(job.id).await?;
            tracing::debug!("🗑️ Job {} discarded, execution is '{}'", job.id, execution.status);
            return Ok(JobRun::Discarded);
        }
        if execution.status != ExecutionStatus::Running {
            self.store.release_job(job.id).await?;
            tracing::debug!("⏸️ Job {} released, execution is '{}'", job.id, execution.status);
            return Ok(JobRun::Released);
        }

        let resumed = self
            .resume_execution(ResumeExecution {
                execution_id: job.execution_id,
                step_id: job.step_id,
            })
            .await?;

        if resumed.status == ExecutionStatus::Failed {
            tracing::warn!("⚠️ Execution {} failed after resuming from job {}", resumed.id, job.id);
        }
        Ok(JobRun::Completed)
    }

    /// Operator recovery: put a failed job back on the schedule, due now
    pub async fn retry_job(&self, job_id: Uuid) -> Result<DeferredJob, EngineError> {
        if !self.store.reschedule_failed_job(job_id, Utc::now()).await? {
            let job = self
                .store
                .get_job(job_id)
                .await?
                .ok_or(SchedulingError::JobNotFound(job_id))?;
            return Err(SchedulingError::NotRetryable {
                job_id,
                status: job.status.to_string(),
            }
            .into());
        }

        tracing::info!("🔄 Rescheduled failed job {}", job_id);
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulingError::JobNotFound(job_id).into())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub async fn execution(&self, execution_id: Uuid) -> Result<Option<Execution>, EngineError> {
        Ok(self.store.get_execution(execution_id).await?)
    }

    pub async fn step_logs(&self, execution_id: Uuid) -> Result<Vec<StepExecutionLog>, EngineError> {
        Ok(self.store.logs_for(execution_id).await?)
    }

    pub async fn deferred_jobs(&self, execution_id: Uuid) -> Result<Vec<DeferredJob>, EngineError> {
        Ok(self.store.jobs_for(execution_id).await?)
    }

    pub async fn failed_executions(&self, limit: u32) -> Result<Vec<Execution>, EngineError> {
        Ok(self.store.executions_with_status(ExecutionStatus::Failed, limit).await?)
    }

    pub async fn executions_for_target(&self, target: &TargetRef) -> Result<Vec<Execution>, EngineError> {
        Ok(self.store.executions_for_target(target).await?)
    }

    pub async fn trigger_history(&self, workflow_id: Uuid, target: &TargetRef) -> Result<Vec<TrackerEntry>, EngineError> {
        Ok(self.tracker.history(workflow_id, target).await?)
    }

    pub async fn progress(&self, execution_id: Uuid) -> Result<ExecutionProgress, EngineError> {
        let execution = self.load(execution_id).await?;
        let workflow = self.registry.resolve(execution.workflow_id).await?;
        let total_steps = workflow.step_count();

        Ok(ExecutionProgress {
            execution_id,
            status: execution.status,
            current_step_position: execution.current_step_position,
            total_steps,
            percentage: execution.progress_percentage(total_steps),
        })
    }

    /// Compare-and-set a status change, or report the status that blocked it
    async fn transition(
        &self,
        execution_id: Uuid,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
        action: &'static str,
    ) -> Result<Execution, EngineError> {
        let moved = self
            .store
            .transition_execution(execution_id, from, to, None, Utc::now())
            .await?;
        let execution = self.load(execution_id).await?;
        if moved {
            Ok(execution)
        } else {
            Err(invalid(&execution, action))
        }
    }

    async fn load(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.store
            .get_execution(execution_id)
            .await
            .map_err(EngineError::from)?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }
}

fn invalid(execution: &Execution, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        from: execution.status.to_string(),
        action,
    }
}

/// Caller context plus the identifiers every template can rely on
fn snapshot_context(
    mut context: Map<String, Value>,
    workflow: &WorkflowDefinition,
    target: &TargetRef,
    trigger_key: &str,
) -> Map<String, Value> {
    context.insert("target_type".to_string(), json!(target.target_type));
    context.insert("target_id".to_string(), json!(target.target_id));
    context.insert("workflow_name".to_string(), json!(workflow.name));
    context.insert("trigger_key".to_string(), json!(trigger_key));
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_report_keeps_errors_apart_from_failed_jobs() {
        let mut report = SweepReport::default();
        report.record(&Ok(JobRun::Completed));
        report.record(&Ok(JobRun::Failed));
        report.record(&Ok(JobRun::Released));
        report.record(&Ok(JobRun::NotClaimed));
        report.record(&Err(EngineError::ExecutionNotFound(Uuid::new_v4())));

        assert_eq!(
            report,
            SweepReport {
                claimed: 3,
                completed: 1,
                failed: 1,
                skipped: 2,
                errors: 1,
            }
        );
    }
}
