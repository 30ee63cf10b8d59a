/// SQLite persistence for executions, step logs and deferred jobs

use crate::{
    error::StorageError,
    execution::{
        tracker::insert_tracker_entry,
        types::{DeferredJob, Execution, ExecutionStatus, JobStatus, RecordOutcome, StepExecutionLog, StepLogStatus},
    },
    store::{format_ts, parse_id, parse_opt_ts, parse_ts, Database},
    targets::TargetRef,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Executor, Row, Sqlite,
};
use uuid::Uuid;

const EXECUTION_COLUMNS: &str = "id, workflow_id, target_type, target_id, trigger_key, status, \
     current_step_position, context, last_error, created_at, started_at, completed_at";

const LOG_COLUMNS: &str =
    "id, execution_id, step_id, step_position, step_type, status, started_at, finished_at, result, error";

const JOB_COLUMNS: &str =
    "id, execution_id, step_id, scheduled_for, status, attempts, last_error, created_at, updated_at";

/// Runtime state storage
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    // ---- executions ----

    pub async fn insert_execution(&self, execution: &Execution) -> Result<(), StorageError> {
        insert_execution_row(&self.pool, execution).await
    }

    /// Record the trigger and create its execution in one transaction
    ///
    /// When the run-once key is already taken nothing is written.
    pub async fn insert_triggered_execution(
        &self,
        execution: &Execution,
        trigger_type: &str,
        run_once: bool,
    ) -> Result<RecordOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let outcome = insert_tracker_entry(
            &mut *tx,
            execution.workflow_id,
            &execution.target,
            trigger_type,
            &execution.trigger_key,
            run_once,
        )
        .await?;
        if outcome == RecordOutcome::AlreadyPresent {
            tx.rollback().await?;
            return Ok(outcome);
        }

        insert_execution_row(&mut *tx, execution).await?;
        tx.commit().await?;

        Ok(outcome)
    }

    /// Compare-and-set status change
    ///
    /// Returns false when the row is no longer in one of `from`. Entering
    /// `running` stamps `started_at` once; entering a terminal status stamps
    /// `completed_at`. The cursor is never touched here.
    pub async fn transition_execution(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
        last_error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE executions \
             SET status = ?, \
                 last_error = COALESCE(?, last_error), \
                 started_at = CASE WHEN ? THEN COALESCE(started_at, ?) ELSE started_at END, \
                 completed_at = CASE WHEN ? THEN ? ELSE completed_at END \
             WHERE id = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(last_error)
            .bind(to == ExecutionStatus::Running)
            .bind(format_ts(at))
            .bind(to.is_terminal())
            .bind(format_ts(at))
            .bind(id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move the step cursor forward without touching the status
    ///
    /// Returns false when the stored cursor is already past `position`.
    pub async fn set_cursor(&self, id: Uuid, position: i64) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE executions SET current_step_position = ? WHERE id = ? AND current_step_position <= ?",
        )
        .bind(position)
        .bind(id.to_string())
        .bind(position)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, StorageError> {
        let row = sqlx::query(&format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| execution_from_row(&r)).transpose()
    }

    /// Most recent executions in a status, newest first
    pub async fn executions_with_status(
        &self,
        status: ExecutionStatus,
        limit: u32,
    ) -> Result<Vec<Execution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE status = ? ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    pub async fn executions_for_target(&self, target: &TargetRef) -> Result<Vec<Execution>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE target_type = ? AND target_id = ? ORDER BY created_at"
        ))
        .bind(&target.target_type)
        .bind(&target.target_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    // ---- step logs ----

    pub async fn insert_log(&self, log: &StepExecutionLog) -> Result<(), StorageError> {
        let result = log.result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(&format!(
            "INSERT INTO step_execution_logs ({LOG_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(log.id.to_string())
        .bind(log.execution_id.to_string())
        .bind(log.step_id.to_string())
        .bind(log.step_position)
        .bind(&log.step_type)
        .bind(log.status.as_str())
        .bind(format_ts(log.started_at))
        .bind(log.finished_at.map(format_ts))
        .bind(result)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record the outcome of a step attempt
    pub async fn finish_log(&self, log: &StepExecutionLog) -> Result<(), StorageError> {
        let result = log.result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            "UPDATE step_execution_logs SET status = ?, finished_at = ?, result = ?, error = ? WHERE id = ?",
        )
        .bind(log.status.as_str())
        .bind(log.finished_at.map(format_ts))
        .bind(result)
        .bind(&log.error)
        .bind(log.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Audit trail of an execution in attempt order
    pub async fn logs_for(&self, execution_id: Uuid) -> Result<Vec<StepExecutionLog>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM step_execution_logs WHERE execution_id = ? ORDER BY started_at, rowid"
        ))
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(log_from_row).collect()
    }

    // ---- deferred jobs ----

    pub async fn insert_job(&self, job: &DeferredJob) -> Result<(), StorageError> {
        sqlx::query(&format!(
            "INSERT INTO deferred_jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.id.to_string())
        .bind(job.execution_id.to_string())
        .bind(job.step_id.map(|id| id.to_string()))
        .bind(format_ts(job.scheduled_for))
        .bind(job.status.as_str())
        .bind(job.attempts)
        .bind(&job.last_error)
        .bind(format_ts(job.created_at))
        .bind(format_ts(job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<DeferredJob>, StorageError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM deferred_jobs WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    pub async fn jobs_for(&self, execution_id: Uuid) -> Result<Vec<DeferredJob>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM deferred_jobs WHERE execution_id = ? ORDER BY created_at, rowid"
        ))
        .bind(execution_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Scheduled jobs due at `now`, oldest first
    ///
    /// Jobs of paused executions stay scheduled but are left out, so they
    /// never crowd runnable jobs out of a batch.
    pub async fn ready_jobs(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DeferredJob>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM deferred_jobs \
             WHERE status = 'scheduled' AND scheduled_for <= ? \
               AND execution_id NOT IN \
                   (SELECT id FROM executions WHERE status IN ('paused', 'processing')) \
             ORDER BY scheduled_for, rowid LIMIT ?"
        ))
        .bind(format_ts(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// scheduled -> processing; false when another sweep got there first
    pub async fn claim_job(&self, id: Uuid) -> Result<bool, StorageError> {
        self.transition_job(id, JobStatus::Scheduled, JobStatus::Processing).await
    }

    /// processing -> scheduled, leaving the job for a later sweep
    pub async fn release_job(&self, id: Uuid) -> Result<bool, StorageError> {
        self.transition_job(id, JobStatus::Processing, JobStatus::Scheduled).await
    }

    pub async fn complete_job(&self, id: Uuid) -> Result<bool, StorageError> {
        self.transition_job(id, JobStatus::Processing, JobStatus::Completed).await
    }

    /// processing -> cancelled (owning execution already finished)
    pub async fn discard_job(&self, id: Uuid) -> Result<bool, StorageError> {
        self.transition_job(id, JobStatus::Processing, JobStatus::Cancelled).await
    }

    /// processing -> failed, counting the attempt
    pub async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE deferred_jobs
            SET status = 'failed', attempts = attempts + 1, last_error = ?, updated_at = ?
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(error)
        .bind(format_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// failed -> scheduled, due at `at`
    pub async fn reschedule_failed_job(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE deferred_jobs
            SET status = 'scheduled', scheduled_for = ?, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(format_ts(at))
        .bind(format_ts(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel every still-scheduled job of an execution; returns how many
    pub async fn cancel_scheduled_jobs(&self, execution_id: Uuid) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE deferred_jobs SET status = 'cancelled', updated_at = ? WHERE execution_id = ? AND status = 'scheduled'",
        )
        .bind(format_ts(Utc::now()))
        .bind(execution_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Whether the execution has a scheduled or processing job
    pub async fn has_active_job(&self, execution_id: Uuid) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM deferred_jobs WHERE execution_id = ? AND status IN ('scheduled', 'processing')",
        )
        .bind(execution_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn transition_job(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE deferred_jobs SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(format_ts(Utc::now()))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

async fn insert_execution_row<'e, E>(executor: E, execution: &Execution) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO executions ({EXECUTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(execution.id.to_string())
    .bind(execution.workflow_id.to_string())
    .bind(&execution.target.target_type)
    .bind(&execution.target.target_id)
    .bind(&execution.trigger_key)
    .bind(execution.status.as_str())
    .bind(execution.current_step_position)
    .bind(serde_json::to_string(&execution.context)?)
    .bind(&execution.last_error)
    .bind(format_ts(execution.created_at))
    .bind(execution.started_at.map(format_ts))
    .bind(execution.completed_at.map(format_ts))
    .execute(executor)
    .await?;

    Ok(())
}

fn execution_from_row(row: &SqliteRow) -> Result<Execution, StorageError> {
    const TABLE: &str = "executions";

    let status: String = row.try_get("status")?;
    let context: String = row.try_get("context")?;
    let context: Map<String, Value> = serde_json::from_str(&context)?;

    Ok(Execution {
        id: parse_id(TABLE, &row.try_get::<String, _>("id")?)?,
        workflow_id: parse_id(TABLE, &row.try_get::<String, _>("workflow_id")?)?,
        target: TargetRef::new(
            row.try_get::<String, _>("target_type")?,
            row.try_get::<String, _>("target_id")?,
        ),
        trigger_key: row.try_get("trigger_key")?,
        status: ExecutionStatus::parse(&status).ok_or_else(|| StorageError::CorruptRow {
            table: TABLE,
            reason: format!("unknown execution status '{status}'"),
        })?,
        current_step_position: row.try_get("current_step_position")?,
        context,
        last_error: row.try_get("last_error")?,
        created_at: parse_ts(TABLE, &row.try_get::<String, _>("created_at")?)?,
        started_at: parse_opt_ts(TABLE, row.try_get("started_at")?)?,
        completed_at: parse_opt_ts(TABLE, row.try_get("completed_at")?)?,
    })
}

fn log_from_row(row: &SqliteRow) -> Result<StepExecutionLog, StorageError> {
    const TABLE: &str = "step_execution_logs";

    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;

    Ok(StepExecutionLog {
        id: parse_id(TABLE, &row.try_get::<String, _>("id")?)?,
        execution_id: parse_id(TABLE, &row.try_get::<String, _>("execution_id")?)?,
        step_id: parse_id(TABLE, &row.try_get::<String, _>("step_id")?)?,
        step_position: row.try_get("step_position")?,
        step_type: row.try_get("step_type")?,
        status: StepLogStatus::parse(&status).ok_or_else(|| StorageError::CorruptRow {
            table: TABLE,
            reason: format!("unknown step log status '{status}'"),
        })?,
        started_at: parse_ts(TABLE, &row.try_get::<String, _>("started_at")?)?,
        finished_at: parse_opt_ts(TABLE, row.try_get("finished_at")?)?,
        result: result.map(|r| serde_json::from_str(&r)).transpose()?,
        error: row.try_get("error")?,
    })
}

fn job_from_row(row: &SqliteRow) -> Result<DeferredJob, StorageError> {
    const TABLE: &str = "deferred_jobs";

    let status: String = row.try_get("status")?;
    let step_id: Option<String> = row.try_get("step_id")?;

    Ok(DeferredJob {
        id: parse_id(TABLE, &row.try_get::<String, _>("id")?)?,
        execution_id: parse_id(TABLE, &row.try_get::<String, _>("execution_id")?)?,
        step_id: step_id.map(|s| parse_id(TABLE, &s)).transpose()?,
        scheduled_for: parse_ts(TABLE, &row.try_get::<String, _>("scheduled_for")?)?,
        status: JobStatus::parse(&status).ok_or_else(|| StorageError::CorruptRow {
            table: TABLE,
            reason: format!("unknown job status '{status}'"),
        })?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: parse_ts(TABLE, &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_ts(TABLE, &row.try_get::<String, _>("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> (tempfile::TempDir, ExecutionStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("runtime.db"), 1).await.unwrap();
        (dir, ExecutionStore::new(&db))
    }

    async fn running_execution(store: &ExecutionStore) -> Execution {
        let mut context = Map::new();
        context.insert("borrower".into(), serde_json::json!({ "name": "Ada" }));
        let mut execution = Execution::new(
            Uuid::new_v4(),
            TargetRef::new("loan_application", "42"),
            "status_changed_to_approved".into(),
            context,
        );
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        store.insert_execution(&execution).await.unwrap();
        execution
    }

    #[tokio::test]
    async fn execution_round_trip_and_update() {
        let (_dir, store) = store().await;
        let execution = running_execution(&store).await;

        let loaded = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.target, execution.target);
        assert_eq!(loaded.context, execution.context);
        assert_eq!(loaded.status, ExecutionStatus::Running);

        assert!(store.set_cursor(execution.id, 2).await.unwrap());
        assert!(!store.set_cursor(execution.id, 1).await.unwrap(), "cursor never moves back");
        assert!(store
            .transition_execution(execution.id, &[ExecutionStatus::Running], ExecutionStatus::Failed, Some("boom"), Utc::now())
            .await
            .unwrap());

        let failed = store.executions_with_status(ExecutionStatus::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].current_step_position, 2);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
        assert!(failed[0].completed_at.is_some());
        assert_eq!(store.executions_for_target(&execution.target).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_status_is_not_overwritten() {
        let (_dir, store) = store().await;
        let execution = running_execution(&store).await;

        let cancellable = [ExecutionStatus::Pending, ExecutionStatus::Running, ExecutionStatus::Paused];
        assert!(store
            .transition_execution(execution.id, &cancellable, ExecutionStatus::Cancelled, None, Utc::now())
            .await
            .unwrap());

        let late_failure = store
            .transition_execution(execution.id, &[ExecutionStatus::Running], ExecutionStatus::Failed, Some("late"), Utc::now())
            .await
            .unwrap();
        assert!(!late_failure);

        let stored = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
        assert_eq!(stored.last_error, None);
    }

    #[tokio::test]
    async fn triggered_insert_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("runtime.db"), 1).await.unwrap();
        let store = ExecutionStore::new(&db);
        let tracker = crate::execution::ExecutionTracker::new(&db);

        let execution = Execution::new(Uuid::new_v4(), TargetRef::new("loan_application", "9"), "kickoff".into(), Map::new());
        let outcome = store.insert_triggered_execution(&execution, "manual", true).await.unwrap();
        assert_eq!(outcome, RecordOutcome::Inserted);

        let again = Execution::new(execution.workflow_id, execution.target.clone(), "kickoff".into(), Map::new());
        let duplicate = store.insert_triggered_execution(&again, "manual", true).await.unwrap();
        assert_eq!(duplicate, RecordOutcome::AlreadyPresent);
        assert!(store.get_execution(again.id).await.unwrap().is_none());

        // Reusing an existing execution id fails the insert; the new key must not stay consumed.
        let mut clash = Execution::new(execution.workflow_id, execution.target.clone(), "second".into(), Map::new());
        clash.id = execution.id;
        assert!(store.insert_triggered_execution(&clash, "manual", true).await.is_err());
        assert!(!tracker
            .already_executed(execution.workflow_id, &execution.target, "second", true)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ready_jobs_skip_paused_executions() {
        let (_dir, store) = store().await;
        let paused = running_execution(&store).await;
        let running = running_execution(&store).await;
        let now = Utc::now();

        store
            .transition_execution(paused.id, &[ExecutionStatus::Running], ExecutionStatus::Paused, None, now)
            .await
            .unwrap();

        let held = DeferredJob::scheduled(paused.id, None, now - Duration::minutes(10));
        let due = DeferredJob::scheduled(running.id, None, now - Duration::minutes(1));
        store.insert_job(&held).await.unwrap();
        store.insert_job(&due).await.unwrap();

        let ready = store.ready_jobs(now, 1).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due.id);
        assert!(store.has_active_job(paused.id).await.unwrap());
    }

    #[tokio::test]
    async fn logs_are_kept_in_attempt_order() {
        let (_dir, store) = store().await;
        let execution = running_execution(&store).await;

        for position in 0..3 {
            let mut log = StepExecutionLog::running(execution.id, Uuid::new_v4(), position, "send_email");
            store.insert_log(&log).await.unwrap();
            log.status = StepLogStatus::Completed;
            log.finished_at = Some(Utc::now());
            log.result = Some(serde_json::json!({ "position": position }));
            store.finish_log(&log).await.unwrap();
        }

        let logs = store.logs_for(execution.id).await.unwrap();
        let positions: Vec<i64> = logs.iter().map(|l| l.step_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert!(logs.iter().all(|l| l.status == StepLogStatus::Completed));
        assert_eq!(logs[2].result, Some(serde_json::json!({ "position": 2 })));
    }

    #[tokio::test]
    async fn ready_jobs_and_claiming() {
        let (_dir, store) = store().await;
        let execution = running_execution(&store).await;
        let now = Utc::now();

        let due = DeferredJob::scheduled(execution.id, Some(Uuid::new_v4()), now - Duration::minutes(5));
        let later = DeferredJob::scheduled(execution.id, None, now + Duration::hours(1));
        store.insert_job(&due).await.unwrap();
        store.insert_job(&later).await.unwrap();

        let ready = store.ready_jobs(now, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, due.id);

        assert!(store.claim_job(due.id).await.unwrap());
        assert!(!store.claim_job(due.id).await.unwrap(), "second claim must lose");
        assert!(store.ready_jobs(now, 10).await.unwrap().is_empty());

        assert!(store.fail_job(due.id, "resume failed").await.unwrap());
        let failed = store.get_job(due.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 1);

        assert!(store.reschedule_failed_job(due.id, now).await.unwrap());
        assert_eq!(store.ready_jobs(now, 10).await.unwrap().len(), 1);
        assert!(store.ready_jobs(now + Duration::hours(2), 10).await.unwrap().len() == 2);
    }

    #[tokio::test]
    async fn cancel_only_touches_scheduled_jobs() {
        let (_dir, store) = store().await;
        let execution = running_execution(&store).await;

        let first = DeferredJob::scheduled(execution.id, None, Utc::now());
        let second = DeferredJob::scheduled(execution.id, None, Utc::now());
        store.insert_job(&first).await.unwrap();
        store.insert_job(&second).await.unwrap();
        store.claim_job(first.id).await.unwrap();
        store.complete_job(first.id).await.unwrap();

        assert!(store.has_active_job(execution.id).await.unwrap());
        assert_eq!(store.cancel_scheduled_jobs(execution.id).await.unwrap(), 1);
        assert!(!store.has_active_job(execution.id).await.unwrap());

        let statuses: Vec<JobStatus> = store
            .jobs_for(execution.id)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Completed, JobStatus::Cancelled]);
    }
}
