/// Idempotency ledger
///
/// A run-once (workflow, target, trigger_key) tuple is unique through the partial
/// index `idx_trackers_run_once`; that index is the only thing standing between
/// two concurrent evaluators and a duplicate execution.

use crate::{
    error::StorageError,
    execution::types::{RecordOutcome, TrackerEntry},
    store::{format_ts, parse_id, parse_ts, Database},
    targets::TargetRef,
};
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Executor, Row, Sqlite};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    pool: SqlitePool,
}

impl ExecutionTracker {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    /// True only for run-once keys that have already fired
    pub async fn already_executed(
        &self,
        workflow_id: Uuid,
        target: &TargetRef,
        trigger_key: &str,
        run_once: bool,
    ) -> Result<bool, StorageError> {
        if !run_once {
            return Ok(false);
        }

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM execution_trackers
            WHERE workflow_id = ? AND target_type = ? AND target_id = ? AND trigger_key = ? AND run_once = 1
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(&target.target_type)
        .bind(&target.target_id)
        .bind(trigger_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Insert-if-absent; a lost race reports `AlreadyPresent` instead of failing
    pub async fn record_execution(
        &self,
        workflow_id: Uuid,
        target: &TargetRef,
        trigger_type: &str,
        trigger_key: &str,
        run_once: bool,
    ) -> Result<RecordOutcome, StorageError> {
        insert_tracker_entry(&self.pool, workflow_id, target, trigger_type, trigger_key, run_once).await
    }

    pub async fn history(&self, workflow_id: Uuid, target: &TargetRef) -> Result<Vec<TrackerEntry>, StorageError> {
        const TABLE: &str = "execution_trackers";

        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, target_type, target_id, trigger_type, trigger_key, run_once, executed_at
            FROM execution_trackers
            WHERE workflow_id = ? AND target_type = ? AND target_id = ?
            ORDER BY executed_at, rowid
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(&target.target_type)
        .bind(&target.target_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TrackerEntry {
                    id: parse_id(TABLE, &row.try_get::<String, _>("id")?)?,
                    workflow_id: parse_id(TABLE, &row.try_get::<String, _>("workflow_id")?)?,
                    target: TargetRef::new(
                        row.try_get::<String, _>("target_type")?,
                        row.try_get::<String, _>("target_id")?,
                    ),
                    trigger_type: row.try_get("trigger_type")?,
                    trigger_key: row.try_get("trigger_key")?,
                    run_once: row.try_get("run_once")?,
                    executed_at: parse_ts(TABLE, &row.try_get::<String, _>("executed_at")?)?,
                })
            })
            .collect()
    }
}

/// Shared by `record_execution` and the transactional trigger insert
pub(crate) async fn insert_tracker_entry<'e, E>(
    executor: E,
    workflow_id: Uuid,
    target: &TargetRef,
    trigger_type: &str,
    trigger_key: &str,
    run_once: bool,
) -> Result<RecordOutcome, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO execution_trackers
            (id, workflow_id, target_type, target_id, trigger_type, trigger_key, run_once, executed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(workflow_id.to_string())
    .bind(&target.target_type)
    .bind(&target.target_id)
    .bind(trigger_type)
    .bind(trigger_key)
    .bind(run_once)
    .bind(format_ts(Utc::now()))
    .execute(executor)
    .await?;

    if result.rows_affected() == 1 {
        Ok(RecordOutcome::Inserted)
    } else {
        tracing::debug!(
            "Tracker row for workflow {} / {} / '{}' already present",
            workflow_id,
            target,
            trigger_key
        );
        Ok(RecordOutcome::AlreadyPresent)
    }
}
