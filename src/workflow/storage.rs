/// SQLite persistence layer for workflow definitions
///
/// A definition is one `workflow_definitions` row plus one `step_definitions`
/// row per step. Saves replace the step set inside a single transaction, and
/// `UNIQUE (workflow_id, position)` backs the in-memory ordering validation.

use crate::{
    error::{EngineError, StorageError},
    store::{format_ts, parse_id, Database},
    workflow::types::{StepConfig, StepDefinition, TriggerSpec, WorkflowDefinition},
};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

/// SQLite-based workflow definition storage
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: Uuid,
    pub name: String,
    pub trigger_type: String,
    pub active: bool,
    pub step_count: i64,
    pub updated_at: String,
}

impl WorkflowStorage {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }

    /// Store a new workflow or replace an existing one
    ///
    /// The definition is already validated by construction, so anything failing
    /// here is a storage problem.
    pub async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StorageError> {
        let now = format_ts(Utc::now());
        let conditions = serde_json::to_string(&workflow.trigger.conditions())?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, trigger_type, trigger_conditions, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                trigger_type = excluded.trigger_type,
                trigger_conditions = excluded.trigger_conditions,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.trigger.trigger_type().as_str())
        .bind(&conditions)
        .bind(workflow.active)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM step_definitions WHERE workflow_id = ?")
            .bind(workflow.id.to_string())
            .execute(&mut *tx)
            .await?;

        for step in workflow.steps() {
            let configuration = serde_json::to_string(&step.config.configuration())?;
            sqlx::query(
                r#"
                INSERT INTO step_definitions (id, workflow_id, step_type, position, configuration)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(step.id.to_string())
            .bind(workflow.id.to_string())
            .bind(step.step_type().as_str())
            .bind(step.position)
            .bind(&configuration)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            "💾 Saved workflow '{}' ({}) with {} steps",
            workflow.name,
            workflow.id,
            workflow.step_count()
        );
        Ok(())
    }

    /// Retrieve a workflow by ID
    ///
    /// Stored rows are re-validated; a row that no longer validates is reported
    /// as a definition error rather than silently loaded.
    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, EngineError> {
        let row = sqlx::query(
            "SELECT id, name, trigger_type, trigger_conditions, active FROM workflow_definitions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    /// Load all workflows (active and inactive)
    pub async fn load_all_workflows(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, name, trigger_type, trigger_conditions, active FROM workflow_definitions ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            workflows.push(self.hydrate(row).await?);
        }
        Ok(workflows)
    }

    /// List all workflows with basic metadata
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.name, w.trigger_type, w.active, w.updated_at,
                   (SELECT COUNT(*) FROM step_definitions s WHERE s.workflow_id = w.id) AS step_count
            FROM workflow_definitions w
            ORDER BY w.updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            workflows.push(WorkflowMetadata {
                id: parse_id("workflow_definitions", &id)?,
                name: row.try_get("name")?,
                trigger_type: row.try_get("trigger_type")?,
                active: row.try_get("active")?,
                step_count: row.try_get("step_count")?,
                updated_at: row.try_get("updated_at")?,
            });
        }

        Ok(workflows)
    }

    /// Activate or deactivate a workflow; returns false if it does not exist
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE workflow_definitions SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(format_ts(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a workflow and its steps
    pub async fn delete_workflow(&self, id: Uuid) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn hydrate(&self, row: sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, EngineError> {
        let raw_id: String = row.try_get("id").map_err(StorageError::from)?;
        let id = parse_id("workflow_definitions", &raw_id)?;
        let name: String = row.try_get("name").map_err(StorageError::from)?;
        let trigger_type: String = row.try_get("trigger_type").map_err(StorageError::from)?;
        let conditions_json: String = row.try_get("trigger_conditions").map_err(StorageError::from)?;
        let active: bool = row.try_get("active").map_err(StorageError::from)?;

        let conditions: Map<String, Value> =
            serde_json::from_str(&conditions_json).map_err(StorageError::from)?;
        let trigger = TriggerSpec::from_conditions(&trigger_type, &conditions)?;

        let step_rows = sqlx::query(
            "SELECT id, step_type, position, configuration FROM step_definitions WHERE workflow_id = ? ORDER BY position",
        )
        .bind(&raw_id)
        .fetch_all(&self.pool)
        .await?;

        let mut steps = Vec::with_capacity(step_rows.len());
        for step_row in step_rows {
            let step_id: String = step_row.try_get("id").map_err(StorageError::from)?;
            let step_type: String = step_row.try_get("step_type").map_err(StorageError::from)?;
            let position: i64 = step_row.try_get("position").map_err(StorageError::from)?;
            let configuration_json: String = step_row.try_get("configuration").map_err(StorageError::from)?;
            let configuration: Map<String, Value> =
                serde_json::from_str(&configuration_json).map_err(StorageError::from)?;

            steps.push(StepDefinition {
                id: parse_id("step_definitions", &step_id)?,
                workflow_id: id,
                position,
                config: StepConfig::from_configuration(&step_type, position, &configuration)?,
            });
        }

        Ok(WorkflowDefinition::from_parts(id, name, trigger, active, steps)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::DelayUnit;

    async fn storage() -> (tempfile::TempDir, WorkflowStorage) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("defs.db"), 1).await.unwrap();
        (dir, WorkflowStorage::new(&db))
    }

    fn reminder() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "approval follow-up",
            TriggerSpec::StatusChanged {
                from_status: None,
                to_status: "approved".to_string(),
            },
            vec![
                StepConfig::send_email("approved", "{{ borrower_email }}"),
                StepConfig::delay(3, DelayUnit::Days),
                StepConfig::update_status("status", "closing"),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (_dir, storage) = storage().await;
        let workflow = reminder();

        storage.save_workflow(&workflow).await.unwrap();
        let loaded = storage.get_workflow(workflow.id).await.unwrap().unwrap();

        assert_eq!(loaded, workflow);
        assert!(storage.get_workflow(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_steps() {
        let (_dir, storage) = storage().await;
        let workflow = reminder();
        storage.save_workflow(&workflow).await.unwrap();

        let shorter = WorkflowDefinition::from_parts(
            workflow.id,
            workflow.name.clone(),
            workflow.trigger.clone(),
            true,
            workflow.steps()[..1].to_vec(),
        )
        .unwrap();
        storage.save_workflow(&shorter).await.unwrap();

        let listed = storage.list_workflows().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].step_count, 1);
    }

    #[tokio::test]
    async fn toggle_and_delete() {
        let (_dir, storage) = storage().await;
        let workflow = reminder();
        storage.save_workflow(&workflow).await.unwrap();

        assert!(storage.set_active(workflow.id, false).await.unwrap());
        assert!(!storage.get_workflow(workflow.id).await.unwrap().unwrap().active);

        assert!(storage.delete_workflow(workflow.id).await.unwrap());
        assert!(!storage.delete_workflow(workflow.id).await.unwrap());
        assert!(storage.load_all_workflows().await.unwrap().is_empty());
    }
}
