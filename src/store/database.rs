/// SQLite database handle and schema for the workflow engine
///
/// One pool serves definitions, executions, logs, deferred jobs, the idempotency
/// ledger and message templates. WAL mode lets the sweep read while triggers write.

use crate::error::StorageError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Shared connection pool with the engine schema applied
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the given sqlx URL and make sure the schema exists
    ///
    /// Creates the database file if missing. Safe to call on an existing database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        tracing::info!("🗄️ Opening workflow database: {}", url);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        tracing::info!("✅ Workflow database ready");
        Ok(db)
    }

    /// Open a database file by path
    pub async fn open_file(path: &Path, max_connections: u32) -> Result<Self, StorageError> {
        Self::connect(&format!("sqlite://{}", path.display()), max_connections).await
    }

    /// Underlying pool, for adapters that keep their tables next to the engine's
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create every engine table and index (uses IF NOT EXISTS)
    async fn init_schema(&self) -> Result<(), StorageError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_conditions JSON NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS step_definitions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflow_definitions(id) ON DELETE CASCADE,
                step_type TEXT NOT NULL,
                position INTEGER NOT NULL,
                configuration JSON NOT NULL,
                UNIQUE (workflow_id, position)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                trigger_key TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step_position INTEGER NOT NULL DEFAULT 0,
                context JSON NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS step_execution_logs (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                step_id TEXT NOT NULL,
                step_position INTEGER NOT NULL,
                step_type TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                result JSON,
                error TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deferred_jobs (
                id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
                step_id TEXT,
                scheduled_for TEXT NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS execution_trackers (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                target_type TEXT NOT NULL,
                target_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                trigger_key TEXT NOT NULL,
                run_once INTEGER NOT NULL,
                executed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS message_templates (
                key TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            // The sole idempotency guarantee for run-once triggers
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_trackers_run_once
            ON execution_trackers(workflow_id, target_type, target_id, trigger_key)
            WHERE run_once = 1
            "#,
            "CREATE INDEX IF NOT EXISTS idx_jobs_ready ON deferred_jobs(status, scheduled_for)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_execution ON deferred_jobs(execution_id)",
            "CREATE INDEX IF NOT EXISTS idx_logs_execution ON step_execution_logs(execution_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status)",
            "CREATE INDEX IF NOT EXISTS idx_definitions_trigger ON workflow_definitions(trigger_type)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("schema.db"), 1).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "deferred_jobs",
                "execution_trackers",
                "executions",
                "message_templates",
                "step_definitions",
                "step_execution_logs",
                "workflow_definitions",
            ]
        );
    }

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.db");
        Database::open_file(&path, 1).await.unwrap();
        let db = Database::open_file(&path, 1).await.unwrap();
        db.init_schema().await.unwrap();
    }
}
