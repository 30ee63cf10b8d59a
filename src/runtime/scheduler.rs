/// Background sweep service
///
/// Registers one tokio-cron-scheduler job that resumes due deferred jobs on a
/// fixed cadence. A delay step's "wait" is only a future-dated row; this tick
/// is what eventually picks it up.

use crate::runtime::engine::WorkflowEngine;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct SweepService {
    scheduler: Arc<RwLock<JobScheduler>>,
    engine: Arc<WorkflowEngine>,
    schedule: String,
    /// Scheduler job id while running
    job_id: RwLock<Option<Uuid>>,
    /// Serialises ticks so a slow sweep is not overlapped by the next one
    tick_lock: Arc<Mutex<()>>,
}

impl SweepService {
    /// Create the service; nothing runs until `start`
    pub async fn new(engine: Arc<WorkflowEngine>, schedule: &str) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            engine,
            schedule: schedule.to_string(),
            job_id: RwLock::new(None),
            tick_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Register the sweep job and start the scheduler
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting sweep service ({})", self.schedule);

        let engine = Arc::clone(&self.engine);
        let tick_lock = Arc::clone(&self.tick_lock);

        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let engine = Arc::clone(&engine);
            let tick_lock = Arc::clone(&tick_lock);

            Box::pin(async move {
                let Ok(_guard) = tick_lock.try_lock() else {
                    tracing::debug!("⏭️ Previous sweep still running, skipping tick");
                    return;
                };

                tracing::debug!("🔔 Sweep tick");
                if let Err(e) = engine.process_ready_jobs(Utc::now()).await {
                    tracing::error!("❌ Sweep failed: {}", e);
                }
            })
        })?;

        {
            let scheduler = self.scheduler.write().await;
            let id = scheduler.add(job).await?;
            *self.job_id.write().await = Some(id);
            scheduler.start().await?;
        }

        tracing::info!("✅ Sweep service started");
        Ok(())
    }

    /// Remove the sweep job and shut the scheduler down
    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping sweep service");

        if let Some(id) = self.job_id.write().await.take() {
            let scheduler = self.scheduler.read().await;
            if let Err(e) = scheduler.remove(&id).await {
                tracing::warn!("⚠️ Failed to remove sweep job {}: {}", id, e);
            }
        }

        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Sweep service stopped");
        Ok(())
    }

    /// Run one sweep immediately, outside the cron cadence
    pub async fn run_once(&self) -> Result<crate::runtime::engine::SweepReport> {
        let _guard = self.tick_lock.lock().await;
        Ok(self.engine.process_ready_jobs(Utc::now()).await?)
    }

    pub fn schedule(&self) -> &str {
        &self.schedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        execution::{DeferredJob, Execution, ExecutionStatus, ExecutionStore},
        notify::MessageTemplate,
        service::{create_app, App},
        targets::{TargetRef, TargetRegistry},
        workflow::types::{DelayUnit, StepConfig, TriggerSpec, WorkflowDefinition},
    };
    use chrono::Duration;
    use serde_json::Map;

    async fn app(dir: &tempfile::TempDir) -> App {
        let mut config = Config::default();
        config.database.url = format!("sqlite://{}", dir.path().join("sweep.db").display());
        config.mail.relay_url = None;
        config.sweep.schedule = "*/1 * * * * *".to_string();
        create_app(&config, TargetRegistry::new()).await.unwrap()
    }

    #[tokio::test]
    async fn run_once_resumes_due_job() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        app.templates
            .upsert(&MessageTemplate::new("nudge", "Reminder", "Still waiting on your documents."))
            .await
            .unwrap();

        let workflow = WorkflowDefinition::new(
            "nudge later",
            TriggerSpec::Manual,
            vec![StepConfig::delay(1, DelayUnit::Hours), StepConfig::send_email("nudge", "ops@lendflow.test")],
        )
        .unwrap();
        app.registry.publish(workflow.clone()).await.unwrap();

        let store = ExecutionStore::new(&app.database);
        let mut execution = Execution::new(workflow.id, TargetRef::new("loan_application", "1"), "manual".into(), Map::new());
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        store.insert_execution(&execution).await.unwrap();
        store
            .insert_job(&DeferredJob::scheduled(
                execution.id,
                Some(workflow.steps()[1].id),
                Utc::now() - Duration::minutes(1),
            ))
            .await
            .unwrap();

        let report = app.sweep.run_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        let finished = store.get_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);

        let idle = app.sweep.run_once().await.unwrap();
        assert_eq!(idle, Default::default());
    }

    #[tokio::test]
    async fn start_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(&dir).await;
        assert_eq!(app.sweep.schedule(), "*/1 * * * * *");

        app.sweep.start().await.unwrap();
        assert!(app.sweep.job_id.read().await.is_some());

        app.sweep.stop().await.unwrap();
        assert!(app.sweep.job_id.read().await.is_none());
    }
}
