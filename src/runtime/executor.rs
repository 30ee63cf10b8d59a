/// Step execution handlers
///
/// One handler per step type, all behind the same contract: given the
/// execution and the step, either produce a `StepOutcome` for the log or a
/// `StepError` that fails the execution.
///
/// - send_email: template lookup, context rendering, mail hand-off
/// - delay: persists a DeferredJob and returns immediately
/// - condition: reads live target state, records a boolean
/// - update_status: writes one field on the target
/// - webhook / wait_for_event: declared but not executable

use crate::{
    error::StepError,
    execution::{types::DeferredJob, ExecutionStore, Execution},
    notify::{render, Mailer, OutgoingEmail, TemplateStore},
    targets::{TargetAdapter, TargetRegistry},
    workflow::types::{Condition, DelayConfig, SendEmailConfig, StepConfig, StepDefinition, UpdateStatusConfig},
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Result of a successful step, stored on its StepExecutionLog
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Short human-readable summary
    pub message: String,
    /// Structured payload (condition results, scheduled job ids, ...)
    pub result: Value,
}

/// Dispatches steps to their handlers
///
/// Holds the collaborators the handlers need: template storage, the mail
/// dispatcher, the target adapters, and the job store for delay steps.
pub struct StepExecutor {
    templates: TemplateStore,
    mailer: Arc<dyn Mailer>,
    targets: TargetRegistry,
    store: ExecutionStore,
    mail_from: String,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor")
            .field("targets", &self.targets)
            .field("mail_from", &self.mail_from)
            .finish_non_exhaustive()
    }
}

impl StepExecutor {
    pub fn new(
        templates: TemplateStore,
        mailer: Arc<dyn Mailer>,
        targets: TargetRegistry,
        store: ExecutionStore,
        mail_from: &str,
    ) -> Self {
        Self {
            templates,
            mailer,
            targets,
            store,
            mail_from: mail_from.to_string(),
        }
    }

    /// Execute one step of an execution
    ///
    /// `next_step` is the step a delay should resume at (None when the delay
    /// is the last step of the workflow).
    pub async fn execute_step(
        &self,
        execution: &Execution,
        step: &StepDefinition,
        next_step: Option<Uuid>,
    ) -> Result<StepOutcome, StepError> {
        tracing::debug!(
            "🚀 Executing step {} ({}) for execution {}",
            step.position,
            step.step_type(),
            execution.id
        );

        match &step.config {
            StepConfig::SendEmail(config) => self.send_email(execution, config).await,
            StepConfig::Delay(config) => self.schedule_delay(execution, config, next_step).await,
            StepConfig::Condition(condition) => self.evaluate_condition(execution, condition).await,
            StepConfig::UpdateStatus(config) => self.update_status(execution, config).await,
            StepConfig::Webhook(_) | StepConfig::WaitForEvent(_) => {
                tracing::warn!("⚠️ Step type '{}' cannot be executed", step.step_type());
                Err(StepError::Unsupported(step.step_type().to_string()))
            }
        }
    }

    async fn send_email(&self, execution: &Execution, config: &SendEmailConfig) -> Result<StepOutcome, StepError> {
        let template = self
            .templates
            .get(&config.template)
            .await?
            .ok_or_else(|| StepError::TemplateNotFound(config.template.clone()))?;

        let email = OutgoingEmail {
            from: self.mail_from.clone(),
            to: render(&config.to, &execution.context)?,
            subject: render(&template.subject, &execution.context)?,
            body: render(&template.body, &execution.context)?,
        };

        self.mailer.send(&email).await?;
        tracing::info!("📧 Sent '{}' to {} for execution {}", template.key, email.to, execution.id);

        Ok(StepOutcome {
            message: format!("sent '{}' to {}", template.key, email.to),
            result: json!({
                "template": template.key,
                "to": email.to,
                "subject": email.subject,
            }),
        })
    }

    /// The execution's cursor is left alone; only the job's run moves it.
    async fn schedule_delay(
        &self,
        execution: &Execution,
        config: &DelayConfig,
        next_step: Option<Uuid>,
    ) -> Result<StepOutcome, StepError> {
        let scheduled_for = Some(config)
            .filter(|c| c.within_limit())
            .and_then(|c| Utc::now().checked_add_signed(c.duration()))
            .ok_or_else(|| StepError::DelayOutOfRange(format!("{} {}", config.amount, config.unit.as_str())))?;
        let job = DeferredJob::scheduled(execution.id, next_step, scheduled_for);
        self.store.insert_job(&job).await?;

        tracing::info!(
            "⏳ Execution {} parked for {} {} (job {})",
            execution.id,
            config.amount,
            config.unit.as_str(),
            job.id
        );

        Ok(StepOutcome {
            message: format!("resumes at {}", scheduled_for.to_rfc3339()),
            result: json!({
                "job_id": job.id,
                "scheduled_for": scheduled_for.to_rfc3339(),
            }),
        })
    }

    /// Recorded only; the outcome never changes which step runs next
    async fn evaluate_condition(&self, execution: &Execution, condition: &Condition) -> Result<StepOutcome, StepError> {
        let adapter = self.adapter_for(execution)?;
        let current = adapter
            .read_field(&execution.target.target_id, condition.field())
            .await?;
        let outcome = condition.evaluate(current.as_ref());

        tracing::debug!(
            "🔍 Condition {} on {}.{} = {}",
            condition.condition_type(),
            execution.target,
            condition.field(),
            outcome
        );

        Ok(StepOutcome {
            message: format!("{} on '{}' is {}", condition.condition_type(), condition.field(), outcome),
            result: json!({
                "condition_type": condition.condition_type(),
                "field": condition.field(),
                "actual": current,
                "result": outcome,
            }),
        })
    }

    async fn update_status(&self, execution: &Execution, config: &UpdateStatusConfig) -> Result<StepOutcome, StepError> {
        let adapter = self.adapter_for(execution)?;
        adapter
            .write_field(&execution.target.target_id, &config.field, &config.value)
            .await?;

        tracing::info!("✏️ Set {}.{} = {}", execution.target, config.field, config.value);

        Ok(StepOutcome {
            message: format!("set '{}'", config.field),
            result: json!({ "field": config.field, "value": config.value }),
        })
    }

    fn adapter_for(&self, execution: &Execution) -> Result<Arc<dyn TargetAdapter>, StepError> {
        self.targets
            .resolve(&execution.target.target_type)
            .ok_or_else(|| StepError::UnknownTargetType(execution.target.target_type.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::TargetError,
        notify::{LogMailer, MessageTemplate},
        store::Database,
        targets::TargetRef,
        workflow::types::{DelayUnit, WaitForEventConfig},
    };
    use async_trait::async_trait;
    use serde_json::Map;
    use std::{collections::HashMap, sync::Mutex};

    #[derive(Default)]
    struct MemoryTarget {
        fields: Mutex<HashMap<String, Value>>,
    }

    #[async_trait]
    impl TargetAdapter for MemoryTarget {
        async fn read_field(&self, _target_id: &str, field: &str) -> Result<Option<Value>, TargetError> {
            Ok(self.fields.lock().unwrap().get(field).cloned())
        }

        async fn write_field(&self, _target_id: &str, field: &str, value: &Value) -> Result<(), TargetError> {
            if field == "locked" {
                return Err(TargetError::UnwritableField(field.to_string()));
            }
            self.fields.lock().unwrap().insert(field.to_string(), value.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        executor: StepExecutor,
        store: ExecutionStore,
        target: Arc<MemoryTarget>,
        execution: Execution,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_file(&dir.path().join("executor.db"), 1).await.unwrap();
        let store = ExecutionStore::new(&db);
        let templates = TemplateStore::new(&db);
        templates
            .upsert(&MessageTemplate::new("welcome", "Hi {{ name }}", "Loan {{ target_id }}"))
            .await
            .unwrap();

        let target = Arc::new(MemoryTarget::default());
        let registry = TargetRegistry::new().with("loan_application", target.clone());

        let mut context = Map::new();
        context.insert("name".into(), json!("Ada"));
        context.insert("email".into(), json!("ada@example.com"));
        context.insert("target_id".into(), json!("9"));
        let execution = Execution::new(Uuid::new_v4(), TargetRef::new("loan_application", "9"), "k".into(), context);
        store.insert_execution(&execution).await.unwrap();

        Fixture {
            _dir: dir,
            executor: StepExecutor::new(templates, Arc::new(LogMailer), registry, store.clone(), "no-reply@test"),
            store,
            target,
            execution,
        }
    }

    fn step(config: StepConfig) -> StepDefinition {
        StepDefinition {
            id: Uuid::new_v4(),
            workflow_id: Uuid::new_v4(),
            position: 0,
            config,
        }
    }

    #[tokio::test]
    async fn send_email_renders_template() {
        let f = fixture().await;
        let outcome = f
            .executor
            .execute_step(&f.execution, &step(StepConfig::send_email("welcome", "{{ email }}")), None)
            .await
            .unwrap();

        assert_eq!(outcome.result["to"], "ada@example.com");
        assert_eq!(outcome.result["subject"], "Hi Ada");
    }

    #[tokio::test]
    async fn send_email_with_missing_template_fails() {
        let f = fixture().await;
        let err = f
            .executor
            .execute_step(&f.execution, &step(StepConfig::send_email("nope", "x@y")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::TemplateNotFound(key) if key == "nope"));
    }

    #[tokio::test]
    async fn delay_creates_one_job_for_next_step() {
        let f = fixture().await;
        let next = Uuid::new_v4();
        f.executor
            .execute_step(&f.execution, &step(StepConfig::delay(1, DelayUnit::Hours)), Some(next))
            .await
            .unwrap();

        let jobs = f.store.jobs_for(f.execution.id).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].step_id, Some(next));
        let wait = jobs[0].scheduled_for - Utc::now();
        assert!(wait > chrono::Duration::minutes(59) && wait <= chrono::Duration::hours(1));
    }

    #[tokio::test]
    async fn out_of_range_delay_fails_without_a_job() {
        let f = fixture().await;
        let err = f
            .executor
            .execute_step(&f.execution, &step(StepConfig::delay(100_000_000, DelayUnit::Days)), None)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::DelayOutOfRange(_)));
        assert!(f.store.jobs_for(f.execution.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn condition_records_boolean_and_update_writes() {
        let f = fixture().await;
        f.executor
            .execute_step(&f.execution, &step(StepConfig::update_status("status", "approved")), None)
            .await
            .unwrap();
        assert_eq!(f.target.fields.lock().unwrap().get("status"), Some(&json!("approved")));

        let outcome = f
            .executor
            .execute_step(
                &f.execution,
                &step(StepConfig::Condition(Condition::FieldIn {
                    field: "status".into(),
                    values: vec![json!("approved"), json!("funded")],
                })),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.result["result"], json!(true));

        let rejected = f
            .executor
            .execute_step(&f.execution, &step(StepConfig::update_status("locked", true)), None)
            .await;
        assert!(matches!(rejected, Err(StepError::Target(TargetError::UnwritableField(_)))));
    }

    #[tokio::test]
    async fn unknown_target_type_and_unsupported_steps_fail() {
        let mut f = fixture().await;
        let wait = step(StepConfig::WaitForEvent(WaitForEventConfig { event: "signed".into() }));
        let err = f.executor.execute_step(&f.execution, &wait, None).await.unwrap_err();
        assert!(err.to_string().contains("unsupported step type"));

        f.execution.target = TargetRef::new("spaceship", "1");
        let err = f
            .executor
            .execute_step(&f.execution, &step(StepConfig::update_status("status", "x")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::UnknownTargetType(t) if t == "spaceship"));
    }
}
