/// Service setup and initialization
///
/// Wires together all components: database, workflow registry, step executor,
/// execution engine and the sweep service. Provides the factory used by the
/// binary and by embedders that bring their own target adapters.

use crate::{
    config::Config,
    execution::{ExecutionStore, ExecutionTracker},
    notify::{HttpMailer, LogMailer, Mailer, TemplateStore},
    runtime::{SweepService, StepExecutor, WorkflowEngine},
    store::Database,
    targets::TargetRegistry,
    workflow::{WorkflowRegistry, WorkflowStorage},
};
use anyhow::Result;
use std::{path::Path, sync::Arc};
use tracing_subscriber::EnvFilter;

/// Fully wired engine plus the handles embedders need
pub struct App {
    pub database: Database,
    pub registry: Arc<WorkflowRegistry>,
    pub templates: TemplateStore,
    pub engine: Arc<WorkflowEngine>,
    pub sweep: SweepService,
}

/// Create every component and load stored workflows
///
/// The sweep service is created but not started.
pub async fn create_app(config: &Config, targets: TargetRegistry) -> Result<App> {
    ensure_data_dir(&config.database.url)?;

    let database = Database::connect(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(WorkflowStorage::new(&database)));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    let mailer: Arc<dyn Mailer> = match &config.mail.relay_url {
        Some(url) => {
            tracing::info!("📧 Mail relay: {}", url);
            Arc::new(HttpMailer::new(url))
        }
        None => {
            tracing::warn!("⚠️ No mail relay configured, outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    if targets.target_types().is_empty() {
        tracing::warn!("⚠️ No target adapters registered; condition and update_status steps will fail");
    } else {
        tracing::info!("🎯 Target adapters: {:?}", targets.target_types());
    }

    let templates = TemplateStore::new(&database);
    let store = ExecutionStore::new(&database);

    tracing::info!("⚙️ Initializing step executor");
    let executor = Arc::new(StepExecutor::new(
        templates.clone(),
        mailer,
        targets,
        store.clone(),
        &config.mail.from,
    ));

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(
        WorkflowEngine::new(
            Arc::clone(&registry),
            store,
            ExecutionTracker::new(&database),
            executor,
        )
        .with_batch_size(config.sweep.batch_size),
    );

    tracing::info!("⏰ Initializing sweep service");
    let sweep = SweepService::new(Arc::clone(&engine), &config.sweep.schedule)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize sweep scheduler: {}", e))?;

    tracing::info!("✅ Application initialized successfully");
    Ok(App {
        database,
        registry,
        templates,
        engine,
        sweep,
    })
}

/// Run the engine until Ctrl-C
pub async fn start_service(config: Config) -> Result<()> {
    init_tracing(&config.log_filter);
    tracing::info!("Starting lendflow workflow engine...");

    let app = create_app(&config, TargetRegistry::new()).await?;
    app.sweep.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown requested");

    app.sweep.stop().await?;
    app.database.pool().close().await;
    Ok(())
}

/// RUST_LOG wins over the configured filter
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_data_dir(url: &str) -> Result<()> {
    let Some(path) = url.strip_prefix("sqlite://").or_else(|| url.strip_prefix("sqlite:")) else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }

    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        tracing::info!("📁 Ensuring data directory exists: {}", dir.display());
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory {}: {}", dir.display(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_is_created_for_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let url = format!("sqlite://{}/engine.db?mode=rwc", nested.display());

        ensure_data_dir(&url).unwrap();
        assert!(nested.is_dir());

        ensure_data_dir("sqlite::memory:").unwrap();
        ensure_data_dir("postgres://elsewhere").unwrap();
    }

    #[tokio::test]
    async fn app_wires_up_against_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.url = format!("sqlite://{}", dir.path().join("data").join("app.db").display());
        config.mail.relay_url = None;

        let app = create_app(&config, TargetRegistry::new()).await.unwrap();
        assert!(app.registry.list_workflow_ids().is_empty());
        assert!(app.engine.failed_executions(10).await.unwrap().is_empty());
    }
}
