/// lendflow: workflow execution engine for loan origination
///
/// Loads configuration from the environment, opens the database, loads stored
/// workflows and runs the deferred-job sweep until Ctrl-C.

use lendflow::{config::Config, service::start_service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_service(config).await?;

    Ok(())
}
