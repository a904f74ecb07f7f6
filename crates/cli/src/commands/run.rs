// Run command: start the configured service and block until Ctrl-C

use anyhow::{Context, Result};
use dash_engine::config::DashConfig;
use dash_engine::container::{Container, StatusChangeEvent};
use tracing::{info, warn};

pub async fn run(config: DashConfig) -> Result<()> {
    let service = config.service.clone();
    let container = Container::with_builtin(config);

    container.add_status_listener(|event: &StatusChangeEvent| {
        info!(run_id = %event.run_id, status = %event.status, at = %event.at, "Container status changed");
    });

    let stopper = container.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C; stop the process externally");
            return;
        }
        info!("Interrupt received, stopping");
        stopper.stop().await;
    });

    info!(%service, run_id = %container.run_id(), "Starting");
    container
        .start()
        .await
        .with_context(|| format!("service '{service}' did not run"))?;
    info!("Run finished");
    Ok(())
}
