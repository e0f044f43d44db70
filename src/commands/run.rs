//! Run command handler.
//!
//! Builds the collaborators, starts the control loop and the health endpoint,
//! and stops the loop gracefully on Ctrl-C.

use std::sync::Arc;

use tracing::{error, info};

use crate::alerting::TracingAlertSink;
use crate::cli::{load_config, RunCliConfig};
use crate::healing::{Collaborators, SelfHealingSystem};
use crate::health::{run_health_server, HealthState};
use crate::recovery::{ProcessStepExecutor, StepExecutor};
use crate::sandbox::{sandbox_collaborators, InMemoryMetricSource};
use crate::source::MetricSource;

/// Run the self-healing loop until interrupted.
///
/// # Errors
/// Returns error if the configuration is invalid or the system fails to start.
pub async fn run_selfheal(cli: RunCliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config_path.as_deref())?;
    info!(
        sandbox = cli.sandbox,
        config = ?cli.config_path,
        health_port = cli.health_port,
        "--- Starting self healing system ---"
    );

    let (source, steps): (Arc<InMemoryMetricSource>, Arc<dyn StepExecutor>) = if cli.sandbox {
        if let Some(path) = &cli.journal {
            info!(path = %path.display(), "Recording sandbox steps");
        }
        let (source, executor) = sandbox_collaborators(&config, cli.journal.clone());
        (source, executor as Arc<dyn StepExecutor>)
    } else {
        (
            Arc::new(InMemoryMetricSource::new()),
            Arc::new(ProcessStepExecutor) as Arc<dyn StepExecutor>,
        )
    };

    let collaborators = Collaborators::new(
        Arc::clone(&source) as Arc<dyn MetricSource>,
        steps,
        Arc::new(TracingAlertSink::new()),
    );
    let system = SelfHealingSystem::new(config, collaborators)?;
    system.start().await?;

    let health = HealthState::new(system.clone()).with_observations(Arc::clone(&source));
    let server = tokio::spawn(run_health_server(cli.health_port, health));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
    info!("Shutdown signal received");

    system.stop().await?;
    server.abort();

    let metrics = system.get_healing_metrics().await;
    info!(
        total_faults = metrics.total_faults,
        resolved_faults = metrics.resolved_faults,
        recovery_success_rate = metrics.recovery_success_rate,
        mttr_secs = metrics.mttr_secs,
        "Final healing metrics"
    );
    Ok(())
}
