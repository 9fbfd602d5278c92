//! Main entry point for the warden contender.

use tracing::{error, info};
use warden_server::{contender, model::Configuration, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;
    let metrics = startup::init_metrics()?;

    let locks = contender::build_contenders(&configuration, contender::connector(&configuration))?;
    let poll_interval = configuration.poll_interval();
    info!(
        endpoint = %configuration.endpoint(),
        key = %configuration.lock_key(),
        ttl_secs = configuration.lock_ttl_secs(),
        contenders = locks.len(),
        poll_interval_ms = poll_interval.as_millis() as u64,
        "Starting warden"
    );

    let shutdown = startup::wait_for_shutdown_signal();
    let tasks: Vec<_> = locks
        .into_iter()
        .map(|lock| {
            tokio::spawn(contender::run_contender(
                lock,
                poll_interval,
                shutdown.subscribe(),
            ))
        })
        .collect();

    for task in tasks {
        match task.await {
            Ok(Some(stub)) => info!(status = %serde_json::to_string(&stub)?, "Final lock status"),
            Ok(None) => info!("Contender stopped before its first attempt"),
            Err(e) => error!(error = %e, "Contender task failed"),
        }
    }

    info!(metrics = %metrics.render(), "Final metrics");
    info!("Warden stopped");
    Ok(())
}
