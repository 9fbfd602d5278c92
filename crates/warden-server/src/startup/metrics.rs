//! Metrics recorder installation

use anyhow::Context;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the process-wide Prometheus recorder and describe the lock metrics
///
/// The returned handle renders the current values in text exposition format.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;
    warden_consistency::describe_metrics();

    info!("Metrics initialized");
    Ok(handle)
}
