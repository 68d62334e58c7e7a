//! Prometheus exporter installation

use std::net::SocketAddr;

use anyhow::{Result, anyhow};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the global Prometheus recorder with its HTTP listener
///
/// Does nothing when metrics are disabled. Fails if a recorder is already
/// installed in this process.
pub fn install_prometheus_recorder(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        tracing::debug!("Metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], config.port)))
        .add_global_label("service", "rule-cache")
        .add_global_label("version", env!("CARGO_PKG_VERSION"))
        .install()
        .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;

    tracing::info!(port = %config.port, "Prometheus metrics exporter installed");

    Ok(())
}
