//! Telemetry module
//!
//! Logging and metrics

mod logging;
mod metrics;

pub use self::metrics::{
    increment, record_cycle_duration, set_gauge, set_volatility, CounterMetric, GaugeMetric,
};
pub use logging::{init_logging, LogFormat};

use crate::config::TelemetryConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize logging and, when a port is configured, the Prometheus exporter.
///
/// The exporter spawns onto the current tokio runtime.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.log_level, config.log_format)?;

    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    Ok(())
}
