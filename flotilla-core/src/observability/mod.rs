//! Observability infrastructure: tracing, metrics, health reports.

use crate::config::Config;
use crate::error::{FleetError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod health;
pub mod metrics;

/// Initialize the global tracing subscriber and, if `metrics_port` is set,
/// the Prometheus exporter.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Call once at startup.
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| FleetError::InvalidConfig {
            reason: format!("Invalid log level '{}': {}", config.log_level, e),
        })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .try_init()
        .map_err(|e| FleetError::Internal(format!("Tracing already initialized: {}", e)))?;

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .map_err(|e| FleetError::Other(anyhow::Error::new(e)))?;
        tracing::info!(port, "Prometheus exporter listening");
    }

    metrics::register_core_metrics();
    tracing::info!(log_level = %config.log_level, "Observability initialized");
    Ok(())
}
