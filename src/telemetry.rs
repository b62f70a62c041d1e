//! Process-global logging and metrics. Initialized once at startup,
//! read-only thereafter — no hot reload, matching the rest of the process's
//! global state (schema document, exchange, index mapping).

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}

/// Installs the process-wide Prometheus recorder and returns the handle the
/// `/metrics` route renders from.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("prometheus recorder installs exactly once at startup")
}
