use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global subscriber: JSON or plain lines, filtered by RUST_LOG
/// with `log_level` as the fallback directive.
pub fn init_telemetry(observability: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!("storyflow telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking the attempts of one node run
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping every attempt of one retried node
pub fn create_node_span(node_name: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "node_execution",
        node.name = node_name,
        correlation.id = correlation_id,
    )
}

/// Shutdown telemetry gracefully
pub fn shutdown_telemetry() {
    // Plain fmt layers flush on write; nothing to tear down.
    tracing::debug!("storyflow telemetry shutdown complete");
}
