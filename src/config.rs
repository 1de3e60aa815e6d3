use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::metrics::NodeMetricsCollectorConfig;
use crate::retry::NodeRetryConfig;
use crate::state::CURRENT_SCHEMA_VERSION;

/// Main configuration structure for storyflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry defaults applied to nodes without their own policy
    pub retry: NodeRetryConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
    /// Node metrics collection
    pub metrics: MetricsConfig,
    /// State document settings
    pub state: StateConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples kept per node for percentiles
    pub window_size: usize,
    /// Failure rate (0-1) that triggers a warning
    pub failure_rate_threshold: Option<f64>,
    /// p99 latency that triggers a warning
    pub latency_threshold_ms: Option<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            failure_rate_threshold: None,
            latency_threshold_ms: None,
        }
    }
}

impl MetricsConfig {
    /// Collector settings; exceeded thresholds are logged.
    pub fn collector_config(&self) -> NodeMetricsCollectorConfig {
        let mut collector = NodeMetricsCollectorConfig::default().with_window_size(self.window_size);
        if let Some(threshold) = self.failure_rate_threshold {
            collector = collector.on_failure_rate_threshold(threshold, |node, rate| {
                tracing::warn!(node.name = node, failure_rate = rate, "Node failure rate above threshold");
            });
        }
        if let Some(threshold_ms) = self.latency_threshold_ms {
            collector = collector.on_latency_threshold(threshold_ms, |node, p99| {
                tracing::warn!(node.name = node, p99_ms = p99, "Node p99 latency above threshold");
            });
        }
        collector
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Schema version stamped on new documents
    pub schema_version: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: NodeRetryConfig::default(),
            observability: ObservabilityConfig::default(),
            metrics: MetricsConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. storyflow.toml in the working directory
    /// 3. Environment variables (STORYFLOW_RETRY__MAX_ATTEMPTS=5)
    pub fn load() -> Result<Self> {
        let file = Path::new("storyflow.toml");
        Self::load_from(file.exists().then_some(file))
    }

    /// Same layering as [`OrchestratorConfig::load`] with an explicit file.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("STORYFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: OrchestratorConfig = builder
            .build()?
            .try_deserialize()
            .context("Failed to deserialize storyflow configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.metrics.window_size == 0 {
            anyhow::bail!("metrics.window_size must be at least 1");
        }
        if let Some(rate) = self.metrics.failure_rate_threshold {
            if !(0.0..=1.0).contains(&rate) {
                anyhow::bail!("metrics.failure_rate_threshold must be within [0, 1] (got {rate})");
            }
        }
        if self.state.schema_version.trim().is_empty() {
            anyhow::bail!("state.schema_version must not be empty");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<OrchestratorConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = OrchestratorConfig::load_env_file();
        OrchestratorConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static OrchestratorConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e:#}"))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
