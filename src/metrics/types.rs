use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::retry::ErrorCategory;

/// Coarse failure buckets kept per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsErrorCategory {
    Timeout,
    Validation,
    Network,
    Other,
}

impl From<ErrorCategory> for MetricsErrorCategory {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Timeout => MetricsErrorCategory::Timeout,
            ErrorCategory::Validation => MetricsErrorCategory::Validation,
            ErrorCategory::Network => MetricsErrorCategory::Network,
            _ => MetricsErrorCategory::Other,
        }
    }
}

/// Point-in-time view of one node's executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub total_executions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub last_execution_ms: Option<f64>,
    pub avg_execution_ms: f64,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p99: Option<f64>,
    pub timeout_errors: u64,
    pub validation_errors: u64,
    pub network_errors: u64,
    pub other_errors: u64,
}

impl NodeMetrics {
    pub fn failure_rate(&self) -> f64 {
        if self.total_executions == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_executions as f64
        }
    }
}

/// Snapshot of every node, keyed by node name.
pub type SerializedMetrics = BTreeMap<String, NodeMetrics>;

/// `(node_name, failure_rate)`
pub type FailureRateCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;
/// `(node_name, p99_ms)`
pub type LatencyCallback = Arc<dyn Fn(&str, f64) + Send + Sync>;

#[derive(Clone)]
pub struct NodeMetricsCollectorConfig {
    /// Samples kept for percentiles.
    pub window_size: usize,
    /// Failure rate in `[0, 1]` above which `on_failure_rate_threshold` fires.
    pub failure_rate_threshold: Option<f64>,
    /// p99 latency above which `on_latency_threshold` fires.
    pub latency_threshold_ms: Option<f64>,
    pub on_failure_rate_threshold: Option<FailureRateCallback>,
    pub on_latency_threshold: Option<LatencyCallback>,
}

impl Default for NodeMetricsCollectorConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            failure_rate_threshold: None,
            latency_threshold_ms: None,
            on_failure_rate_threshold: None,
            on_latency_threshold: None,
        }
    }
}

impl std::fmt::Debug for NodeMetricsCollectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetricsCollectorConfig")
            .field("window_size", &self.window_size)
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("latency_threshold_ms", &self.latency_threshold_ms)
            .finish()
    }
}

impl NodeMetricsCollectorConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn on_failure_rate_threshold<F>(mut self, threshold: f64, callback: F) -> Self
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        self.failure_rate_threshold = Some(threshold);
        self.on_failure_rate_threshold = Some(Arc::new(callback));
        self
    }

    pub fn on_latency_threshold<F>(mut self, threshold_ms: f64, callback: F) -> Self
    where
        F: Fn(&str, f64) + Send + Sync + 'static,
    {
        self.latency_threshold_ms = Some(threshold_ms);
        self.on_latency_threshold = Some(Arc::new(callback));
        self
    }
}
