// Per-node execution metrics with rolling-window percentiles.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::types::{
    MetricsErrorCategory, NodeMetrics, NodeMetricsCollectorConfig, SerializedMetrics,
};

/// Bounded sample buffer; the oldest sample is evicted at capacity.
#[derive(Debug, Clone)]
struct RollingWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    fn add(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Sample at index `floor(p/100 * (n-1))` of the sorted window.
    fn percentile(&self, p: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let index = ((p / 100.0) * (sorted.len() - 1) as f64).floor() as usize;
        sorted.get(index.min(sorted.len() - 1)).copied()
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    total_executions: u64,
    success_count: u64,
    failure_count: u64,
    retry_count: u64,
    last_execution_ms: Option<f64>,
    total_duration_ms: f64,
    timeout_errors: u64,
    validation_errors: u64,
    network_errors: u64,
    other_errors: u64,
    window: RollingWindow,
}

impl NodeRecord {
    fn new(window_size: usize) -> Self {
        Self {
            total_executions: 0,
            success_count: 0,
            failure_count: 0,
            retry_count: 0,
            last_execution_ms: None,
            total_duration_ms: 0.0,
            timeout_errors: 0,
            validation_errors: 0,
            network_errors: 0,
            other_errors: 0,
            window: RollingWindow::new(window_size),
        }
    }

    fn record_execution(&mut self, duration_ms: f64) {
        self.total_executions += 1;
        self.last_execution_ms = Some(duration_ms);
        self.total_duration_ms += duration_ms;
        self.window.add(duration_ms);
    }

    fn snapshot(&self) -> NodeMetrics {
        let avg_execution_ms = if self.total_executions > 0 {
            self.total_duration_ms / self.total_executions as f64
        } else {
            0.0
        };
        NodeMetrics {
            total_executions: self.total_executions,
            success_count: self.success_count,
            failure_count: self.failure_count,
            retry_count: self.retry_count,
            last_execution_ms: self.last_execution_ms,
            avg_execution_ms,
            p50: self.window.percentile(50.0),
            p90: self.window.percentile(90.0),
            p99: self.window.percentile(99.0),
            timeout_errors: self.timeout_errors,
            validation_errors: self.validation_errors,
            network_errors: self.network_errors,
            other_errors: self.other_errors,
        }
    }
}

/// Thread-safe collector shared by every retry loop that reports into it.
#[derive(Debug, Default)]
pub struct NodeMetricsCollector {
    config: NodeMetricsCollectorConfig,
    nodes: Mutex<HashMap<String, NodeRecord>>,
}

impl NodeMetricsCollector {
    pub fn new(config: NodeMetricsCollectorConfig) -> Self {
        Self {
            config,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_size(&self) -> usize {
        self.config.window_size.max(1)
    }

    pub fn record_success(&self, node_name: &str, duration_ms: f64) {
        let duration_ms = clamp_duration(node_name, duration_ms);
        let snapshot = {
            let mut nodes = self.lock();
            let record = entry(&mut nodes, node_name, self.window_size());
            record.success_count += 1;
            record.record_execution(duration_ms);
            record.snapshot()
        };
        self.check_thresholds(node_name, &snapshot);
    }

    pub fn record_failure(&self, node_name: &str, duration_ms: f64, category: MetricsErrorCategory) {
        let duration_ms = clamp_duration(node_name, duration_ms);
        let snapshot = {
            let mut nodes = self.lock();
            let record = entry(&mut nodes, node_name, self.window_size());
            record.failure_count += 1;
            match category {
                MetricsErrorCategory::Timeout => record.timeout_errors += 1,
                MetricsErrorCategory::Validation => record.validation_errors += 1,
                MetricsErrorCategory::Network => record.network_errors += 1,
                MetricsErrorCategory::Other => record.other_errors += 1,
            }
            record.record_execution(duration_ms);
            record.snapshot()
        };
        self.check_thresholds(node_name, &snapshot);
    }

    /// Count one scheduled retry. `attempt` is the attempt that just failed.
    pub fn record_retry(&self, node_name: &str, _attempt: u32) {
        let mut nodes = self.lock();
        entry(&mut nodes, node_name, self.window_size()).retry_count += 1;
    }

    /// Metrics for one node; zeroed metrics for a node never seen.
    pub fn node_metrics(&self, node_name: &str) -> NodeMetrics {
        self.lock()
            .get(node_name)
            .map(NodeRecord::snapshot)
            .unwrap_or_default()
    }

    pub fn all_node_metrics(&self) -> SerializedMetrics {
        self.lock()
            .iter()
            .map(|(name, record)| (name.clone(), record.snapshot()))
            .collect()
    }

    /// Clear one node, or every node when `node_name` is `None`.
    pub fn reset(&self, node_name: Option<&str>) {
        let mut nodes = self.lock();
        match node_name {
            Some(name) => {
                nodes.remove(name);
            }
            None => nodes.clear(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.all_node_metrics()).unwrap_or_default()
    }

    // A poisoned lock only means another recorder panicked mid-update; the
    // counters are still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, NodeRecord>> {
        self.nodes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Runs with the lock released so callbacks may read the collector.
    fn check_thresholds(&self, node_name: &str, metrics: &NodeMetrics) {
        if let (Some(threshold), Some(callback)) = (
            self.config.failure_rate_threshold,
            &self.config.on_failure_rate_threshold,
        ) {
            let rate = metrics.failure_rate();
            if metrics.total_executions > 0 && rate > threshold {
                callback(node_name, rate);
            }
        }

        if let (Some(threshold), Some(callback), Some(p99)) = (
            self.config.latency_threshold_ms,
            &self.config.on_latency_threshold,
            metrics.p99,
        ) {
            if p99 > threshold {
                callback(node_name, p99);
            }
        }
    }
}

fn entry<'a>(
    nodes: &'a mut HashMap<String, NodeRecord>,
    node_name: &str,
    window_size: usize,
) -> &'a mut NodeRecord {
    nodes
        .entry(node_name.to_string())
        .or_insert_with(|| NodeRecord::new(window_size))
}

fn clamp_duration(node_name: &str, duration_ms: f64) -> f64 {
    if duration_ms < 0.0 || duration_ms.is_nan() {
        warn!(node.name = node_name, duration_ms, "Negative duration recorded, clamping to 0");
        0.0
    } else {
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_unknown_node_has_empty_metrics() {
        let collector = NodeMetricsCollector::default();
        let metrics = collector.node_metrics("seed");

        assert_eq!(metrics, NodeMetrics::default());
        assert_eq!(metrics.p50, None);
    }

    #[test]
    fn test_counts_and_average() {
        let collector = NodeMetricsCollector::default();
        collector.record_success("seed", 100.0);
        collector.record_success("seed", 300.0);
        collector.record_failure("seed", 200.0, MetricsErrorCategory::Network);
        collector.record_retry("seed", 1);

        let metrics = collector.node_metrics("seed");
        assert_eq!(metrics.total_executions, 3);
        assert_eq!(metrics.success_count, 2);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.retry_count, 1);
        assert_eq!(metrics.network_errors, 1);
        assert_eq!(metrics.last_execution_ms, Some(200.0));
        assert_eq!(metrics.avg_execution_ms, 200.0);
    }

    #[test]
    fn test_percentiles_use_floor_index() {
        let collector = NodeMetricsCollector::default();
        for ms in 1..=10 {
            collector.record_success("review", ms as f64 * 10.0);
        }

        let metrics = collector.node_metrics("review");
        // n = 10: p50 -> index 4, p90 -> index 8, p99 -> index 8
        assert_eq!(metrics.p50, Some(50.0));
        assert_eq!(metrics.p90, Some(90.0));
        assert_eq!(metrics.p99, Some(90.0));
    }

    #[test]
    fn test_window_evicts_oldest_samples() {
        let collector =
            NodeMetricsCollector::new(NodeMetricsCollectorConfig::default().with_window_size(3));
        for ms in [1000.0, 1.0, 2.0, 3.0] {
            collector.record_success("qa", ms);
        }

        let metrics = collector.node_metrics("qa");
        assert_eq!(metrics.total_executions, 4);
        assert_eq!(metrics.p99, Some(2.0));
    }

    #[test]
    fn test_negative_duration_is_clamped() {
        let collector = NodeMetricsCollector::default();
        collector.record_success("seed", -25.0);

        let metrics = collector.node_metrics("seed");
        assert_eq!(metrics.last_execution_ms, Some(0.0));
        assert_eq!(metrics.avg_execution_ms, 0.0);
    }

    #[test]
    fn test_failure_rate_threshold_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        let collector = NodeMetricsCollector::new(
            NodeMetricsCollectorConfig::default().on_failure_rate_threshold(0.5, move |node, rate| {
                assert_eq!(node, "attack");
                assert!(rate > 0.5);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        collector.record_success("attack", 10.0);
        collector.record_failure("attack", 10.0, MetricsErrorCategory::Other);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        collector.record_failure("attack", 10.0, MetricsErrorCategory::Timeout);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_latency_threshold_fires_on_p99() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let collector = NodeMetricsCollector::new(
            NodeMetricsCollectorConfig::default().on_latency_threshold(500.0, move |node, p99| {
                sink.lock().unwrap().push((node.to_string(), p99));
            }),
        );

        collector.record_success("llm", 100.0);
        collector.record_success("llm", 900.0);
        // [100, 900]: p99 index is 0, still under the threshold
        assert!(seen.lock().unwrap().is_empty());

        collector.record_success("llm", 900.0);
        assert_eq!(*seen.lock().unwrap(), vec![("llm".to_string(), 900.0)]);
    }

    #[test]
    fn test_reset_one_or_all() {
        let collector = NodeMetricsCollector::default();
        collector.record_success("a", 1.0);
        collector.record_success("b", 1.0);

        collector.reset(Some("a"));
        assert_eq!(collector.node_metrics("a").total_executions, 0);
        assert_eq!(collector.node_metrics("b").total_executions, 1);

        collector.reset(None);
        assert!(collector.all_node_metrics().is_empty());
    }

    #[test]
    fn test_json_snapshot_uses_camel_case() {
        let collector = NodeMetricsCollector::default();
        collector.record_failure("seed", 5.0, MetricsErrorCategory::Validation);

        let json = collector.to_json();
        assert_eq!(json["seed"]["failureCount"], 1);
        assert_eq!(json["seed"]["validationErrors"], 1);
        assert_eq!(json["seed"]["lastExecutionMs"], 5.0);
    }
}
