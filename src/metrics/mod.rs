// Node execution metrics
// Counts, latency percentiles and failure buckets per node

pub mod collector;
pub mod types;

pub use collector::NodeMetricsCollector;
pub use types::*;
