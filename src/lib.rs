// Story Orchestrator Library - workflow state, node retries and story lifecycle
// This exposes the core components for the CLI, tests and embedding callers

pub mod config;
pub mod metrics;
pub mod node;
pub mod retry;
pub mod state;
pub mod story;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{config, init_config, OrchestratorConfig};
pub use metrics::{MetricsErrorCategory, NodeMetrics, NodeMetricsCollector, NodeMetricsCollectorConfig};
pub use node::{
    create_llm_node, create_node, create_simple_node, create_tool_node, Node, NodeConfigError,
};
pub use retry::{
    calculate_retry_delay, classify_error, create_retry_wrapper, get_error_category,
    is_retryable_node_error, with_node_retry, would_retry, ErrorCategory, ErrorClassification,
    NodeError, NodeRetryConfig, NodeRetryExhaustedError, NodeRetryOptions, RetryAction,
    RetryOutcome, RetryOverrides, RetryWrapper, Sleeper,
};
pub use state::{
    advance_state, clone_state, create_initial_state, deserialize_state, diff_graph_state,
    is_valid_graph_state, record_node_failure, safe_deserialize_state, safe_validate_graph_state,
    serialize_state, validate_graph_state, GraphState, InitialStateParams, StateDiff,
    ValidationError,
};
pub use story::{
    get_next_state, is_active_state, is_terminal_state, is_valid_transition, is_workable_state,
    StoryEvent, StoryLifecycle, StoryState, StoryTransition, TransitionError, STORY_STATES,
};
pub use telemetry::{create_node_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
