// Workflow nodes: a named unit of work run against a story document.
//
// A node never fails its caller because of its own work. Once retries are
// done the failure is written into the document and the story is blocked.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::NodeMetricsCollector;
use crate::retry::{
    with_node_retry, NodeError, NodeRetryConfig, NodeRetryOptions, ProgrammingFault,
    RetryConfigError, Sleeper,
};
use crate::state::{advance_state, record_node_failure, GraphState, StateUpdateError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeConfigError {
    #[error("Node name is required")]
    EmptyName,

    #[error(transparent)]
    InvalidRetry(#[from] RetryConfigError),
}

impl From<StateUpdateError> for NodeError {
    fn from(err: StateUpdateError) -> Self {
        match err {
            StateUpdateError::Invalid(validation) => NodeError::Validation(validation),
            identity @ StateUpdateError::IdentityChanged { .. } => {
                NodeError::programming(ProgrammingFault::Type, identity.to_string())
            }
        }
    }
}

/// A named node with its retry policy.
///
/// The implementation receives a copy of the current document and returns the
/// next one, or `None` when it has nothing to report, which counts as a fault.
pub struct Node<F> {
    options: NodeRetryOptions,
    implementation: F,
}

impl<F> std::fmt::Debug for Node<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("options", &self.options).finish()
    }
}

impl<F, Fut> Node<F>
where
    F: Fn(GraphState) -> Fut,
    Fut: Future<Output = Result<Option<GraphState>, NodeError>>,
{
    pub fn name(&self) -> &str {
        &self.options.node_name
    }

    pub fn retry_config(&self) -> &NodeRetryConfig {
        &self.options.config
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.options = self.options.with_sleeper(sleeper);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<NodeMetricsCollector>) -> Self {
        self.options = self.options.with_metrics(metrics);
        self
    }

    pub fn on_retry_attempt<C>(mut self, callback: C) -> Self
    where
        C: Fn(u32, &NodeError, u64) + Send + Sync + 'static,
    {
        self.options = self.options.on_retry_attempt(callback);
        self
    }

    /// Run the node against `state` and return the next document.
    ///
    /// A node failure comes back as a document with the failure recorded and
    /// the `blocked` flag raised. `Err` only means `state` itself could not be
    /// updated, for example because it was never a valid document.
    pub async fn run(&self, state: &GraphState) -> Result<GraphState, StateUpdateError> {
        let node_name = self.name();
        let attempt = || {
            let update = (self.implementation)(state.clone());
            async move {
                match update.await {
                    Err(err) => Err(err),
                    Ok(Some(candidate)) => {
                        advance_state(state, candidate, Some(node_name)).map_err(NodeError::from)
                    }
                    Ok(None) => Err(NodeError::programming(
                        ProgrammingFault::Type,
                        format!("node '{node_name}' must return a state update"),
                    )),
                }
            }
        };

        match with_node_retry(attempt, &self.options).await {
            Ok(outcome) => {
                info!(
                    node.name = node_name,
                    story.id = %state.story_id,
                    attempts = outcome.attempts,
                    "Node completed"
                );
                Ok(outcome.value)
            }
            Err(failure) => {
                warn!(
                    node.name = node_name,
                    story.id = %state.story_id,
                    attempts = failure.attempts,
                    category = %failure.category(),
                    "Node failed, blocking story"
                );
                record_node_failure(state, &failure)
            }
        }
    }
}

/// Build a node, rejecting a blank name or an invalid retry policy.
pub fn create_node<F, Fut>(
    name: impl Into<String>,
    config: NodeRetryConfig,
    implementation: F,
) -> Result<Node<F>, NodeConfigError>
where
    F: Fn(GraphState) -> Fut,
    Fut: Future<Output = Result<Option<GraphState>, NodeError>>,
{
    let name = name.into();
    if name.trim().is_empty() {
        return Err(NodeConfigError::EmptyName);
    }
    config.validate()?;

    Ok(Node {
        options: NodeRetryOptions::new(name, config),
        implementation,
    })
}

/// Single attempt, no retries.
pub fn create_simple_node<F, Fut>(
    name: impl Into<String>,
    implementation: F,
) -> Result<Node<F>, NodeConfigError>
where
    F: Fn(GraphState) -> Fut,
    Fut: Future<Output = Result<Option<GraphState>, NodeError>>,
{
    create_node(name, NodeRetryConfig::simple(), implementation)
}

pub fn create_llm_node<F, Fut>(
    name: impl Into<String>,
    implementation: F,
) -> Result<Node<F>, NodeConfigError>
where
    F: Fn(GraphState) -> Fut,
    Fut: Future<Output = Result<Option<GraphState>, NodeError>>,
{
    create_node(name, NodeRetryConfig::llm(), implementation)
}

pub fn create_tool_node<F, Fut>(
    name: impl Into<String>,
    implementation: F,
) -> Result<Node<F>, NodeConfigError>
where
    F: Fn(GraphState) -> Fut,
    Fut: Future<Output = Result<Option<GraphState>, NodeError>>,
{
    create_node(name, NodeRetryConfig::tool(), implementation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::InstantSleeper;
    use crate::state::{create_initial_state, InitialStateParams, BLOCKED_FLAG};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn initial() -> GraphState {
        create_initial_state(InitialStateParams::new("wrkf", "wrkf-1020")).unwrap()
    }

    fn proceed(mut state: GraphState) -> Result<Option<GraphState>, NodeError> {
        state.routing_flags.insert("proceed".to_string(), true);
        Ok(Some(state))
    }

    #[test]
    fn test_blank_name_is_rejected() {
        for name in ["", "   "] {
            let err = create_simple_node(name, |state| async move { proceed(state) }).unwrap_err();
            assert_eq!(err, NodeConfigError::EmptyName);
            assert_eq!(err.to_string(), "Node name is required");
        }
    }

    #[test]
    fn test_invalid_retry_config_is_rejected() {
        let err = create_node(
            "seed",
            NodeRetryConfig::default().with_max_attempts(0),
            |state| async move { proceed(state) },
        )
        .unwrap_err();
        assert_eq!(err, NodeConfigError::InvalidRetry(RetryConfigError::MaxAttempts));
    }

    #[tokio::test]
    async fn test_update_is_merged_and_audited() {
        let state = initial();
        let node = create_simple_node("seed", |state| async move { proceed(state) }).unwrap();

        let next = node.run(&state).await.unwrap();

        assert!(next.routing_flag("proceed"));
        assert_eq!(next.state_history.len(), 1);
        assert_eq!(next.state_history[0].node_name.as_deref(), Some("seed"));
        assert!(next.errors.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_captured_in_errors() {
        let state = initial();
        let node = create_simple_node("seed", |_state| async move {
            Err::<Option<GraphState>, _>(NodeError::failure("Test error"))
        })
        .unwrap();

        let next = node.run(&state).await.unwrap();

        assert_eq!(next.errors.len(), 1);
        assert_eq!(next.errors[0].message, "Test error");
        assert_eq!(next.errors[0].node_id, "seed");
        assert!(next.is_blocked());
    }

    #[tokio::test]
    async fn test_missing_update_is_recorded_as_error() {
        let state = initial();
        let node = create_simple_node("seed", |_state| async move { Ok::<_, NodeError>(None::<GraphState>) }).unwrap();

        let next = node.run(&state).await.unwrap();

        assert!(next.errors[0].message.contains("must return a state update"));
        assert!(!next.errors[0].recoverable);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_blocks_story() {
        let state = initial();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let sleeper = Arc::new(InstantSleeper::new());
        let node = create_node(
            "fetch",
            NodeRetryConfig::default().with_max_attempts(2).with_jitter(0.0),
            move |_state| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err::<Option<GraphState>, _>(NodeError::failure("Always fails")) }
            },
        )
        .unwrap()
        .with_sleeper(sleeper.clone());

        let next = node.run(&state).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.requested_ms(), vec![1000]);
        assert!(next.routing_flag(BLOCKED_FLAG));
        assert!(next.errors[0].recoverable);
    }

    #[tokio::test]
    async fn test_invalid_update_is_not_retried() {
        let state = initial();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let node = create_node("rename", NodeRetryConfig::default(), move |mut state| {
            counter.fetch_add(1, Ordering::SeqCst);
            state.story_id = "glry-1".to_string();
            async move { Ok::<_, NodeError>(Some(state)) }
        })
        .unwrap()
        .with_sleeper(Arc::new(InstantSleeper::new()));

        let next = node.run(&state).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.story_id, "wrkf-1020");
        assert!(next.is_blocked());
    }

    #[tokio::test]
    async fn test_records_metrics() {
        let state = initial();
        let metrics = Arc::new(NodeMetricsCollector::default());
        let node = create_tool_node("lint", |state| async move { proceed(state) })
            .unwrap()
            .with_metrics(metrics.clone());

        node.run(&state).await.unwrap();
        node.run(&state).await.unwrap();

        let recorded = metrics.node_metrics("lint");
        assert_eq!(recorded.total_executions, 2);
        assert_eq!(recorded.success_count, 2);
    }

    #[tokio::test]
    async fn test_presets_carry_their_retry_config() {
        let llm = create_llm_node("draft", |state| async move { proceed(state) }).unwrap();
        let tool = create_tool_node("lint", |state| async move { proceed(state) }).unwrap();
        let simple = create_simple_node("seed", |state| async move { proceed(state) }).unwrap();

        assert_eq!(llm.retry_config(), &NodeRetryConfig::llm());
        assert_eq!(tool.retry_config(), &NodeRetryConfig::tool());
        assert_eq!(simple.retry_config().max_attempts, 1);

        let next = llm.run(&initial()).await.unwrap();
        assert!(next.routing_flag("proceed"));
    }
}
