// Node retry executor: runs one unit of work with classified, backed-off retries.
//
// Attempts run strictly one after another. The only suspension point is the
// injected sleeper between a classified failure and the next attempt.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use super::classification::{classify_error, ErrorCategory, ErrorClassification, NodeError, RetryAction};
use super::config::{calculate_retry_delay, NodeRetryConfig, NodeRetryConfigOverride};
use super::sleeper::{Sleeper, TokioSleeper};
use crate::metrics::{MetricsErrorCategory, NodeMetricsCollector};
use crate::telemetry::{create_node_span, generate_correlation_id};

/// Called before each backoff sleep with `(attempt, error, delay_ms)`.
pub type RetryCallback = Arc<dyn Fn(u32, &NodeError, u64) + Send + Sync>;

/// The single terminal failure of [`with_node_retry`], whether attempts ran
/// out or the first failure was already non-retryable.
#[derive(Debug, Error)]
#[error("node '{node_name}' failed after {attempts} attempt(s) [{}]: {last_error}", .classification.category)]
pub struct NodeRetryExhaustedError {
    pub node_name: String,
    pub attempts: u32,
    #[source]
    pub last_error: NodeError,
    pub classification: ErrorClassification,
}

impl NodeRetryExhaustedError {
    pub fn is_cancelled(&self) -> bool {
        self.classification.action == RetryAction::Cancel
    }

    pub fn category(&self) -> ErrorCategory {
        self.classification.category
    }
}

/// Successful result plus what it took to get there.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    /// Failures of the earlier attempts, oldest first.
    pub errors: Vec<NodeError>,
    pub total_delay_ms: u64,
}

#[derive(Clone)]
pub struct NodeRetryOptions {
    pub config: NodeRetryConfig,
    pub node_name: String,
    pub on_retry_attempt: Option<RetryCallback>,
    pub sleeper: Arc<dyn Sleeper>,
    pub metrics: Option<Arc<NodeMetricsCollector>>,
}

impl std::fmt::Debug for NodeRetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRetryOptions")
            .field("config", &self.config)
            .field("node_name", &self.node_name)
            .field("on_retry_attempt", &self.on_retry_attempt.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl NodeRetryOptions {
    pub fn new(node_name: impl Into<String>, config: NodeRetryConfig) -> Self {
        Self {
            config,
            node_name: node_name.into(),
            on_retry_attempt: None,
            sleeper: Arc::new(TokioSleeper),
            metrics: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<NodeMetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn on_retry_attempt<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &NodeError, u64) + Send + Sync + 'static,
    {
        self.on_retry_attempt = Some(Arc::new(callback));
        self
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// uses up `max_attempts`. A `max_attempts` of zero still runs once.
pub async fn with_node_retry<T, E, F, Fut>(
    operation: F,
    options: &NodeRetryOptions,
) -> Result<RetryOutcome<T>, NodeRetryExhaustedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<NodeError>,
{
    let correlation_id = generate_correlation_id();
    let span = create_node_span(&options.node_name, &correlation_id);
    run_attempts(operation, options).instrument(span).await
}

async fn run_attempts<T, E, F, Fut>(
    mut operation: F,
    options: &NodeRetryOptions,
) -> Result<RetryOutcome<T>, NodeRetryExhaustedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<NodeError>,
{
    let max_attempts = options.config.max_attempts.max(1);
    let started = Instant::now();
    let mut errors: Vec<NodeError> = Vec::new();
    let mut total_delay_ms: u64 = 0;
    let mut attempt: u32 = 1;

    loop {
        debug!(attempt, max_attempts, "Executing node attempt");

        let failure: NodeError = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempts = attempt, total_delay_ms, "Node succeeded after retries");
                }
                if let Some(metrics) = &options.metrics {
                    metrics.record_success(&options.node_name, elapsed_ms(started));
                }
                return Ok(RetryOutcome {
                    value,
                    attempts: attempt,
                    errors,
                    total_delay_ms,
                });
            }
            Err(err) => err.into(),
        };

        let classification = classify_error(Some(&failure));

        if attempt >= max_attempts || !classification.is_retryable {
            if classification.is_retryable {
                error!(
                    attempts = attempt,
                    category = %classification.category,
                    error = %failure,
                    "Node retries exhausted"
                );
            } else {
                warn!(
                    attempts = attempt,
                    category = %classification.category,
                    reason = %classification.reason,
                    error = %failure,
                    "Node failed with non-retryable error"
                );
            }
            if let Some(metrics) = &options.metrics {
                metrics.record_failure(
                    &options.node_name,
                    elapsed_ms(started),
                    MetricsErrorCategory::from(classification.category),
                );
            }
            return Err(NodeRetryExhaustedError {
                node_name: options.node_name.clone(),
                attempts: attempt,
                last_error: failure,
                classification,
            });
        }

        let delay_ms = calculate_retry_delay(attempt, &options.config);
        total_delay_ms = total_delay_ms.saturating_add(delay_ms);

        warn!(
            attempt,
            max_attempts,
            delay_ms,
            category = %classification.category,
            error = %failure,
            "Node attempt failed, retrying"
        );

        if let Some(callback) = &options.on_retry_attempt {
            notify_retry(callback, attempt, &failure, delay_ms);
        }
        if let Some(metrics) = &options.metrics {
            metrics.record_retry(&options.node_name, attempt);
        }

        errors.push(failure);
        options.sleeper.sleep(Duration::from_millis(delay_ms)).await;
        attempt += 1;
    }
}

// A panicking callback must not take the retry loop down with it.
fn notify_retry(callback: &RetryCallback, attempt: u32, error: &NodeError, delay_ms: u64) {
    if catch_unwind(AssertUnwindSafe(|| callback(attempt, error, delay_ms))).is_err() {
        warn!(attempt, "on_retry_attempt callback panicked; ignoring");
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// Whether the executor would retry after this failure. Runs nothing.
pub fn would_retry(error: &NodeError) -> bool {
    classify_error(Some(error)).is_retryable
}

/// Per-call changes layered over a [`RetryWrapper`]'s defaults.
#[derive(Clone, Default)]
pub struct RetryOverrides {
    pub config: NodeRetryConfigOverride,
    pub node_name: Option<String>,
    pub on_retry_attempt: Option<RetryCallback>,
}

impl std::fmt::Debug for RetryOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOverrides")
            .field("config", &self.config)
            .field("node_name", &self.node_name)
            .field("on_retry_attempt", &self.on_retry_attempt.is_some())
            .finish()
    }
}

impl RetryOverrides {
    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    pub fn config(mut self, config: NodeRetryConfigOverride) -> Self {
        self.config = config;
        self
    }

    pub fn on_retry_attempt<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &NodeError, u64) + Send + Sync + 'static,
    {
        self.on_retry_attempt = Some(Arc::new(callback));
        self
    }
}

/// Reusable retry runner with shared defaults.
#[derive(Debug, Clone)]
pub struct RetryWrapper {
    defaults: NodeRetryOptions,
}

impl RetryWrapper {
    pub fn defaults(&self) -> &NodeRetryOptions {
        &self.defaults
    }

    /// Options for one call: config merged field by field, name and callback
    /// replaced when given.
    pub fn resolve(&self, overrides: &RetryOverrides) -> NodeRetryOptions {
        let mut options = self.defaults.clone();
        options.config = overrides.config.apply_to(&self.defaults.config);
        if let Some(node_name) = &overrides.node_name {
            options.node_name = node_name.clone();
        }
        if let Some(callback) = &overrides.on_retry_attempt {
            options.on_retry_attempt = Some(Arc::clone(callback));
        }
        options
    }

    pub async fn run<T, E, F, Fut>(
        &self,
        operation: F,
        overrides: RetryOverrides,
    ) -> Result<RetryOutcome<T>, NodeRetryExhaustedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<NodeError>,
    {
        let options = self.resolve(&overrides);
        with_node_retry(operation, &options).await
    }
}

pub fn create_retry_wrapper(defaults: NodeRetryOptions) -> RetryWrapper {
    RetryWrapper { defaults }
}
