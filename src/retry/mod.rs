// Node retry: failure classification, backoff configuration and the executor.

pub mod classification;
pub mod config;
pub mod executor;
pub mod sleeper;

pub use classification::{
    classify_error, get_error_category, is_retryable_node_error, ErrorCategory,
    ErrorClassification, NodeError, ProgrammingFault, RetryAction,
};
pub use config::{
    calculate_retry_delay, calculate_retry_delay_with_rng, NodeRetryConfig,
    NodeRetryConfigOverride, RetryConfigError,
};
pub use executor::{
    create_retry_wrapper, with_node_retry, would_retry, NodeRetryExhaustedError,
    NodeRetryOptions, RetryCallback, RetryOutcome, RetryOverrides, RetryWrapper,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper};

#[cfg(any(test, feature = "testing"))]
pub use sleeper::MockSleeper;
