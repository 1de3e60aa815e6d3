// Node failures and the retry decision for each of them.
//
// Failures are a closed enum; `classify_error` is the single dispatch from a
// failure to what the executor should do about it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::ValidationError;

/// Message fragments (lower-case) that mark a transient network failure.
const NETWORK_PATTERNS: &[&str] = &[
    "econnrefused",
    "connection refused",
    "econnreset",
    "connection reset",
    "enotfound",
    "dns",
    "etimedout",
    "timed out",
    "ehostunreach",
    "enetunreach",
    "unreachable",
    "socket hang up",
    "network error",
    "fetch failed",
];

/// Message fragments (lower-case) that mark throttling by a downstream service.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "quota exceeded",
    "throttled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Programming,
    Timeout,
    Cancellation,
    CircuitOpen,
    Network,
    RateLimit,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Validation,
        ErrorCategory::Programming,
        ErrorCategory::Timeout,
        ErrorCategory::Cancellation,
        ErrorCategory::CircuitOpen,
        ErrorCategory::Network,
        ErrorCategory::RateLimit,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Programming => "programming",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancellation => "cancellation",
            ErrorCategory::CircuitOpen => "circuit_open",
            ErrorCategory::Network => "network",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Error code written into a story's error records.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "VALIDATION_ERROR",
            ErrorCategory::Programming => "PROGRAMMING_ERROR",
            ErrorCategory::Timeout => "TIMEOUT",
            ErrorCategory::Cancellation => "CANCELLED",
            ErrorCategory::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCategory::Network => "NETWORK_ERROR",
            ErrorCategory::RateLimit => "RATE_LIMITED",
            ErrorCategory::Unknown => "RETRY_EXHAUSTED",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryAction {
    Retry,
    Fail,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub is_retryable: bool,
    pub category: ErrorCategory,
    pub action: RetryAction,
    pub reason: String,
}

impl ErrorClassification {
    fn retry(category: ErrorCategory, reason: &str) -> Self {
        Self {
            is_retryable: true,
            category,
            action: RetryAction::Retry,
            reason: reason.to_string(),
        }
    }

    fn stop(category: ErrorCategory, action: RetryAction, reason: &str) -> Self {
        Self {
            is_retryable: false,
            category,
            action,
            reason: reason.to_string(),
        }
    }
}

/// Kind of logic fault raised inside a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgrammingFault {
    Type,
    Reference,
    Syntax,
}

impl std::fmt::Display for ProgrammingFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgrammingFault::Type => write!(f, "type"),
            ProgrammingFault::Reference => write!(f, "reference"),
            ProgrammingFault::Syntax => write!(f, "syntax"),
        }
    }
}

/// Everything a node operation can fail with.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{fault} error: {message}")]
    Programming {
        fault: ProgrammingFault,
        message: String,
    },

    #[error("operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("operation was cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("circuit '{circuit}' is open")]
    CircuitOpen { circuit: String },

    #[error("{message}")]
    Failure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl NodeError {
    pub fn failure(message: impl Into<String>) -> Self {
        NodeError::Failure {
            message: message.into(),
            source: None,
        }
    }

    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        NodeError::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        NodeError::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn circuit_open(circuit: impl Into<String>) -> Self {
        NodeError::CircuitOpen {
            circuit: circuit.into(),
        }
    }

    pub fn programming(fault: ProgrammingFault, message: impl Into<String>) -> Self {
        NodeError::Programming {
            fault,
            message: message.into(),
        }
    }

    pub fn classify(&self) -> ErrorClassification {
        classify_error(Some(self))
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Validation(ValidationError::from(err))
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Failure {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Failure {
            message: format!("{err:#}"),
            source: Some(err.into()),
        }
    }
}

/// Decide what to do about a failure. `None` stands for a failure that
/// carried no error value at all and is treated as a transient unknown.
///
/// Precedence: validation, programming, timeout, cancellation, circuit open,
/// then network and rate-limit message patterns, then unknown.
pub fn classify_error(error: Option<&NodeError>) -> ErrorClassification {
    let Some(error) = error else {
        return ErrorClassification::retry(
            ErrorCategory::Unknown,
            "no error value provided; retrying as a transient failure",
        );
    };

    match error {
        NodeError::Validation(_) => ErrorClassification::stop(
            ErrorCategory::Validation,
            RetryAction::Fail,
            "schema validation failed; retrying cannot change the input",
        ),
        NodeError::Programming { .. } => ErrorClassification::stop(
            ErrorCategory::Programming,
            RetryAction::Fail,
            "programming error in node implementation",
        ),
        NodeError::Timeout { .. } => {
            ErrorClassification::retry(ErrorCategory::Timeout, "operation timed out")
        }
        NodeError::Cancelled { .. } => ErrorClassification::stop(
            ErrorCategory::Cancellation,
            RetryAction::Cancel,
            "operation was cancelled",
        ),
        NodeError::CircuitOpen { .. } => ErrorClassification::stop(
            ErrorCategory::CircuitOpen,
            RetryAction::Fail,
            "circuit breaker is open",
        ),
        NodeError::Failure { message, .. } => classify_message(message),
    }
}

fn classify_message(message: &str) -> ErrorClassification {
    let lowered = message.to_lowercase();

    if NETWORK_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ErrorClassification::retry(ErrorCategory::Network, "transient network failure")
    } else if RATE_LIMIT_PATTERNS.iter().any(|p| lowered.contains(p)) {
        ErrorClassification::retry(ErrorCategory::RateLimit, "rate limited by downstream service")
    } else {
        ErrorClassification::retry(
            ErrorCategory::Unknown,
            "unrecognized failure; retrying as a transient failure",
        )
    }
}

pub fn is_retryable_node_error(error: Option<&NodeError>) -> bool {
    classify_error(error).is_retryable
}

pub fn get_error_category(error: Option<&NodeError>) -> ErrorCategory {
    classify_error(error).category
}
