// Retry configuration and backoff delay calculation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backoff settings for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub backoff_ms: u64,
    /// Exponential base applied per attempt.
    pub backoff_multiplier: f64,
    /// Cap on the exponential part of the delay.
    pub max_backoff_ms: u64,
    /// Fraction of the capped delay added as random jitter, in `[0, 1]`.
    pub jitter_factor: f64,
}

impl Default for NodeRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            jitter_factor: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryConfigError {
    #[error("Invalid retry configuration: maxAttempts must be at least 1")]
    MaxAttempts,
    #[error("Invalid retry configuration: backoffMultiplier must be at least 1 (got {0})")]
    Multiplier(f64),
    #[error("Invalid retry configuration: maxBackoffMs ({max}) must be at least backoffMs ({initial})")]
    BackoffCap { initial: u64, max: u64 },
    #[error("Invalid retry configuration: jitterFactor must be within [0, 1] (got {0})")]
    Jitter(f64),
}

impl NodeRetryConfig {
    /// Single attempt, no backoff.
    pub fn simple() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// For calls to language-model providers: slow, rate limited, flaky.
    pub fn llm() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            jitter_factor: 0.25,
        }
    }

    /// For local tool invocations that fail fast.
    pub fn tool() -> Self {
        Self {
            max_attempts: 2,
            backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
            jitter_factor: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff_ms: u64, multiplier: f64, max_backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self.backoff_multiplier = multiplier;
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_attempts < 1 {
            return Err(RetryConfigError::MaxAttempts);
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(RetryConfigError::Multiplier(self.backoff_multiplier));
        }
        if self.max_backoff_ms < self.backoff_ms {
            return Err(RetryConfigError::BackoffCap {
                initial: self.backoff_ms,
                max: self.max_backoff_ms,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(RetryConfigError::Jitter(self.jitter_factor));
        }
        Ok(())
    }

    /// Upper bound on any delay this config can produce.
    pub fn max_delay_ms(&self) -> u64 {
        (self.max_backoff_ms as f64 * (1.0 + self.jitter_factor.max(0.0))).floor() as u64
    }
}

/// Partial config; set fields replace the base values one by one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRetryConfigOverride {
    pub max_attempts: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_ms: Option<u64>,
    pub jitter_factor: Option<f64>,
}

impl NodeRetryConfigOverride {
    pub fn apply_to(&self, base: &NodeRetryConfig) -> NodeRetryConfig {
        NodeRetryConfig {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            backoff_ms: self.backoff_ms.unwrap_or(base.backoff_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            max_backoff_ms: self.max_backoff_ms.unwrap_or(base.max_backoff_ms),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
        }
    }
}

/// Delay before the retry that follows failed attempt `attempt` (1-based).
///
/// `backoff_ms * multiplier^(attempt-1)`, capped at `max_backoff_ms`, plus up
/// to `jitter_factor` of the capped value at random.
pub fn calculate_retry_delay(attempt: u32, config: &NodeRetryConfig) -> u64 {
    calculate_retry_delay_with_rng(attempt, config, &mut rand::rng())
}

/// [`calculate_retry_delay`] with a caller-supplied random source.
pub fn calculate_retry_delay_with_rng<R>(attempt: u32, config: &NodeRetryConfig, rng: &mut R) -> u64
where
    R: Rng,
{
    // Exponent capped so the float math stays finite for absurd attempt counts.
    const MAX_EXPONENT: i32 = 62;
    let exponent = i32::try_from(attempt.saturating_sub(1)).map_or(MAX_EXPONENT, |e| e.min(MAX_EXPONENT));

    let exponential = config.backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
    let capped = exponential.min(config.max_backoff_ms as f64);

    if config.jitter_factor > 0.0 {
        let jitter = rng.random::<f64>() * config.jitter_factor * capped;
        (capped + jitter).floor() as u64
    } else {
        capped.floor() as u64
    }
}
