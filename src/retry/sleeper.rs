// Sleep capability injected into the retry executor

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Suspends the caller between retry attempts.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real waits on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct InstantSleeper {
    requested: Mutex<Vec<Duration>>,
}

impl InstantSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }

    pub fn requested_ms(&self) -> Vec<u64> {
        self.requested()
            .iter()
            .map(|delay| delay.as_millis() as u64)
            .collect()
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, delay: Duration) {
        if let Ok(mut delays) = self.requested.lock() {
            delays.push(delay);
        }
    }
}
