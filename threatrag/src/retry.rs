use std::future::Future;
use std::time::Duration;

use crate::error::{RagError, Result};

/// Bounded retry with exponential backoff and a per-attempt timeout.
///
/// `max_attempts` counts every attempt, including the first. The delay before
/// attempt `n` (1-based, `n >= 2`) is `base_delay * 2^(n-2)`, capped at
/// `max_delay`. A rate-limit error carrying `retry_after` waits at least that
/// long, still capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            call_timeout,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for(&self, attempt: u32, error: &RagError) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        let backoff = self.base_delay.saturating_mul(2_u32.pow(exponent));
        let hinted = match error {
            RagError::EmbeddingRateLimit {
                retry_after: Some(secs),
            }
            | RagError::LlmRateLimit {
                retry_after: Some(secs),
            } => Duration::from_secs(*secs),
            _ => Duration::ZERO,
        };
        backoff.max(hinted).min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RagError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    self.call_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt + 1, &error);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying upstream call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
