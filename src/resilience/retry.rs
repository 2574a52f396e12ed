//! Retry policy for opening streams.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{StreamError, StreamResult};

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay, including server `Retry-After`.
    pub max_delay: Duration,
    /// Delay multiplier for exponential backoff.
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Creates a retry configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, mult: f64) -> Self {
        self.multiplier = mult;
        self
    }

    /// Sets whether to use jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A configuration that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Exponential backoff that stops as soon as cancellation is signalled.
///
/// Only errors with [`StreamError::is_retryable`] are retried. The client
/// applies it to opening a stream; bytes already delivered are never
/// replayed.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails permanently, exhausts the
    /// retry budget or `cancel` fires.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> StreamResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = StreamResult<T>>,
    {
        let mut attempt = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                outcome = operation(attempt) => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.config.max_retries {
                return Err(err);
            }

            let delay = self.delay_for(attempt, &err);
            tracing::info!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying stream open"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Delay before retry number `attempt + 1`.
    fn delay_for(&self, attempt: u32, error: &StreamError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after.min(self.config.max_delay);
        }

        let base_ms = self.config.initial_delay.as_millis() as f64
            * self.config.multiplier.powi(attempt as i32);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);

        let delay_ms = if self.config.jitter {
            capped_ms * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn server_error(status: u16) -> StreamError {
        StreamError::Transport {
            message: "server error".to_string(),
            status: Some(status),
            body: None,
            retry_after: None,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new()
                .max_retries(3)
                .initial_delay(Duration::from_millis(5))
                .jitter(false),
        )
    }

    #[tokio::test]
    async fn test_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = fast()
            .execute(&CancellationToken::new(), |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(server_error(503))
                    } else {
                        Ok("open")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "open");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: StreamResult<()> = fast()
            .execute(&CancellationToken::new(), |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error(401)) }
            })
            .await;

        assert!(matches!(result, Err(StreamError::Transport { status: Some(401), .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .max_retries(2)
                .initial_delay(Duration::from_millis(5))
                .jitter(false),
        );
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = seen.clone();

        let result: StreamResult<()> = policy
            .execute(&CancellationToken::new(), |attempt| {
                record.lock().push(attempt);
                async { Err(server_error(500)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .max_retries(5)
                .initial_delay(Duration::from_secs(30))
                .jitter(false),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: StreamResult<()> = tokio::time::timeout(
            Duration::from_secs(2),
            policy.execute(&cancel, |_| async { Err(server_error(502)) }),
        )
        .await
        .expect("cancellation should interrupt backoff");

        assert!(matches!(result, Err(StreamError::Cancelled)));
    }

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .initial_delay(Duration::from_millis(100))
                .multiplier(2.0)
                .max_delay(Duration::from_secs(1))
                .jitter(false),
        );
        let error = server_error(500);

        assert_eq!(policy.delay_for(0, &error).as_millis(), 100);
        assert_eq!(policy.delay_for(1, &error).as_millis(), 200);
        assert_eq!(policy.delay_for(2, &error).as_millis(), 400);
        assert_eq!(policy.delay_for(8, &error).as_millis(), 1000);
    }

    #[test]
    fn test_retry_after_is_honoured_and_capped() {
        let policy = RetryPolicy::new(RetryConfig::new().max_delay(Duration::from_secs(5)));
        let error = StreamError::Transport {
            message: "slow down".to_string(),
            status: Some(429),
            body: None,
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(policy.delay_for(0, &error), Duration::from_secs(2));

        let error = StreamError::Transport {
            message: "slow down".to_string(),
            status: Some(429),
            body: None,
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.delay_for(0, &error), Duration::from_secs(5));
    }
}
