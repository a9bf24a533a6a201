//! Bounded retry with exponential backoff for durable writes.

use std::time::Duration;

use tf_core::config::PipelineConfig;
use tf_core::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn from_pipeline(cfg: &PipelineConfig) -> Self {
        Self {
            max_retries: cfg.persistence_retries,
            base_delay: cfg.persistence_retry_base(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation`, retrying transient failures with backoff.
///
/// Errors that are not [`tf_core::Error::is_transient`] are returned at once;
/// the last transient error is returned when the retries run out.
pub async fn retry_transient<T, F>(config: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0u32;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(
                    "{operation_name} attempt {attempt} failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        "{operation_name} failed after {} attempts: {e}",
                        attempt + 1
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tf_core::Error;

    fn fast() -> RetryConfig {
        RetryConfig::default().with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let cfg = RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = retry_transient(&fast(), "write", || {
            calls += 1;
            if calls < 3 {
                Err(Error::database("database is locked"))
            } else {
                Ok(calls)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<()> = retry_transient(&fast().with_max_retries(2), "write", || {
            calls += 1;
            Err(Error::database("disk I/O error"))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<()> = retry_transient(&fast(), "write", || {
            calls += 1;
            Err(Error::not_found("job", "x"))
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(calls, 1);
    }
}
