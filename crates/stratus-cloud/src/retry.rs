//! Remote call retry wrapper
//!
//! Retries a single remote call while it fails with a transient status and
//! the caller's deadline has not elapsed. Everything else is terminal.

use crate::error::{CloudError, Result};
use crate::status::StatusCode;
use adaptive_backoff::prelude::{
    Backoff, BackoffBuilder, ExponentialBackoff, ExponentialBackoffBuilder,
};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};

/// Retry configuration for provider operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; `None` retries until the deadline
    pub max_attempts: Option<u32>,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Fresh exponential schedule between `initial_delay` and `max_delay`
    pub fn backoff(&self) -> Result<ExponentialBackoff> {
        ExponentialBackoffBuilder::default()
            .factor(self.backoff_multiplier)
            .min(self.initial_delay)
            .max(self.max_delay)
            .build()
            .map_err(|e| CloudError::invalid_config(format!("invalid retry backoff: {e}")))
    }
}

/// Outcome of classifying a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Transient,
    Terminal,
}

/// Only `UNAVAILABLE` from the remote side is worth another attempt.
pub fn classify(err: &CloudError) -> Retry {
    match err {
        CloudError::Api {
            status: StatusCode::Unavailable,
            ..
        } => Retry::Transient,
        _ => Retry::Terminal,
    }
}

/// Run `op` until it succeeds, fails terminally, or `timeout` elapses.
pub async fn retry_with<T, F, Fut, C>(
    config: &RetryConfig,
    timeout: Duration,
    classify: C,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&CloudError) -> Retry,
{
    let deadline = Instant::now() + timeout;
    let mut backoff = config.backoff()?;
    let mut attempt: u32 = 0;

    loop {
        let err = match timeout_at(deadline, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => {
                return Err(CloudError::Timeout(format!(
                    "remote call did not complete within {}",
                    humantime::format_duration(timeout)
                )));
            }
        };

        if classify(&err) == Retry::Terminal {
            return Err(err);
        }

        attempt += 1;
        if config.max_attempts.is_some_and(|max| attempt >= max) {
            tracing::debug!(attempt, "Giving up after maximum attempts: {}", err);
            return Err(err);
        }

        let delay = backoff.wait();
        if Instant::now() + delay >= deadline {
            return Err(CloudError::Timeout(format!(
                "gave up after {} attempt(s) within {}: {}",
                attempt,
                humantime::format_duration(timeout),
                err
            )));
        }

        tracing::debug!(attempt, ?delay, "Retrying transient failure: {}", err);
        sleep(delay).await;
    }
}

/// [`retry_with`] using the default classification.
pub async fn retry_on_unavailable<T, F, Fut>(
    config: &RetryConfig,
    timeout: Duration,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with(config, timeout, classify, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> CloudError {
        CloudError::api(StatusCode::Unavailable, "service unavailable")
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };
        let mut backoff = config.backoff().unwrap();

        let delays: Vec<Duration> = (0..50).map(|_| backoff.wait()).collect();

        assert!(delays[0] >= Duration::from_secs(1));
        assert!(delays[0] <= Duration::from_secs(2));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
        assert_eq!(delays[49], Duration::from_secs(10));
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert_eq!(classify(&unavailable()), Retry::Transient);
        for status in [
            StatusCode::NotFound,
            StatusCode::InvalidArgument,
            StatusCode::PermissionDenied,
            StatusCode::Internal,
            StatusCode::DeadlineExceeded,
        ] {
            assert_eq!(classify(&CloudError::api(status, "x")), Retry::Terminal);
        }
        assert_eq!(classify(&CloudError::Timeout("t".into())), Retry::Terminal);
        assert_eq!(
            classify(&CloudError::OperationFailed {
                id: "op".into(),
                status: StatusCode::Unavailable,
                message: "x".into(),
            }),
            Retry::Terminal
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_on_unavailable(&RetryConfig::default(), Duration::from_secs(60), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> =
            retry_on_unavailable(&RetryConfig::default(), Duration::from_secs(60), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CloudError::api(StatusCode::NotFound, "gone"))
                }
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_into_timeout() {
        let result: Result<()> =
            retry_on_unavailable(&RetryConfig::default(), Duration::from_secs(5), || async {
                Err(unavailable())
            })
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_hits_deadline() {
        let result: Result<()> =
            retry_on_unavailable(&RetryConfig::default(), Duration::from_secs(1), || async {
                sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = RetryConfig::default().with_max_attempts(2);

        let result: Result<()> = retry_on_unavailable(&config, Duration::from_secs(600), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(CloudError::Api { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
