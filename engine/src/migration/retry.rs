use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::services::client::ClientError;

/// Errors the retry loop can classify
pub trait Retryable: fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-requested wait before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ClientError {
    fn is_transient(&self) -> bool {
        ClientError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY.max(base_delay),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after failed attempt number `attempt` (1-based): base × 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Wait before the next attempt, honouring a server hint up to `max_delay`
    fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.delay_for(attempt);
        retry_after
            .map_or(backoff, |wait| wait.max(backoff))
            .min(self.max_delay)
    }
}

/// One failed attempt, reported to the retry callback
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub operation: String,
    pub attempt: u32,
    pub max_attempts: u32,
    /// None when no further attempt will be made
    pub next_delay: Option<Duration>,
    pub error: String,
}

pub type RetryCallback = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Default callback: one warning per failed attempt
pub fn log_retry() -> RetryCallback {
    Arc::new(|attempt: &RetryAttempt| match attempt.next_delay {
        Some(delay) => warn!(
            "{} failed (attempt {}/{}), retrying in {:?}: {}",
            attempt.operation, attempt.attempt, attempt.max_attempts, delay, attempt.error
        ),
        None => warn!(
            "{} failed (attempt {}/{}), giving up: {}",
            attempt.operation, attempt.attempt, attempt.max_attempts, attempt.error
        ),
    })
}

/// Final error plus how many attempts were made
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub error: E,
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    on_retry: &RetryCallback,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retry = error.is_transient() && attempt < policy.max_attempts;
                let next_delay = retry.then(|| policy.next_delay(attempt, error.retry_after()));

                on_retry(&RetryAttempt {
                    operation: operation.to_string(),
                    attempt,
                    max_attempts: policy.max_attempts,
                    next_delay,
                    error: error.to_string(),
                });

                match next_delay {
                    Some(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => return Err(RetryExhausted { attempts: attempt, error }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn recording() -> (RetryCallback, Arc<Mutex<Vec<RetryAttempt>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: RetryCallback = Arc::new(move |attempt: &RetryAttempt| {
            sink.lock().unwrap().push(attempt.clone());
        });
        (callback, seen)
    }

    fn unavailable() -> ClientError {
        ClientError::from_status("getBlob", 503, "", None)
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);

        let capped =
            RetryPolicy::new(10, Duration::from_secs(1)).with_max_delay(Duration::from_secs(5));
        assert_eq!(capped.delay_for(8), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped() {
        let start = tokio::time::Instant::now();
        let (callback, seen) = recording();
        let policy = RetryPolicy::new(3, Duration::ZERO).with_max_delay(Duration::from_secs(2));

        let result: Result<(), _> = retry_with_backoff(policy, "getRepo", &callback, || async {
            Err(ClientError::RateLimited {
                operation: "getRepo".to_string(),
                retry_after_secs: Some(600),
            })
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(seen.lock().unwrap()[0].next_delay, Some(Duration::from_secs(2)));
        // Two capped waits, not 600s each
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let (callback, seen) = recording();

        let result = retry_with_backoff(
            RetryPolicy::new(3, Duration::ZERO),
            "getBlob",
            &callback,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("blob")
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "blob");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let (callback, seen) = recording();

        let result: Result<(), _> = retry_with_backoff(
            RetryPolicy::new(5, Duration::ZERO),
            "importRepo",
            &callback,
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::from_status("importRepo", 400, "", None))
            },
        )
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0].next_delay, None);
    }

    #[tokio::test]
    async fn test_attempt_cap() {
        let (callback, seen) = recording();
        let result: Result<(), _> = retry_with_backoff(
            RetryPolicy::new(5, Duration::ZERO),
            "getBlob",
            &callback,
            || async { Err(unavailable()) },
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen[..4].iter().all(|a| a.next_delay.is_some()));
        assert!(seen[4].next_delay.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts() {
        let start = tokio::time::Instant::now();
        let (callback, _) = recording();
        let result: Result<(), _> = retry_with_backoff(
            RetryPolicy::new(3, Duration::from_secs(1)),
            "getRepo",
            &callback,
            || async { Err(unavailable()) },
        )
        .await;

        assert!(result.is_err());
        // 1s + 2s
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
