// Exponential backoff for the startup connection loop

use crate::config::RetryConfig;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Delay before retry number `attempt` (0-based): `initial * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.initial_delay, self.max_delay)
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Outcome of a retry loop that ran out of attempts
#[derive(Debug)]
pub struct RetriesExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `operation` up to `policy.max_retries` times, sleeping between failures.
///
/// No sleep follows the final failed attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetriesExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        match operation(attempt + 1).await {
            Ok(value) => {
                info!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    "Operation succeeded"
                );
                return Ok(value);
            }
            Err(e) if attempt + 1 >= max_attempts => {
                return Err(RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %e,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const SEC: Duration = Duration::from_secs(1);

    #[test]
    fn test_delay_doubles_until_cap() {
        let cap = Duration::from_secs(30);
        let delays: Vec<u64> = (0..7).map(|n| backoff_delay(n, SEC, cap).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_delay_does_not_overflow() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(40, SEC, cap), cap);
        assert_eq!(backoff_delay(u32::MAX, Duration::from_secs(u64::MAX / 2), cap), cap);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = BackoffPolicy::from(&RetryConfig {
            max_retries: 5,
            initial_delay_ms: 250,
            max_delay_ms: 1_000,
        });
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
    }

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            initial_delay: SEC,
            max_delay: Duration::from_secs(4),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = retry_with_backoff(&policy(10), "connect", move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err("connection refused")
                } else {
                    Ok("pool")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "pool");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_budget() {
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = retry_with_backoff(&policy(4), "connect", |attempt| async move {
            Err(format!("attempt {} refused", attempt))
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 4);
        assert_eq!(exhausted.last_error, "attempt 4 refused");
        // Sleeps after attempts 1..3 only: 1s + 2s + 4s
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }
}
