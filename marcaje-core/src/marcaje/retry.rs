//! Bounded retry with fixed inter-attempt backoff.
//!
//! Wraps one RUT's action attempts. The backoff between attempts is
//! unconditional: the circuit breaker is consulted once at the start of
//! the whole identifier's processing, not between retries.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::error::MarcajeResult;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    /// `retry_attempts` is the number of retries after the first
    /// attempt, so the attempt budget is `retry_attempts + 1`.
    pub fn new(retry_attempts: u32, delay_seconds: u64) -> Self {
        Self {
            max_attempts: retry_attempts as usize + 1,
            delay: Duration::from_secs(delay_seconds),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub async fn run<F, Fut, T>(&self, mut operation: F) -> MarcajeResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = MarcajeResult<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_seconds = self.delay.as_secs(),
                        error = %error,
                        "attempt failed, backing off before retry"
                    );
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marcaje::error::MarcajeError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds_with_two_backoffs() {
        let policy = RetryPolicy::new(2, 30);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);

        let started = Instant::now();
        let outcome = policy
            .run(move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(MarcajeError::Timeout("page load".into()))
                    } else {
                        Ok("clocked".to_string())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, "clocked");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two backoff waits of the configured 30s each.
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let policy = RetryPolicy::new(1, 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);

        let result = policy
            .run(move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MarcajeError::ElementNotFound("ENVIAR".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(MarcajeError::ElementNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let policy = RetryPolicy::new(0, 1);
        assert_eq!(policy.max_attempts(), 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_run = Arc::clone(&calls);

        let result = policy
            .run(move |_| {
                let calls = Arc::clone(&calls_for_run);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(MarcajeError::Unexpected("boom".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
