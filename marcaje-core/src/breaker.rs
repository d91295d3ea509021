//! Circuit breaker guarding the portal action.
//!
//! One instance is shared across every RUT of a run. Repeated failures
//! open the circuit and suspend further attempts until the reset
//! timeout elapses, after which a single probing attempt is allowed.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub threshold: u32,
    pub last_failure_age_secs: Option<u64>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Gate check before an identifier's processing starts. An open
    /// circuit transitions to half-open once the reset timeout has
    /// elapsed since the last failure, admitting one probing attempt.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner.last_failure.map(|at| at.elapsed());
                if matches!(elapsed, Some(age) if age > self.reset_timeout) {
                    inner.state = BreakerState::HalfOpen;
                    info!("circuit breaker reset timeout elapsed, moving to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    failures = inner.failure_count,
                    threshold = self.threshold,
                    "circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            threshold: self.threshold,
            last_failure_age_secs: inner.last_failure.map(|at| at.elapsed().as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.can_execute());

        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert!(!breaker.can_execute());
        assert_eq!(breaker.snapshot().state, BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_opens_only_after_reset_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();
        assert!(!breaker.can_execute());

        advance(Duration::from_secs(30)).await;
        assert!(!breaker.can_execute());

        advance(Duration::from_secs(31)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.snapshot().state, BreakerState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn success_closes_from_half_open() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        advance(Duration::from_secs(11)).await;
        assert!(breaker.can_execute());

        breaker.record_success();
        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        advance(Duration::from_secs(11)).await;
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert!(!breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn success_interleaved_resets_the_counter() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.can_execute());
    }
}
