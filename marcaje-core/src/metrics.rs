//! Run-scoped metrics, incremented concurrently by worker tasks.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug)]
pub struct MetricsCollector {
    inner: Mutex<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    processed: usize,
    successes: usize,
    errors: usize,
    skips: usize,
    delays_applied: usize,
    total_duration: Duration,
    started: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub processed: usize,
    pub successes: usize,
    pub errors: usize,
    pub skips: usize,
    pub success_rate: f64,
    pub delays_applied: usize,
    pub average_duration_seconds: f64,
    pub total_execution_seconds: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                processed: 0,
                successes: 0,
                errors: 0,
                skips: 0,
                delays_applied: 0,
                total_duration: Duration::ZERO,
                started: Instant::now(),
            }),
        }
    }

    pub fn record_start(&self) {
        self.inner.lock().unwrap().processed += 1;
    }

    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.successes += 1;
        inner.total_duration += duration;
    }

    pub fn record_error(&self) {
        self.inner.lock().unwrap().errors += 1;
    }

    pub fn record_skip(&self) {
        self.inner.lock().unwrap().skips += 1;
    }

    pub fn record_delay_applied(&self) {
        self.inner.lock().unwrap().delays_applied += 1;
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().unwrap();
        let success_rate = if inner.processed > 0 {
            inner.successes as f64 / inner.processed as f64
        } else {
            0.0
        };
        let average_duration_seconds = if inner.successes > 0 {
            inner.total_duration.as_secs_f64() / inner.successes as f64
        } else {
            0.0
        };
        MetricsSummary {
            processed: inner.processed,
            successes: inner.successes,
            errors: inner.errors,
            skips: inner.skips,
            success_rate,
            delays_applied: inner.delays_applied,
            average_duration_seconds,
            total_execution_seconds: inner.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_aggregates_counters() {
        let metrics = MetricsCollector::new();
        metrics.record_start();
        metrics.record_start();
        metrics.record_success(Duration::from_secs(4));
        metrics.record_success(Duration::from_secs(2));
        metrics.record_delay_applied();

        let summary = metrics.summary();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.delays_applied, 1);
        assert!((summary.success_rate - 1.0).abs() < f64::EPSILON);
        assert!((summary.average_duration_seconds - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_summary_has_zero_rates() {
        let summary = MetricsCollector::new().summary();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.average_duration_seconds, 0.0);
    }
}
