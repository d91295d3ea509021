//! Per-RUT orchestration: exception gate, circuit gate, randomized
//! delay, retried execution, then exactly one notification.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::delay::DelayCoordinator;
use crate::metrics::MetricsCollector;
use crate::notify::Notifier;
use crate::rut;
use crate::telemetry::{RunEvent, RunTelemetry};

use super::error::MarcajeError;
use super::executor::ClockExecutor;
use super::retry::RetryPolicy;
use super::ActionKind;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RutOutcome {
    Success {
        action: ActionKind,
        duration_seconds: f64,
    },
    Skipped,
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RutReport {
    pub rut_masked: String,
    pub correlation_id: String,
    #[serde(flatten)]
    pub outcome: RutOutcome,
}

pub struct MarcajeService {
    executor: Arc<dyn ClockExecutor>,
    notifier: Arc<dyn Notifier>,
    breaker: Arc<CircuitBreaker>,
    delays: Arc<DelayCoordinator>,
    metrics: Option<Arc<MetricsCollector>>,
    telemetry: Arc<RunTelemetry>,
    retry: RetryPolicy,
    exception_ruts: Vec<String>,
    debug_mode: bool,
}

impl std::fmt::Debug for MarcajeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarcajeService")
            .field("retry", &self.retry)
            .field("exception_ruts", &self.exception_ruts.len())
            .field("debug_mode", &self.debug_mode)
            .finish()
    }
}

impl MarcajeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        executor: Arc<dyn ClockExecutor>,
        notifier: Arc<dyn Notifier>,
        breaker: Arc<CircuitBreaker>,
        delays: Arc<DelayCoordinator>,
        metrics: Option<Arc<MetricsCollector>>,
        telemetry: Arc<RunTelemetry>,
    ) -> Self {
        Self {
            executor,
            notifier,
            breaker,
            delays,
            metrics,
            telemetry,
            retry: RetryPolicy::new(
                config.execution.retry_attempts,
                config.execution.retry_delay_seconds,
            ),
            exception_ruts: config.exception_ruts.clone(),
            debug_mode: config.debug_mode,
        }
    }

    /// Runs the whole lifecycle of one identifier. Never panics and
    /// never returns an error: every path ends in a report, and the
    /// one-notification-per-identifier rule holds on all of them.
    pub async fn process(&self, rut_value: &str) -> RutReport {
        let correlation_id = Uuid::new_v4().to_string();
        let masked = rut::mask(rut_value);
        info!(rut = %masked, correlation_id = %correlation_id, "processing identifier");

        self.log_event(&RunEvent::RutStarted {
            rut_masked: masked.clone(),
            correlation_id: correlation_id.clone(),
        });

        if rut::is_exception(rut_value, &self.exception_ruts) {
            return self.finish_skipped(rut_value, masked, correlation_id).await;
        }

        if !self.breaker.can_execute() {
            warn!(rut = %masked, "circuit breaker open, rejecting identifier");
            return self
                .finish_failed(
                    rut_value,
                    masked,
                    correlation_id,
                    None,
                    MarcajeError::CircuitOpen.to_string(),
                )
                .await;
        }

        // Only identifiers that reach the attempt pipeline count as
        // processed; skips and rejections stay out of the success rate.
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }

        self.apply_delay(rut_value, &masked).await;

        let action = ActionKind::current();
        let started = Instant::now();
        let executor = Arc::clone(&self.executor);
        let attempt_result = self
            .retry
            .run(|_| {
                let executor = Arc::clone(&executor);
                async move { executor.perform(rut_value, action).await }
            })
            .await;
        let duration = started.elapsed();

        match attempt_result {
            Ok(outcome) => {
                self.breaker.record_success();
                self.finish_success(
                    rut_value,
                    masked,
                    correlation_id,
                    action,
                    duration,
                    outcome.attempts,
                    &outcome.result,
                )
                .await
            }
            Err(err) => {
                self.breaker.record_failure();
                self.finish_failed(
                    rut_value,
                    masked,
                    correlation_id,
                    Some(action),
                    err.to_string(),
                )
                .await
            }
        }
    }

    /// Debug runs skip the delay entirely; production runs sleep the
    /// assigned number of minutes before touching the portal.
    async fn apply_delay(&self, rut_value: &str, masked: &str) {
        if self.debug_mode {
            info!(rut = %masked, "debug mode, skipping randomized delay");
            return;
        }
        let minutes = self.delays.assign(rut_value);
        if let Some(metrics) = &self.metrics {
            metrics.record_delay_applied();
        }
        sleep(Duration::from_secs(minutes * 60)).await;
    }

    async fn finish_skipped(
        &self,
        rut_value: &str,
        masked: String,
        correlation_id: String,
    ) -> RutReport {
        info!(rut = %masked, "identifier is an exception, skipping");
        if let Some(metrics) = &self.metrics {
            metrics.record_skip();
        }
        if let Err(err) = self.notifier.send_skip(rut_value).await {
            warn!(rut = %masked, error = %err, "skip notification failed");
        }
        self.log_event(&RunEvent::RutSkipped {
            rut_masked: masked.clone(),
            correlation_id: correlation_id.clone(),
        });
        RutReport {
            rut_masked: masked,
            correlation_id,
            outcome: RutOutcome::Skipped,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_success(
        &self,
        rut_value: &str,
        masked: String,
        correlation_id: String,
        action: ActionKind,
        duration: Duration,
        attempts: usize,
        detail: &str,
    ) -> RutReport {
        info!(
            rut = %masked,
            %action,
            attempts,
            duration_seconds = duration.as_secs_f64(),
            "clock action succeeded"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_success(duration);
        }
        if let Err(err) = self.notifier.send_success(rut_value, action, detail).await {
            warn!(rut = %masked, error = %err, "success notification failed");
        }
        self.log_event(&RunEvent::RutCompleted {
            rut_masked: masked.clone(),
            correlation_id: correlation_id.clone(),
            action: action.to_string(),
            duration_seconds: duration.as_secs_f64(),
        });
        RutReport {
            rut_masked: masked,
            correlation_id,
            outcome: RutOutcome::Success {
                action,
                duration_seconds: duration.as_secs_f64(),
            },
        }
    }

    async fn finish_failed(
        &self,
        rut_value: &str,
        masked: String,
        correlation_id: String,
        action: Option<ActionKind>,
        reason: String,
    ) -> RutReport {
        error!(rut = %masked, error = %reason, "clock action failed");
        if let Some(metrics) = &self.metrics {
            metrics.record_error();
        }
        if let Err(err) = self.notifier.send_failure(rut_value, action, &reason).await {
            warn!(rut = %masked, error = %err, "failure notification failed");
        }
        self.log_event(&RunEvent::RutFailed {
            rut_masked: masked.clone(),
            correlation_id: correlation_id.clone(),
            error: reason.clone(),
        });
        RutReport {
            rut_masked: masked,
            correlation_id,
            outcome: RutOutcome::Failed { error: reason },
        }
    }

    fn log_event(&self, event: &RunEvent) {
        if let Err(err) = self.telemetry.record(event) {
            warn!(error = %err, "telemetry write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holiday::{Holiday, HolidaySource};
    use crate::marcaje::error::{MarcajeError, MarcajeResult};
    use crate::notify::{Notifier, NotifyError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_success(
            &self,
            rut_value: &str,
            action: ActionKind,
            _detail: &str,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("success:{}:{action}", rut::mask(rut_value)));
            Ok(())
        }

        async fn send_failure(
            &self,
            rut_value: &str,
            action: Option<ActionKind>,
            _error: &str,
        ) -> Result<(), NotifyError> {
            let label = action
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "MARCAJE".to_string());
            self.sent
                .lock()
                .unwrap()
                .push(format!("failure:{}:{label}", rut::mask(rut_value)));
            Ok(())
        }

        async fn send_skip(&self, rut_value: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("skip:{}", rut::mask(rut_value)));
            Ok(())
        }

        async fn send_holiday(
            &self,
            holiday: &Holiday,
            _source: HolidaySource,
        ) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("holiday:{}", holiday.title));
            Ok(())
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CountingExecutor {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
            }
        }

        fn failing_always() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: usize::MAX,
            }
        }
    }

    #[async_trait]
    impl ClockExecutor for CountingExecutor {
        async fn perform(&self, _rut: &str, kind: ActionKind) -> MarcajeResult<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(MarcajeError::Timeout("portal".into()))
            } else {
                Ok(format!("done:{kind}"))
            }
        }
    }

    fn test_config() -> Config {
        let mut config = Config {
            clock_in_active: true,
            debug_mode: true,
            active_ruts: vec!["11111111k".into(), "222222222".into()],
            exception_ruts: vec!["222222222".into()],
            email_address: "primary@example.com".into(),
            email_pass: "secret".into(),
            special_rut: None,
            special_email: None,
            execution: Default::default(),
        };
        config.execution.retry_attempts = 1;
        config.execution.retry_delay_seconds = 1;
        config
    }

    struct Fixture {
        service: MarcajeService,
        notifier: Arc<RecordingNotifier>,
        executor: Arc<CountingExecutor>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsCollector>,
        _dir: tempfile::TempDir,
    }

    fn fixture(config: Config, executor: CountingExecutor) -> Fixture {
        let dir = tempdir().unwrap();
        let telemetry = Arc::new(RunTelemetry::new(dir.path(), "test").unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = Arc::new(executor);
        let breaker = Arc::new(CircuitBreaker::new(
            config.execution.circuit_breaker_threshold,
            Duration::from_secs(60),
        ));
        let metrics = Arc::new(MetricsCollector::new());
        let service = MarcajeService::new(
            &config,
            Arc::clone(&executor) as Arc<dyn ClockExecutor>,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&breaker),
            Arc::new(DelayCoordinator::new()),
            Some(Arc::clone(&metrics)),
            telemetry,
        );
        Fixture {
            service,
            notifier,
            executor,
            breaker,
            metrics,
            _dir: dir,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_sends_one_success_notification() {
        let fx = fixture(test_config(), CountingExecutor::succeeding());
        let report = fx.service.process("11111111k").await;

        assert!(matches!(report.outcome, RutOutcome::Success { .. }));
        assert_eq!(report.rut_masked, "1111*****");
        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("success:1111*****"));
        assert_eq!(fx.metrics.summary().successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exception_skips_without_touching_the_executor() {
        let fx = fixture(test_config(), CountingExecutor::succeeding());
        let report = fx.service.process("222222222").await;

        assert!(matches!(report.outcome, RutOutcome::Skipped));
        assert_eq!(fx.executor.calls.load(Ordering::SeqCst), 0);
        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent, vec!["skip:2222*****".to_string()]);
        assert_eq!(fx.metrics.summary().skips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_and_trip_the_breaker() {
        let fx = fixture(test_config(), CountingExecutor::failing_always());
        let report = fx.service.process("11111111k").await;

        assert!(matches!(report.outcome, RutOutcome::Failed { .. }));
        // retry_attempts = 1, so two attempts total.
        assert_eq!(fx.executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.breaker.snapshot().failure_count, 1);
        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        // The action kind was determined, so the notification names it.
        assert!(sent[0].starts_with("failure:1111*****:"));
        assert!(!sent[0].ends_with(":MARCAJE"));
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_without_attempting() {
        let fx = fixture(test_config(), CountingExecutor::succeeding());
        for _ in 0..3 {
            fx.breaker.record_failure();
        }

        let report = fx.service.process("11111111k").await;
        match &report.outcome {
            RutOutcome::Failed { error } => assert!(error.contains("circuit breaker")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(fx.executor.calls.load(Ordering::SeqCst), 0);
        // A rejection is not an attempt outcome; the count stays put.
        assert_eq!(fx.breaker.snapshot().failure_count, 3);
        let sent = fx.notifier.sent.lock().unwrap().clone();
        // No action kind was determined; the fallback label is used.
        assert_eq!(sent, vec!["failure:1111*****:MARCAJE".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_and_rejections_stay_out_of_the_processed_count() {
        let fx = fixture(test_config(), CountingExecutor::succeeding());
        fx.service.process("222222222").await;

        let summary = fx.metrics.summary();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.skips, 1);

        for _ in 0..3 {
            fx.breaker.record_failure();
        }
        fx.service.process("11111111k").await;
        let summary = fx.metrics.summary();
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn production_mode_applies_the_randomized_delay() {
        let mut config = test_config();
        config.debug_mode = false;
        let fx = fixture(config, CountingExecutor::succeeding());

        let started = Instant::now();
        let report = fx.service.process("11111111k").await;
        assert!(matches!(report.outcome, RutOutcome::Success { .. }));
        // At least the one-minute floor of the delay window passed.
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(fx.metrics.summary().delays_applied, 1);
    }
}
