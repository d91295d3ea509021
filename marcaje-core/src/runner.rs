//! Whole-run coordination: the holiday gate, the worker pool, and the
//! final statistics.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::Config;
use crate::delay::{DelayCoordinator, DelayStatistics};
use crate::holiday::{Holiday, HolidayCheck, HolidaySource};
use crate::marcaje::{MarcajeService, RutOutcome, RutReport};
use crate::metrics::{MetricsCollector, MetricsSummary};
use crate::notify::Notifier;
use crate::telemetry::{RunEvent, RunTelemetry};

#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    pub total: usize,
    pub successes: usize,
    pub errors: usize,
    pub skips: usize,
    pub delay: DelayStatistics,
    pub breaker: BreakerSnapshot,
    pub metrics: Option<MetricsSummary>,
    pub reports: Vec<RutReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Holiday {
        holiday: Holiday,
        source: HolidaySource,
    },
    Completed(RunStatistics),
}

pub struct RunCoordinator {
    service: Arc<MarcajeService>,
    holiday: Arc<dyn HolidayCheck>,
    notifier: Arc<dyn Notifier>,
    breaker: Arc<CircuitBreaker>,
    delays: Arc<DelayCoordinator>,
    metrics: Option<Arc<MetricsCollector>>,
    telemetry: Arc<RunTelemetry>,
    active_ruts: Vec<String>,
    max_workers: usize,
    debug_mode: bool,
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("ruts", &self.active_ruts.len())
            .field("max_workers", &self.max_workers)
            .field("debug_mode", &self.debug_mode)
            .finish()
    }
}

impl RunCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        service: Arc<MarcajeService>,
        holiday: Arc<dyn HolidayCheck>,
        notifier: Arc<dyn Notifier>,
        breaker: Arc<CircuitBreaker>,
        delays: Arc<DelayCoordinator>,
        metrics: Option<Arc<MetricsCollector>>,
        telemetry: Arc<RunTelemetry>,
    ) -> Self {
        Self {
            service,
            holiday,
            notifier,
            breaker,
            delays,
            metrics,
            telemetry,
            active_ruts: config.active_ruts.clone(),
            max_workers: config.execution.max_workers,
            debug_mode: config.debug_mode,
        }
    }

    pub async fn run(&self) -> RunOutcome {
        if let Some((holiday, source)) = self.holiday.today_holiday().await {
            info!(title = %holiday.title, %source, "holiday detected, no identifiers processed");
            if let Err(err) = self.notifier.send_holiday(&holiday, source).await {
                warn!(error = %err, "holiday notification failed");
            }
            self.log_event(&RunEvent::HolidaySkip {
                title: holiday.title.clone(),
                source: source.to_string(),
            });
            return RunOutcome::Holiday { holiday, source };
        }

        self.log_event(&RunEvent::RunStarted {
            ruts: self.active_ruts.len(),
            workers: self.max_workers,
            debug: self.debug_mode,
        });

        let reports = if self.max_workers <= 1 || self.active_ruts.len() <= 1 {
            self.run_sequential().await
        } else {
            self.run_concurrent().await
        };

        let stats = self.tally(reports);
        self.log_event(&RunEvent::RunFinished {
            successes: stats.successes,
            errors: stats.errors,
            skips: stats.skips,
            delay_collisions: stats.delay.collisions,
        });
        info!(
            total = stats.total,
            successes = stats.successes,
            errors = stats.errors,
            skips = stats.skips,
            "run finished"
        );
        RunOutcome::Completed(stats)
    }

    async fn run_sequential(&self) -> Vec<RutReport> {
        let mut reports = Vec::with_capacity(self.active_ruts.len());
        for rut in &self.active_ruts {
            reports.push(self.service.process(rut).await);
        }
        reports
    }

    async fn run_concurrent(&self) -> Vec<RutReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for rut in self.active_ruts.clone() {
            let service = Arc::clone(&self.service);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closing never happens while workers run.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                service.process(&rut).await
            });
        }

        let mut reports = Vec::with_capacity(self.active_ruts.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => {
                    error!(error = %err, "worker task failed to complete");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_error();
                    }
                }
            }
        }
        reports
    }

    fn tally(&self, reports: Vec<RutReport>) -> RunStatistics {
        let mut successes = 0;
        let mut errors = 0;
        let mut skips = 0;
        for report in &reports {
            match report.outcome {
                RutOutcome::Success { .. } => successes += 1,
                RutOutcome::Failed { .. } => errors += 1,
                RutOutcome::Skipped => skips += 1,
            }
        }
        // Workers that never reported still count against the run.
        errors += self.active_ruts.len() - reports.len();
        RunStatistics {
            total: self.active_ruts.len(),
            successes,
            errors,
            skips,
            delay: self.delays.statistics(),
            breaker: self.breaker.snapshot(),
            metrics: self.metrics.as_ref().map(|m| m.summary()),
            reports,
        }
    }

    fn log_event(&self, event: &RunEvent) {
        if let Err(err) = self.telemetry.record(event) {
            warn!(error = %err, "telemetry write failed");
        }
    }
}
