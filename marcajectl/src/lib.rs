use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use marcaje_core::{
    CircuitBreaker, ClockExecutor, Config, DelayCoordinator, HolidayService, MarcajeService,
    MetricsCollector, Notifier, PortalExecutor, RunCoordinator, RunOutcome, RunStatistics,
    RunTelemetry, SimulatedExecutor, SmtpNotifier, DEFAULT_RESET_TIMEOUT,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] marcaje_core::ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] marcaje_core::TelemetryError),
    #[error("notifier error: {0}")]
    Notify(#[from] marcaje_core::NotifyError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("health check failed")]
    Unhealthy,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Automated clock-in/clock-out batch runner", long_about = None)]
pub struct Cli {
    /// Directory where run-dated log files are written
    #[arg(long, default_value = "logs")]
    pub logs_dir: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process every active identifier once
    Run,
    /// Load and validate the environment configuration, print a masked summary
    CheckConfig,
    /// Verify the run prerequisites: configuration, logs directory, SMTP relay
    HealthCheck,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run => run_batch(&cli).await,
        Commands::CheckConfig => check_config(&cli),
        Commands::HealthCheck => health_check(&cli).await,
    }
}

#[derive(Debug, Serialize)]
struct ConfigSummary {
    clock_in_active: bool,
    debug_mode: bool,
    active_ruts: Vec<String>,
    exception_count: usize,
    max_workers: usize,
    retry_attempts: u32,
    retry_delay_seconds: u64,
    circuit_breaker_threshold: u32,
    enable_metrics: bool,
}

fn check_config(cli: &Cli) -> Result<()> {
    let config = Config::from_env()?;
    let summary = ConfigSummary {
        clock_in_active: config.clock_in_active,
        debug_mode: config.debug_mode,
        active_ruts: config.masked_ruts(),
        exception_count: config.exception_ruts.len(),
        max_workers: config.execution.max_workers,
        retry_attempts: config.execution.retry_attempts,
        retry_delay_seconds: config.execution.retry_delay_seconds,
        circuit_breaker_threshold: config.execution.circuit_breaker_threshold,
        enable_metrics: config.execution.enable_metrics,
    };
    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => {
            println!("configuration OK");
            println!("  clock_in_active: {}", summary.clock_in_active);
            println!("  debug_mode:      {}", summary.debug_mode);
            println!("  active_ruts:     {}", summary.active_ruts.join(", "));
            println!("  exceptions:      {}", summary.exception_count);
            println!("  max_workers:     {}", summary.max_workers);
            println!(
                "  retries:         {} x {}s",
                summary.retry_attempts, summary.retry_delay_seconds
            );
            println!("  breaker:         {}", summary.circuit_breaker_threshold);
            println!("  metrics:         {}", summary.enable_metrics);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CheckOutcome {
    ok: bool,
    detail: String,
}

impl CheckOutcome {
    fn pass(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    config: CheckOutcome,
    logs_dir: CheckOutcome,
    smtp: CheckOutcome,
}

impl HealthReport {
    fn healthy(&self) -> bool {
        self.config.ok && self.logs_dir.ok && self.smtp.ok
    }
}

/// Verifies the logs directory exists (creating it if needed) and
/// accepts writes, using a probe file that is removed afterwards.
fn logs_dir_check(dir: &std::path::Path) -> CheckOutcome {
    if let Err(err) = std::fs::create_dir_all(dir) {
        return CheckOutcome::fail(format!("cannot create {}: {err}", dir.display()));
    }
    let probe = dir.join(".write-probe");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckOutcome::pass(format!("{} is writable", dir.display()))
        }
        Err(err) => CheckOutcome::fail(format!("cannot write to {}: {err}", dir.display())),
    }
}

async fn smtp_check(config: &Config) -> CheckOutcome {
    let notifier = match SmtpNotifier::new(config.clone()) {
        Ok(notifier) => notifier,
        Err(err) => return CheckOutcome::fail(format!("transport setup failed: {err}")),
    };
    match notifier.test_connection().await {
        Ok(true) => CheckOutcome::pass("SMTP relay reachable, credentials accepted"),
        Ok(false) => CheckOutcome::fail("SMTP relay rejected the connection"),
        Err(err) => CheckOutcome::fail(format!("SMTP connection failed: {err}")),
    }
}

async fn health_check(cli: &Cli) -> Result<()> {
    let (config, config_outcome) = match Config::from_env() {
        Ok(config) => {
            let detail = format!(
                "{} identifiers, {} workers",
                config.active_ruts.len(),
                config.execution.max_workers
            );
            (Some(config), CheckOutcome::pass(detail))
        }
        Err(err) => (None, CheckOutcome::fail(err.to_string())),
    };

    let report = HealthReport {
        logs_dir: logs_dir_check(&cli.logs_dir),
        smtp: match &config {
            Some(config) => smtp_check(config).await,
            None => CheckOutcome::fail("skipped, configuration invalid"),
        },
        config: config_outcome,
    };

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            for (name, outcome) in [
                ("config", &report.config),
                ("logs_dir", &report.logs_dir),
                ("smtp", &report.smtp),
            ] {
                let status = if outcome.ok { "OK" } else { "FAIL" };
                println!("  {name:<10} {status:<5} {}", outcome.detail);
            }
        }
    }

    if report.healthy() {
        Ok(())
    } else {
        Err(AppError::Unhealthy)
    }
}

async fn run_batch(cli: &Cli) -> Result<()> {
    let config = Config::from_env()?;
    if !config.clock_in_active {
        info!("clock-in is disabled, nothing to do");
        println!("clock-in disabled (CLOCK_IN_ACTIVE is not true)");
        return Ok(());
    }

    let run_label = std::env::var("GITHUB_RUN_NUMBER").unwrap_or_else(|_| "local".to_string());
    let telemetry = Arc::new(RunTelemetry::new(&cli.logs_dir, &run_label)?);
    let breaker = Arc::new(CircuitBreaker::new(
        config.execution.circuit_breaker_threshold,
        DEFAULT_RESET_TIMEOUT,
    ));
    let delays = Arc::new(DelayCoordinator::new());
    let metrics = config
        .execution
        .enable_metrics
        .then(|| Arc::new(MetricsCollector::new()));
    let notifier: Arc<dyn Notifier> = Arc::new(SmtpNotifier::new(config.clone())?);
    let executor: Arc<dyn ClockExecutor> = if config.debug_mode {
        Arc::new(SimulatedExecutor)
    } else {
        Arc::new(PortalExecutor::new())
    };

    let service = Arc::new(MarcajeService::new(
        &config,
        executor,
        Arc::clone(&notifier),
        Arc::clone(&breaker),
        Arc::clone(&delays),
        metrics.clone(),
        Arc::clone(&telemetry),
    ));
    let coordinator = RunCoordinator::new(
        &config,
        service,
        Arc::new(HolidayService::new()),
        notifier,
        breaker,
        delays,
        metrics,
        Arc::clone(&telemetry),
    );

    let outcome = coordinator.run().await;
    render(cli.format, &outcome)?;
    info!(log = %telemetry.path().display(), "run log written");
    Ok(())
}

fn render(format: OutputFormat, outcome: &RunOutcome) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outcome)?);
        }
        OutputFormat::Text => match outcome {
            RunOutcome::Holiday { holiday, source } => {
                println!(
                    "holiday today: {} ({}) [{source}], no identifiers processed",
                    holiday.title, holiday.date
                );
            }
            RunOutcome::Completed(stats) => render_statistics(stats),
        },
    }
    Ok(())
}

fn render_statistics(stats: &RunStatistics) {
    for report in &stats.reports {
        match &report.outcome {
            marcaje_core::RutOutcome::Success {
                action,
                duration_seconds,
            } => println!(
                "  {}  OK    {action} ({duration_seconds:.1}s)",
                report.rut_masked
            ),
            marcaje_core::RutOutcome::Skipped => {
                println!("  {}  SKIP  exception", report.rut_masked)
            }
            marcaje_core::RutOutcome::Failed { error } => {
                println!("  {}  FAIL  {error}", report.rut_masked)
            }
        }
    }
    println!(
        "processed {} identifiers: {} ok, {} failed, {} skipped",
        stats.total, stats.successes, stats.errors, stats.skips
    );
    println!(
        "delays assigned: {} ({} collisions), breaker: {}",
        stats.delay.assigned, stats.delay.collisions, stats.breaker.state
    );
    if let Some(metrics) = &stats.metrics {
        println!(
            "success rate {:.0}%, avg action {:.1}s, run took {:.1}s",
            metrics.success_rate * 100.0,
            metrics.average_duration_seconds,
            metrics.total_execution_seconds
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_subcommand_parses_with_defaults() {
        let cli = Cli::parse_from(["marcajectl", "run"]);
        assert!(matches!(cli.command, Commands::Run));
        assert_eq!(cli.logs_dir, PathBuf::from("logs"));
        assert!(matches!(cli.format, OutputFormat::Text));
    }

    #[test]
    fn health_check_subcommand_parses() {
        let cli = Cli::parse_from(["marcajectl", "health-check"]);
        assert!(matches!(cli.command, Commands::HealthCheck));
    }

    #[test]
    fn logs_dir_check_passes_on_a_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = logs_dir_check(dir.path());
        assert!(outcome.ok);
        // The probe file must not linger.
        assert!(!dir.path().join(".write-probe").exists());
    }

    #[test]
    fn logs_dir_check_creates_a_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        assert!(logs_dir_check(&nested).ok);
        assert!(nested.is_dir());
    }

    #[test]
    fn logs_dir_check_fails_when_the_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let outcome = logs_dir_check(&file);
        assert!(!outcome.ok);
    }

    #[test]
    fn json_format_flag_parses() {
        let cli = Cli::parse_from(["marcajectl", "--format", "json", "check-config"]);
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(matches!(cli.command, Commands::CheckConfig));
    }
}
