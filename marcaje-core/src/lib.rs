pub mod breaker;
pub mod config;
pub mod delay;
pub mod error;
pub mod holiday;
pub mod marcaje;
pub mod metrics;
pub mod notify;
pub mod runner;
pub mod rut;
pub mod telemetry;

pub use breaker::{
    BreakerSnapshot, BreakerState, CircuitBreaker, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_RESET_TIMEOUT,
};
pub use config::{Config, ExecutionConfig, SMTP_PORT, SMTP_SERVER};
pub use delay::{DelayCoordinator, DelaySource, DelayStatistics, RandomDelaySource};
pub use error::{ConfigError, Result};
pub use holiday::{Holiday, HolidayCheck, HolidayService, HolidaySource};
pub use marcaje::{
    ActionKind, ClockExecutor, MarcajeError, MarcajeResult, MarcajeService, PortalExecutor,
    RetryOutcome, RetryPolicy, RutOutcome, RutReport, SimulatedExecutor,
};
pub use metrics::{MetricsCollector, MetricsSummary};
pub use notify::{Notifier, NotifyError, SmtpNotifier};
pub use runner::{RunCoordinator, RunOutcome, RunStatistics};
pub use telemetry::{RunEvent, RunTelemetry, TelemetryError};
