//! Clock action execution: the per-RUT orchestrator and its seams.

pub mod error;
pub mod executor;
pub mod retry;
pub mod service;

pub use error::{MarcajeError, MarcajeResult};
pub use executor::{ClockExecutor, PortalExecutor, SimulatedExecutor};
pub use retry::{RetryOutcome, RetryPolicy};
pub use service::{MarcajeService, RutOutcome, RutReport};

use std::fmt;

use chrono::{Timelike, Utc};
use chrono_tz::America::Santiago;
use serde::Serialize;

/// Clock-in happens in the morning window, clock-out everywhere else.
const ENTRADA_HOURS: std::ops::Range<u32> = 5..12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Entrada,
    Salida,
}

impl ActionKind {
    pub fn for_hour(hour: u32) -> Self {
        if ENTRADA_HOURS.contains(&hour) {
            ActionKind::Entrada
        } else {
            ActionKind::Salida
        }
    }

    /// Determined from the current Santiago local hour. Called once per
    /// RUT, right before the attempt loop; never re-evaluated between
    /// retries.
    pub fn current() -> Self {
        Self::for_hour(Utc::now().with_timezone(&Santiago).hour())
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Entrada => f.write_str("ENTRADA"),
            ActionKind::Salida => f.write_str("SALIDA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn morning_hours_are_entrada() {
        assert_eq!(ActionKind::for_hour(5), ActionKind::Entrada);
        assert_eq!(ActionKind::for_hour(11), ActionKind::Entrada);
    }

    #[test]
    fn boundary_hours_are_salida() {
        assert_eq!(ActionKind::for_hour(4), ActionKind::Salida);
        assert_eq!(ActionKind::for_hour(12), ActionKind::Salida);
        assert_eq!(ActionKind::for_hour(23), ActionKind::Salida);
        assert_eq!(ActionKind::for_hour(0), ActionKind::Salida);
    }

    #[test]
    fn display_matches_portal_labels() {
        assert_eq!(ActionKind::Entrada.to_string(), "ENTRADA");
        assert_eq!(ActionKind::Salida.to_string(), "SALIDA");
    }
}
