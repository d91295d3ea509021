//! Environment-sourced configuration.
//!
//! Secrets arrive as environment variables, preferring base64-wrapped
//! variants (`*_B64`) with plain legacy fallbacks. Everything is
//! decoded and validated once at startup; any invalid value aborts the
//! run before a single RUT is processed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::rut;

pub const SMTP_SERVER: &str = "smtp.gmail.com";
pub const SMTP_PORT: u16 = 587;

const MAX_ACTIVE_RUTS: usize = 10;

/// Execution tuning knobs, one flat struct rather than a layered
/// "advanced" configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_workers: usize,
    pub retry_attempts: u32,
    pub retry_delay_seconds: u64,
    pub circuit_breaker_threshold: u32,
    pub enable_metrics: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            retry_attempts: 3,
            retry_delay_seconds: 30,
            circuit_breaker_threshold: 3,
            enable_metrics: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub clock_in_active: bool,
    pub debug_mode: bool,
    pub active_ruts: Vec<String>,
    pub exception_ruts: Vec<String>,
    pub email_address: String,
    pub email_pass: String,
    pub special_rut: Option<String>,
    pub special_email: Option<String>,
    pub execution: ExecutionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup so
    /// tests can feed a plain map instead of mutating process state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let clock_in_active = flag(&lookup, "CLOCK_IN_ACTIVE");
        let debug_mode = flag(&lookup, "DEBUG_MODE");

        let active_ruts = load_rut_list(&lookup, "ACTIVE_RUTS_B64", "ACTIVE_RUTS")?
            .ok_or(ConfigError::MissingSecret("ACTIVE_RUTS_B64"))?;
        let exception_ruts =
            load_rut_list(&lookup, "EXCEPTION_RUTS_B64", "EXCEPTION_RUTS")?.unwrap_or_default();

        let email_address = secret(&lookup, "EMAIL_ADDRESS_B64", "EMAIL_ADDRESS")?
            .ok_or(ConfigError::MissingSecret("EMAIL_ADDRESS_B64"))?;
        let email_pass = secret(&lookup, "EMAIL_PASS_B64", "EMAIL_PASS")?
            .ok_or(ConfigError::MissingSecret("EMAIL_PASS_B64"))?;
        let special_rut = decoded(&lookup, "SPECIAL_RUT_B64")?;
        let special_email = decoded(&lookup, "SPECIAL_EMAIL_TO")?;

        let execution = load_execution(&lookup)?;

        let config = Self {
            clock_in_active,
            debug_mode,
            active_ruts,
            exception_ruts,
            email_address,
            email_pass,
            special_rut,
            special_email,
            execution,
        };
        config.validate()?;
        info!(
            ruts = config.active_ruts.len(),
            workers = config.execution.max_workers,
            debug = config.debug_mode,
            "configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.active_ruts.is_empty() {
            return Err(ConfigError::Invalid {
                name: "ACTIVE_RUTS_B64",
                reason: "no active RUTs configured".into(),
            });
        }
        if self.active_ruts.len() > MAX_ACTIVE_RUTS {
            return Err(ConfigError::Invalid {
                name: "ACTIVE_RUTS_B64",
                reason: format!("at most {MAX_ACTIVE_RUTS} RUTs are allowed"),
            });
        }
        for token in &self.active_ruts {
            if !rut::is_valid(token) {
                return Err(ConfigError::Invalid {
                    name: "ACTIVE_RUTS_B64",
                    reason: format!("malformed RUT {}", rut::mask(token)),
                });
            }
        }
        let mut seen: Vec<String> = Vec::new();
        for token in &self.active_ruts {
            let key = token.to_ascii_lowercase();
            if seen.contains(&key) {
                return Err(ConfigError::Invalid {
                    name: "ACTIVE_RUTS_B64",
                    reason: format!("duplicate RUT {}", rut::mask(token)),
                });
            }
            seen.push(key);
        }

        let exec = &self.execution;
        if !(1..=10).contains(&exec.max_workers) {
            return Err(ConfigError::Invalid {
                name: "MAX_WORKERS",
                reason: "must be between 1 and 10".into(),
            });
        }
        if exec.retry_attempts > 10 {
            return Err(ConfigError::Invalid {
                name: "RETRY_ATTEMPTS",
                reason: "must be between 0 and 10".into(),
            });
        }
        if !(1..=300).contains(&exec.retry_delay_seconds) {
            return Err(ConfigError::Invalid {
                name: "RETRY_DELAY_SECONDS",
                reason: "must be between 1 and 300".into(),
            });
        }
        Ok(())
    }

    /// Notification destinations for one RUT's outcome. The primary
    /// address receives everything; the special address additionally
    /// receives notifications for its bound RUT. Debug runs go to the
    /// primary address only, to avoid noisy test sends.
    pub fn email_destinations(&self, rut: &str) -> Vec<String> {
        let mut destinations = vec![self.email_address.clone()];
        if self.debug_mode {
            return destinations;
        }
        if let (Some(special_rut), Some(special_email)) = (&self.special_rut, &self.special_email) {
            if rut_key(rut) == rut_key(special_rut) {
                destinations.push(special_email.clone());
            }
        }
        destinations
    }

    /// Holiday notices go to every configured address.
    pub fn holiday_destinations(&self) -> Vec<String> {
        let mut destinations = vec![self.email_address.clone()];
        if self.debug_mode {
            return destinations;
        }
        if let Some(special_email) = &self.special_email {
            destinations.push(special_email.clone());
        }
        destinations
    }

    pub fn masked_ruts(&self) -> Vec<String> {
        self.active_ruts.iter().map(|r| rut::mask(r)).collect()
    }
}

/// RUTs are compared without the verification character, lowercased.
fn rut_key(rut: &str) -> String {
    rut.to_ascii_lowercase()
        .trim_end_matches('k')
        .to_string()
}

fn flag<F>(lookup: &F, name: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn decode_base64(name: &'static str, value: &str) -> Result<String> {
    let bytes = BASE64
        .decode(value.trim())
        .map_err(|source| ConfigError::Base64 { name, source })?;
    String::from_utf8(bytes).map_err(|_| ConfigError::Utf8(name))
}

fn decoded<F>(lookup: &F, name: &'static str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => decode_base64(name, &value).map(Some),
        _ => Ok(None),
    }
}

/// Reads a secret preferring the base64 variant, falling back to the
/// plain legacy variable.
fn secret<F>(lookup: &F, b64_name: &'static str, plain_name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = decoded(lookup, b64_name)? {
        return Ok(Some(value));
    }
    Ok(lookup(plain_name).filter(|value| !value.trim().is_empty()))
}

fn load_rut_list<F>(
    lookup: &F,
    b64_name: &'static str,
    plain_name: &str,
) -> Result<Option<Vec<String>>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = match secret(lookup, b64_name, plain_name)? {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let values: Vec<Value> = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
        name: b64_name,
        source,
    })?;
    let mut ruts = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Value::String(s) => ruts.push(s),
            Value::Number(n) => ruts.push(n.to_string()),
            other => {
                return Err(ConfigError::Invalid {
                    name: b64_name,
                    reason: format!("unsupported entry type: {other}"),
                })
            }
        }
    }
    Ok(Some(ruts))
}

fn load_execution<F>(lookup: &F) -> Result<ExecutionConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ExecutionConfig::default();
    Ok(ExecutionConfig {
        max_workers: numeric(lookup, "MAX_WORKERS", defaults.max_workers)?,
        retry_attempts: numeric(lookup, "RETRY_ATTEMPTS", defaults.retry_attempts)?,
        retry_delay_seconds: numeric(lookup, "RETRY_DELAY_SECONDS", defaults.retry_delay_seconds)?,
        circuit_breaker_threshold: numeric(
            lookup,
            "CIRCUIT_BREAKER_THRESHOLD",
            defaults.circuit_breaker_threshold,
        )?,
        enable_metrics: lookup("ENABLE_METRICS")
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(defaults.enable_metrics),
    })
}

fn numeric<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                reason: format!("not a valid number: {value}"),
            })
        }
        _ => Ok(default),
    }
}
