//! Chilean holiday gate.
//!
//! Consulted once per run before any RUT is processed. The production
//! service asks the boostr holiday API first and falls back to the
//! embedded static table when the API is unreachable, so a flaky
//! endpoint never causes a clock action on a holiday.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::America::Santiago;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

const HOLIDAY_API_URL: &str = "https://api.boostr.cl/holidays.json";
const API_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub date: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidaySource {
    Api,
    Local,
}

impl fmt::Display for HolidaySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolidaySource::Api => f.write_str("api"),
            HolidaySource::Local => f.write_str("local"),
        }
    }
}

#[async_trait]
pub trait HolidayCheck: Send + Sync {
    /// Returns today's holiday, if any, and where the answer came from.
    async fn today_holiday(&self) -> Option<(Holiday, HolidaySource)>;
}

#[derive(Debug, Clone)]
pub struct HolidayService {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    data: Vec<Holiday>,
}

impl Default for HolidayService {
    fn default() -> Self {
        Self::new()
    }
}

impl HolidayService {
    pub fn new() -> Self {
        Self::with_api_url(HOLIDAY_API_URL)
    }

    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
        }
    }

    fn today() -> String {
        Utc::now().with_timezone(&Santiago).format("%Y-%m-%d").to_string()
    }

    async fn check_api(&self, today: &str) -> Result<Option<Holiday>, reqwest::Error> {
        let response = self
            .client
            .get(&self.api_url)
            .header("accept", "application/json")
            .timeout(API_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let payload: ApiResponse = response.json().await?;
        if payload.status != "success" {
            warn!(status = %payload.status, "holiday API returned non-success status");
            return Ok(None);
        }
        Ok(payload.data.into_iter().find(|h| h.date == today))
    }

    fn check_local(today: &str) -> Option<Holiday> {
        CHILE_HOLIDAYS_2025
            .iter()
            .find(|(date, _, _)| *date == today)
            .map(|(date, title, kind)| Holiday {
                date: (*date).to_string(),
                title: (*title).to_string(),
                kind: (*kind).to_string(),
            })
    }

    /// API first, local table when the API is unreachable or reports a
    /// non-success status. Date-parameterized so the fallback chain is
    /// testable without faking the system clock.
    async fn resolve(&self, today: &str) -> Option<(Holiday, HolidaySource)> {
        debug!(date = %today, "checking holiday calendar");
        match self.check_api(today).await {
            Ok(Some(holiday)) => {
                info!(title = %holiday.title, "today is a holiday (API)");
                return Some((holiday, HolidaySource::Api));
            }
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "holiday API unavailable, falling back to local table");
            }
        }
        Self::check_local(today).map(|holiday| {
            info!(title = %holiday.title, "today is a holiday (local table)");
            (holiday, HolidaySource::Local)
        })
    }
}

#[async_trait]
impl HolidayCheck for HolidayService {
    async fn today_holiday(&self) -> Option<(Holiday, HolidaySource)> {
        self.resolve(&Self::today()).await
    }
}

/// Static fallback used when the API cannot be reached.
const CHILE_HOLIDAYS_2025: &[(&str, &str, &str)] = &[
    ("2025-01-01", "Año Nuevo", "Civil"),
    ("2025-04-18", "Viernes Santo", "Religioso"),
    ("2025-04-19", "Sábado Santo", "Religioso"),
    ("2025-05-01", "Día Nacional del Trabajo", "Civil"),
    ("2025-05-21", "Día de las Glorias Navales", "Civil"),
    ("2025-06-29", "San Pedro y San Pablo", "Religioso"),
    ("2025-07-16", "Día de la Virgen del Carmen", "Religioso"),
    ("2025-08-15", "Asunción de la Virgen", "Religioso"),
    ("2025-09-18", "Independencia Nacional", "Civil"),
    ("2025-09-19", "Día de las Glorias del Ejército", "Civil"),
    ("2025-12-08", "Inmaculada Concepción", "Religioso"),
    ("2025-12-25", "Navidad", "Religioso"),
];
