//! The clock action seam and its two implementations.
//!
//! `PortalExecutor` drives the real time-tracking portal with a
//! headless Chromium instance: pick the ENTRADA/SALIDA button, dial the
//! RUT on the on-screen keypad, submit. `SimulatedExecutor` fabricates
//! the outcome message without touching any external system and backs
//! the debug/dry-run mode.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use chrono::Utc;
use chrono_tz::America::Santiago;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::rut;

use super::error::{MarcajeError, MarcajeResult};
use super::ActionKind;

const PORTAL_URL: &str = "https://app.ctrlit.cl/ctrl/dial/web/K1NBpBqyjf";
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const NAVIGATION_ATTEMPTS: usize = 3;
const KEYPAD_SELECTOR: &str = "li.digits";
const SUBMIT_SELECTOR: &str = "li.pad-action.digits";
const ACTION_SELECTOR: &str = "button, div, span, li";
const SUBMIT_LABEL: &str = "ENVIAR";

/// Performs the external clock action for one RUT. Implementations
/// must release any acquired resource before returning, success or not.
#[async_trait]
pub trait ClockExecutor: Send + Sync {
    async fn perform(&self, rut: &str, kind: ActionKind) -> MarcajeResult<String>;
}

fn santiago_time() -> String {
    Utc::now()
        .with_timezone(&Santiago)
        .format("%H:%M:%S")
        .to_string()
}

fn success_message(kind: ActionKind) -> String {
    let mut message = format!(
        "✅ {kind} realizada con éxito a las {} (Chile - CLT).\n\
         📍 Geolocalización: Sin coordenadas\n\n",
        santiago_time()
    );
    match kind {
        ActionKind::Entrada => message.push_str("¡Que tengas un excelente día!"),
        ActionKind::Salida => message.push_str("¡Que descanses y disfrutes tu tiempo libre!"),
    }
    message
}

/// Debug-mode stand-in: no browser, no portal, no waiting.
#[derive(Debug, Default)]
pub struct SimulatedExecutor;

#[async_trait]
impl ClockExecutor for SimulatedExecutor {
    async fn perform(&self, rut: &str, kind: ActionKind) -> MarcajeResult<String> {
        info!(rut = %rut::mask(rut), action = %kind, "simulated clock action");
        Ok(format!(
            "🧪 Modo DEBUG activo: no se ejecutó {kind}. Hora Chile: {} (CLT)",
            santiago_time()
        ))
    }
}

#[derive(Debug, Clone)]
pub struct PortalExecutor {
    url: String,
    page_load_timeout: Duration,
}

impl Default for PortalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PortalExecutor {
    pub fn new() -> Self {
        Self {
            url: PORTAL_URL.to_string(),
            page_load_timeout: PAGE_LOAD_TIMEOUT,
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            page_load_timeout: PAGE_LOAD_TIMEOUT,
        }
    }

    async fn launch(&self) -> MarcajeResult<(Browser, JoinHandle<()>)> {
        let config = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.page_load_timeout)
            .args(vec![
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--window-size=1920,1080",
                "--disable-geolocation",
                "--disable-extensions",
                "--disable-notifications",
            ])
            .build()
            .map_err(MarcajeError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| MarcajeError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok((browser, handler_task))
    }

    async fn shutdown(&self, mut browser: Browser, handler_task: JoinHandle<()>) {
        if let Err(err) = browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        handler_task.abort();
    }

    async fn navigate(&self, page: &Page) -> MarcajeResult<()> {
        let mut last_error: Option<MarcajeError> = None;
        for attempt in 1..=NAVIGATION_ATTEMPTS {
            debug!(attempt, max = NAVIGATION_ATTEMPTS, url = %self.url, "loading portal page");
            let load = async {
                page.goto(self.url.as_str()).await?;
                page.wait_for_navigation().await?;
                Ok::<(), MarcajeError>(())
            };
            match timeout(self.page_load_timeout, load).await {
                Ok(Ok(())) => {
                    sleep(Duration::from_secs(2)).await;
                    return Ok(());
                }
                Ok(Err(err)) => last_error = Some(err),
                Err(_) => {
                    last_error = Some(MarcajeError::Timeout(format!(
                        "portal page load ({})",
                        self.url
                    )))
                }
            }
            if attempt < NAVIGATION_ATTEMPTS {
                warn!(attempt, "portal page load failed, retrying");
                sleep(Duration::from_secs(2)).await;
            }
        }
        Err(last_error
            .unwrap_or_else(|| MarcajeError::Unexpected("portal navigation never ran".into())))
    }

    async fn disable_geolocation(&self, page: &Page) -> MarcajeResult<()> {
        page.evaluate(
            "navigator.geolocation.getCurrentPosition = function(success, error) {\
                 if (error) error({ code: 1, message: 'User denied Geolocation' });\
             };\
             navigator.geolocation.watchPosition = function() { return null; };",
        )
        .await?;
        Ok(())
    }

    /// Clicks the first element whose visible text equals `label`.
    async fn click_by_text(&self, page: &Page, selector: &str, label: &str) -> MarcajeResult<()> {
        let elements = page.find_elements(selector).await?;
        for element in elements {
            let text = element.inner_text().await?.unwrap_or_default();
            if text.trim().eq_ignore_ascii_case(label) {
                element.click().await?;
                return Ok(());
            }
        }
        Err(MarcajeError::ElementNotFound(format!(
            "{label} ({selector})"
        )))
    }

    async fn enter_rut(&self, page: &Page, rut: &str) -> MarcajeResult<()> {
        debug!(rut = %rut::mask(rut), "dialing RUT on keypad");
        let keys = page.find_elements(KEYPAD_SELECTOR).await?;
        if keys.is_empty() {
            return Err(MarcajeError::ElementNotFound(KEYPAD_SELECTOR.to_string()));
        }
        for ch in rut.chars() {
            let label = ch.to_string();
            let mut clicked = false;
            for key in &keys {
                let text = key.inner_text().await?.unwrap_or_default();
                if text.trim().eq_ignore_ascii_case(&label) {
                    key.click().await?;
                    clicked = true;
                    break;
                }
            }
            if !clicked {
                return Err(MarcajeError::ElementNotFound(format!(
                    "keypad key '{ch}'"
                )));
            }
            sleep(Duration::from_millis(300)).await;
        }
        sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn drive(&self, browser: &Browser, rut: &str, kind: ActionKind) -> MarcajeResult<String> {
        let page = browser.new_page("about:blank").await?;
        self.navigate(&page).await?;
        self.disable_geolocation(&page).await?;

        self.click_by_text(&page, ACTION_SELECTOR, &kind.to_string())
            .await?;
        sleep(Duration::from_secs(2)).await;

        self.enter_rut(&page, rut).await?;

        self.click_by_text(&page, SUBMIT_SELECTOR, SUBMIT_LABEL)
            .await?;
        sleep(Duration::from_secs(1)).await;

        Ok(success_message(kind))
    }
}

#[async_trait]
impl ClockExecutor for PortalExecutor {
    async fn perform(&self, rut: &str, kind: ActionKind) -> MarcajeResult<String> {
        info!(rut = %rut::mask(rut), action = %kind, "starting portal clock action");
        let (browser, handler_task) = self.launch().await?;
        let result = self.drive(&browser, rut, kind).await;
        // The browser must go away even when the action failed.
        self.shutdown(browser, handler_task).await;
        if result.is_ok() {
            info!(rut = %rut::mask(rut), action = %kind, "portal clock action completed");
        }
        result
    }
}
