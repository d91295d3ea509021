//! Outcome notifications over SMTP.
//!
//! Exactly one notification is sent per processed identifier: success,
//! failure, or skip. A run that never processes identifiers because of
//! a holiday sends a single holiday notice instead. Subjects and bodies
//! never contain an unmasked RUT.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Config, SMTP_PORT, SMTP_SERVER};
use crate::holiday::{Holiday, HolidaySource};
use crate::marcaje::ActionKind;
use crate::rut;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message build error: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_success(
        &self,
        rut: &str,
        action: ActionKind,
        detail: &str,
    ) -> Result<(), NotifyError>;

    /// `action` is `None` when the failure happened before the action
    /// kind was determined (e.g. a circuit-open rejection); the body
    /// then falls back to a generic label.
    async fn send_failure(
        &self,
        rut: &str,
        action: Option<ActionKind>,
        error: &str,
    ) -> Result<(), NotifyError>;

    async fn send_skip(&self, rut: &str) -> Result<(), NotifyError>;

    async fn send_holiday(
        &self,
        holiday: &Holiday,
        source: HolidaySource,
    ) -> Result<(), NotifyError>;
}

const FALLBACK_ACTION_LABEL: &str = "MARCAJE";

fn action_label(action: Option<ActionKind>) -> String {
    action
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| FALLBACK_ACTION_LABEL.to_string())
}

fn success_subject(rut: &str) -> String {
    format!("✅ Confirmación de registro - {}", rut::mask(rut))
}

fn failure_subject(rut: &str) -> String {
    format!("⚠️ Problema en registro - {}", rut::mask(rut))
}

fn skip_subject(rut: &str) -> String {
    format!("🚫 Estado especial - {}", rut::mask(rut))
}

fn holiday_subject(holiday: &Holiday) -> String {
    format!("📅 Aviso programado: {}", holiday.title)
}

fn success_body(rut: &str, action: ActionKind, detail: &str) -> String {
    format!(
        "Hola,\n\n\
         El registro de {action} para el identificador {} se completó correctamente.\n\n\
         {detail}\n\n\
         Saludos,\nSistema de Marcaje Automático",
        rut::mask(rut)
    )
}

fn failure_body(rut: &str, action: Option<ActionKind>, error: &str) -> String {
    format!(
        "Hola,\n\n\
         El registro de {} para el identificador {} no pudo completarse.\n\n\
         Detalle: {error}\n\n\
         Por favor realiza el registro manualmente.\n\n\
         Saludos,\nSistema de Marcaje Automático",
        action_label(action),
        rut::mask(rut)
    )
}

fn skip_body(rut: &str) -> String {
    format!(
        "Hola,\n\n\
         El identificador {} está marcado como excepción y no fue procesado hoy.\n\n\
         No se realizó ningún registro.\n\n\
         Saludos,\nSistema de Marcaje Automático",
        rut::mask(rut)
    )
}

fn holiday_body(holiday: &Holiday, source: HolidaySource) -> String {
    format!(
        "Hola,\n\n\
         Hoy {} es feriado en Chile: {} ({}).\n\n\
         No se realizará ningún registro.\n\n\
         Fuente del calendario: {source}.\n\n\
         Saludos,\nSistema de Marcaje Automático",
        holiday.date, holiday.title, holiday.kind
    )
}

/// Gmail STARTTLS notifier. One transport is built at startup and
/// reused for every message of the run.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Config,
}

impl std::fmt::Debug for SmtpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpNotifier")
            .field("server", &SMTP_SERVER)
            .field("port", &SMTP_PORT)
            .finish()
    }
}

impl SmtpNotifier {
    pub fn new(config: Config) -> Result<Self, NotifyError> {
        let credentials = Credentials::new(config.email_address.clone(), config.email_pass.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(SMTP_SERVER)?
            .port(SMTP_PORT)
            .credentials(credentials)
            .build();
        Ok(Self { transport, config })
    }

    /// Probes the SMTP relay without sending a message; used by the
    /// health check.
    pub async fn test_connection(&self) -> Result<bool, NotifyError> {
        Ok(self.transport.test_connection().await?)
    }

    async fn deliver(
        &self,
        destinations: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let mut last_error: Option<NotifyError> = None;
        for destination in destinations {
            let message = Message::builder()
                .from(self.config.email_address.parse()?)
                .to(destination.parse()?)
                .subject(subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.to_string())?;
            match self.transport.send(message).await {
                Ok(_) => info!(to = %destination, subject, "notification sent"),
                Err(err) => {
                    warn!(to = %destination, error = %err, "notification delivery failed");
                    last_error = Some(err.into());
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_success(
        &self,
        rut: &str,
        action: ActionKind,
        detail: &str,
    ) -> Result<(), NotifyError> {
        self.deliver(
            &self.config.email_destinations(rut),
            &success_subject(rut),
            &success_body(rut, action, detail),
        )
        .await
    }

    async fn send_failure(
        &self,
        rut: &str,
        action: Option<ActionKind>,
        error: &str,
    ) -> Result<(), NotifyError> {
        self.deliver(
            &self.config.email_destinations(rut),
            &failure_subject(rut),
            &failure_body(rut, action, error),
        )
        .await
    }

    async fn send_skip(&self, rut: &str) -> Result<(), NotifyError> {
        self.deliver(
            &self.config.email_destinations(rut),
            &skip_subject(rut),
            &skip_body(rut),
        )
        .await
    }

    async fn send_holiday(
        &self,
        holiday: &Holiday,
        source: HolidaySource,
    ) -> Result<(), NotifyError> {
        self.deliver(
            &self.config.holiday_destinations(),
            &holiday_subject(holiday),
            &holiday_body(holiday, source),
        )
        .await
    }
}
