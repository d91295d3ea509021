use thiserror::Error;

pub type MarcajeResult<T> = Result<T, MarcajeError>;

#[derive(Debug, Error)]
pub enum MarcajeError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("driver error: {0}")]
    Driver(#[from] chromiumoxide::error::CdpError),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("circuit breaker open")]
    CircuitOpen,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<tokio::task::JoinError> for MarcajeError {
    fn from(err: tokio::task::JoinError) -> Self {
        MarcajeError::Unexpected(err.to_string())
    }
}
