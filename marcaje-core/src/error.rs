use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required secret {0}")]
    MissingSecret(&'static str),
    #[error("invalid base64 in {name}: {source}")]
    Base64 {
        name: &'static str,
        source: base64::DecodeError,
    },
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
    #[error("failed to parse {name}: {source}")]
    Parse {
        name: &'static str,
        source: serde_json::Error,
    },
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        name: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
