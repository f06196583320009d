use shared::error::RemoteError;
use thiserror::Error;

pub const NOT_CONFIGURED_MESSAGE: &str = "The service is not configured for this environment.";

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("{0}")]
    Configuration(String),
    #[error("{0}")]
    Validation(String),
    #[error("not connected: no signed-in identity")]
    NotConnected,
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
}

impl ClientError {
    pub fn not_configured() -> Self {
        Self::Configuration(NOT_CONFIGURED_MESSAGE.to_string())
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
