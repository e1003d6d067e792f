use thiserror::Error;

/// Infrastructure failures shared by every crate in the workspace.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Observability error: {0}")]
    ObservabilityError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl CoreError {
    /// Build a configuration error from a message.
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::ConfigError(anyhow::anyhow!(msg.into()))
    }
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::InternalError(anyhow::Error::new(err))
    }
}
