use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_directive` when set.
pub fn init(default_directive: &str) -> Result<(), LoggingError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(env) if !env.trim().is_empty() => EnvFilter::try_new(env),
        _ => EnvFilter::try_new(default_directive),
    }
    .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}
