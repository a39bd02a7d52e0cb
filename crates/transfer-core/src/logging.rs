//! Subscriber setup for binaries and demos embedding the pipeline.

use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::try_new(&config.filter)?,
    };

    let json = config.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .try_init()?;

    Ok(())
}
