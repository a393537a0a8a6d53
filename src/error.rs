//! Crate-level error types.

use std::error::Error as StdError;

use crate::protocols::easylase;

/// Crate-level error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device link failed.
    #[error(transparent)]
    Device(#[from] easylase::Error),

    /// A configuration value cannot be used with the device.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler's actor thread is no longer running.
    #[error("scheduler thread has stopped")]
    SchedulerStopped,

    /// An error with context describing what operation failed.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    /// Create an invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an error with context wrapping another error.
    pub fn context(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Crate-level result type.
pub type Result<T> = std::result::Result<T, Error>;
