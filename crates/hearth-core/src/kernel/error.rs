//! # Hearth Core Errors
//!
//! [`Error`] aggregates the typed errors of every subsystem so the binary and
//! embedding hosts can propagate them with a single `?`.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::activation::error::{ActivationError, ContributionError};
use crate::config::ConfigError;
use crate::event::error::EventSystemError;
use crate::isolation::error::IsolationError;
use crate::plugin_system::error::{OperationError, PluginSystemError};
use crate::plugin_system::version::VersionError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    #[error("Operation failed: {0}")]
    Operation(#[from] OperationError),

    #[error("Event system error: {0}")]
    EventSystem(#[from] EventSystemError),

    #[error("Isolation error: {0}")]
    Isolation(#[from] IsolationError),

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("Contribution error: {0}")]
    Contribution(#[from] ContributionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        operation: String,
        path: PathBuf,
    },

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl Error {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            source,
            operation: operation.into(),
            path: path.into(),
        }
    }
}
