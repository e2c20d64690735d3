//! # Hearth Plugin System Errors
//!
//! [`PluginSystemError`] is the typed error for manifest, dependency,
//! lifecycle and isolation failures inside the plugin system.
//!
//! At the orchestration boundary every operation instead returns an
//! [`OperationResult`]: failures are [`OperationError`] values carrying a
//! machine-readable [`ErrorCode`] (e.g. `ACTIVATION_FAILED`) and a message,
//! so hosts never see raw errors or panics from plugin code.
//!
//! [`PluginError`] is what plugin hooks return.
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::activation::error::{ActivationError, ContributionError};
use crate::isolation::error::IsolationError;
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::lifecycle::PluginState;
use crate::plugin_system::version::VersionError;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Plugin manifest error for '{path}': {message}")]
    ManifestError {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(#[from] DependencyError),

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),

    #[error("Isolation error: {0}")]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Machine-readable failure codes returned by runtime operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ActivationFailed,
    DeactivationFailed,
    PluginNotFound,
    VersionNotFound,
    VersionConflict,
    MissingDependency,
    CircularDependency,
    ModuleLoadFailed,
    InvalidState,
    ManifestInvalid,
    ContributionUnavailable,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ActivationFailed => "ACTIVATION_FAILED",
            ErrorCode::DeactivationFailed => "DEACTIVATION_FAILED",
            ErrorCode::PluginNotFound => "PLUGIN_NOT_FOUND",
            ErrorCode::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::MissingDependency => "MISSING_DEPENDENCY",
            ErrorCode::CircularDependency => "CIRCULAR_DEPENDENCY",
            ErrorCode::ModuleLoadFailed => "MODULE_LOAD_FAILED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            ErrorCode::ContributionUnavailable => "CONTRIBUTION_UNAVAILABLE",
            ErrorCode::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure of a runtime operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct OperationError {
    pub code: ErrorCode,
    pub message: String,
    pub plugin_id: Option<String>,
}

impl OperationError {
    pub fn new(code: ErrorCode, plugin_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            plugin_id: plugin_id.map(str::to_string),
        }
    }

    pub fn for_plugin(code: ErrorCode, plugin_id: &str, message: impl Into<String>) -> Self {
        Self::new(code, Some(plugin_id), message)
    }

    pub fn not_found(plugin_id: &str) -> Self {
        Self::for_plugin(
            ErrorCode::PluginNotFound,
            plugin_id,
            format!("Plugin '{}' is not registered", plugin_id),
        )
    }

    pub fn invalid_state(plugin_id: &str, state: PluginState, operation: &str) -> Self {
        Self::for_plugin(
            ErrorCode::InvalidState,
            plugin_id,
            format!("Cannot {} plugin '{}' in state {}", operation, plugin_id, state),
        )
    }

    pub fn cancelled(plugin_id: &str) -> Self {
        Self::for_plugin(
            ErrorCode::Cancelled,
            plugin_id,
            format!("Operation on '{}' was cancelled", plugin_id),
        )
    }
}

impl From<OperationError> for ActivationError {
    fn from(e: OperationError) -> Self {
        ActivationError::ActivationFailed {
            event: String::new(),
            plugin_id: e.plugin_id.unwrap_or_default(),
            code: e.code.to_string(),
            message: e.message,
        }
    }
}

/// Result type of runtime operations
pub type OperationResult<T> = Result<T, OperationError>;

/// Errors returned from plugin hooks
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Contribution registration failed: {0}")]
    Contribution(#[from] ContributionError),

    #[error("Teardown failed: {0}")]
    TeardownFailed(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for PluginError {
    fn from(msg: String) -> Self {
        PluginError::Other(msg)
    }
}

impl From<&str> for PluginError {
    fn from(msg: &str) -> Self {
        PluginError::Other(msg.to_string())
    }
}
