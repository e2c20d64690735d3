use thiserror::Error;

use crate::activation::contribution::ContributionKind;
use crate::plugin_system::error::ErrorCode;

#[derive(Debug, Clone, Error)]
pub enum ActivationError {
    #[error("Invalid activation trigger '{trigger}': {reason}")]
    InvalidTrigger { trigger: String, reason: String },

    #[error("Activation for '{event}' failed for plugin '{plugin_id}' ({code}): {message}")]
    ActivationFailed {
        event: String,
        plugin_id: String,
        code: String,
        message: String,
    },

    #[error("Plugin runtime is no longer available")]
    RuntimeUnavailable,
}

#[derive(Debug, Error)]
pub enum ContributionError {
    #[error("{kind} '{id}' is not registered")]
    NotFound { kind: ContributionKind, id: String },

    #[error("{kind} '{id}' is already registered by plugin '{owner}'")]
    Duplicate {
        kind: ContributionKind,
        id: String,
        owner: String,
    },

    #[error("{kind} '{id}' of plugin '{owner}' is unavailable: the plugin did not activate")]
    Unavailable {
        kind: ContributionKind,
        id: String,
        owner: String,
    },

    #[error("Contribution handler failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Activation(#[from] ActivationError),
}

impl ContributionError {
    /// Shorthand for handlers reporting a failure
    pub fn failed(message: impl Into<String>) -> Self {
        ContributionError::Failed(message.into())
    }

    /// The runtime code hosts report for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            ContributionError::NotFound { .. }
            | ContributionError::Unavailable { .. }
            | ContributionError::Activation(ActivationError::RuntimeUnavailable) => ErrorCode::ContributionUnavailable,
            ContributionError::Duplicate { .. } => ErrorCode::InvalidState,
            ContributionError::Failed(_) | ContributionError::Activation(_) => ErrorCode::ActivationFailed,
        }
    }
}
