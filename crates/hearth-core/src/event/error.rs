//! # Hearth Event System Errors
//!
//! [`EventSystemError`] covers subscriber failures reported back to the
//! dispatcher. Handler failures never interrupt delivery to other
//! subscribers; they are collected in the publish report.
use crate::event::SubscriptionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventSystemError {
    #[error("Handler for event '{event_name}' failed: {message}")]
    HandlerFailed { event_name: String, message: String },

    #[error("Handler {subscription} for event '{event_name}' panicked: {message}")]
    HandlerPanicked {
        subscription: SubscriptionId,
        event_name: String,
        message: String,
    },

    #[error("Event '{event_name}' has an unexpected payload type")]
    UnexpectedEventType { event_name: String },
}

impl EventSystemError {
    /// Shorthand for handlers reporting a failure
    pub fn handler(event_name: impl Into<String>, message: impl Into<String>) -> Self {
        EventSystemError::HandlerFailed {
            event_name: event_name.into(),
            message: message.into(),
        }
    }
}
