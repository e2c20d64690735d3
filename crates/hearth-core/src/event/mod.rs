//! # Hearth Event System
//!
//! Cross-plugin notification and runtime observability. Events are published
//! through a [`SharedEventDispatcher`], which copies the current subscriber
//! list under a short lock and then invokes every subscriber outside it, so a
//! slow or failing subscriber never blocks delivery to the others.
//!
//! Synchronous handlers are adapted with [`sync_event_handler`] and
//! [`typed_event_handler`]; they are futures that complete immediately.
pub mod dispatcher;
pub mod error;
pub mod types;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;

use crate::event::error::EventSystemError;

/// Identifier returned by a subscription, used to unsubscribe
pub type SubscriptionId = u64;

/// Core event trait
pub trait Event: Any + fmt::Debug + Send + Sync {
    /// Get the name subscribers use to select this event
    fn name(&self) -> &str;

    /// Clone this event
    fn clone_event(&self) -> Box<dyn Event>;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Cast to mutable Any for downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Asynchronous event handler trait
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: &dyn Event) -> Result<(), EventSystemError>;
}

pub use dispatcher::{
    EventDispatcher, PublishReport, SharedEventDispatcher, create_dispatcher, sync_event_handler,
    typed_event_handler,
};
pub use types::{CustomEvent, InstallPhase, InstallProgress, PluginActivated, PluginStateChanged};

// Test module declaration
#[cfg(test)]
mod tests;
