//! # Hearth Lazy Activation
//!
//! Plugins are not loaded at startup. Each pending plugin declares activation
//! triggers (`onCommand:<id>`, `onView:<id>`, `*`, ...); the
//! [`ActivationEventRouter`] matches fired [`ActivationEvent`]s against them
//! and reports which plugins should now be activated, at most once each.
//!
//! Until a plugin is activated its declared commands, views and menu entries
//! are present in the [`ContributionRegistry`] as proxies. The
//! [`ContributionProxyRegistry`] resolves lookups in two phases: a lookup
//! returns either a ready handle or an [`ActivationToken`] the caller awaits
//! before retrying.
pub mod contribution;
pub mod error;
pub mod proxy;
pub mod router;
pub mod trigger;

pub use contribution::{
    Binding, CommandHandler, Contribution, ContributionKind, ContributionRegistry, Keybinding,
    ViewFactory,
};
pub use error::{ActivationError, ContributionError};
pub use proxy::{ActivationSink, ActivationToken, ContributionProxyRegistry, Lookup};
pub use router::ActivationEventRouter;
pub use trigger::{ActivationEvent, ActivationKind, ActivationTrigger};

#[cfg(test)]
mod tests;
