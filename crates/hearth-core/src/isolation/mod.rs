//! # Hearth Isolation Contexts
//!
//! Each loaded plugin module lives in an [`IsolationContext`]: the context
//! owns the module (native library or static factory), the private
//! dependency libraries resolved from the plugin's install directory, and a
//! generation number. Everything the module produces is handed out as a
//! [`ContextBound`] handle that keeps the context alive and stops yielding
//! its value once the context is invalidated.
//!
//! The [`IsolationContextManager`] tracks contexts only through `Weak`
//! references. Unloading invalidates the context and then polls, with a
//! bounded retry budget, until no strong reference remains. A context that
//! is still referenced after the budget is reported as leaked rather than
//! treated as an error.
pub mod context;
pub mod error;
pub mod manager;
pub mod module;

pub use context::{ContextBound, DependencySource, IsolationContext, SharedModuleTable};
pub use error::IsolationError;
pub use manager::{IsolationContextManager, UnloadPolicy};
pub use module::{
    DefaultModuleLoader, LoadedModule, ModuleLoader, NativeModuleLoader, PluginFactory,
    StaticModuleLoader,
};

#[cfg(test)]
mod tests;
