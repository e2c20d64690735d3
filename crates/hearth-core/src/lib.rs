pub mod activation;
pub mod config;
pub mod event;
pub mod isolation;
pub mod kernel;
pub mod plugin_system;
pub mod utils;

// Re-export the types hosts and plugins use most
pub use activation::{ActivationEvent, ActivationTrigger, ContributionProxyRegistry, ContributionRegistry};
pub use config::{ConfigError, ConfigFormat, RuntimeConfig};
pub use event::{Event, SharedEventDispatcher};
pub use isolation::{IsolationContext, IsolationContextManager, PluginFactory};
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    DependencyResolver, ErrorCode, OperationError, Plugin, PluginContext, PluginManifest, PluginRuntime,
    PluginState, ResolutionResult, SemanticVersion, VersionRange,
};
