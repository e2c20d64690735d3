use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Module for plugin '{plugin_id}' not found at '{}'", path.display())]
    ModuleNotFound { plugin_id: String, path: PathBuf },

    #[error("Failed to load module for plugin '{plugin_id}' from '{}': {source}", path.display())]
    LoadFailed {
        plugin_id: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("Module for plugin '{plugin_id}' does not export '{symbol}': {source}")]
    EntryPointMissing {
        plugin_id: String,
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    #[error("Entry point of plugin '{plugin_id}' panicked: {message}")]
    InstantiationPanicked { plugin_id: String, message: String },

    #[error("Isolation context of plugin '{plugin_id}' (generation {generation}) has been unloaded")]
    ContextUnloaded { plugin_id: String, generation: u64 },

    #[error("Dependency '{name}' of plugin '{plugin_id}' not found in its install directory or shared modules")]
    DependencyNotFound { plugin_id: String, name: String },

    #[error("Failed to load dependency '{name}' from '{}': {source}", path.display())]
    DependencyLoadFailed {
        name: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}
