//! # Hearth Plugin System
//!
//! Discovery, dependency resolution and lifecycle management for plugins.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`version`]**: Semantic versions and the constraint grammar used by
//!   dependencies ([`VersionRange`]).
//! - **[`dependency`]**: A single requirement on another plugin ([`PluginDependency`]).
//! - **[`manifest`]**: Plugin metadata as read from `manifest.json`
//!   ([`PluginManifest`]) and the identity used for resolution.
//! - **[`resolver`]**: Topological ordering of plugins with cycle, missing
//!   and version-conflict detection ([`DependencyResolver`]).
//! - **[`conflict`]**: The outcome of a resolution ([`ResolutionResult`]).
//! - **[`lifecycle`]**: The [`PluginState`] machine and its allowed transitions.
//! - **[`loader`]**: Manifest scanning across the configured plugin roots.
//! - **[`registry`]**: Per-plugin runtime records and their snapshots.
//! - **[`runtime`]**: The orchestrator ([`PluginRuntime`]) tying resolution,
//!   lazy activation, isolation and teardown together.
//! - **[`traits`]**: The [`Plugin`] trait and the [`PluginContext`] handed to
//!   plugins during activation.
//! - **[`error`]**: [`OperationError`] and its stable [`ErrorCode`]s.
pub mod conflict;
pub mod dependency;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod traits;
pub mod version;

pub use conflict::{ResolutionFailure, ResolutionResult};
pub use dependency::PluginDependency;
pub use error::{ErrorCode, OperationError, OperationResult, PluginError, PluginSystemError};
pub use lifecycle::PluginState;
pub use loader::{ManifestLoader, ScanReport};
pub use manifest::{ManifestBuilder, PendingPlugin, PluginIdentity, PluginManifest};
pub use registry::{PluginRecordSnapshot, PluginRegistry};
pub use resolver::DependencyResolver;
pub use runtime::{ActivationReport, CancellationSignal, PluginRuntime, ShutdownReport};
pub use traits::{Plugin, PluginContext, Registration};
pub use version::{SemanticVersion, VersionError, VersionRange};

#[cfg(test)]
mod tests;
