use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::plugin_system::version::{SemanticVersion, VersionRange, VersionError};

/// Represents a dependency on another plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDependency {
    /// The id of the required plugin
    pub plugin_name: String,

    /// The version range that is acceptable; unconstrained when omitted in the manifest
    pub version_range: VersionRange,

    /// Whether this is a hard requirement or optional dependency
    pub required: bool,
}

/// Error raised for a dependency declaration that cannot be parsed
#[derive(Debug, Error)]
pub enum DependencyError {
    /// A dependency declaration could not be parsed
    #[error("Invalid dependency declaration '{declaration}': {source}")]
    InvalidDeclaration {
        declaration: String,
        #[source]
        source: VersionError,
    },
}

impl PluginDependency {
    /// Create a new required dependency with a specific version range
    pub fn required(plugin_name: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range,
            required: true,
        }
    }

    /// Create a new required dependency with any version
    pub fn required_any(plugin_name: &str) -> Self {
        Self::required(plugin_name, VersionRange::any())
    }

    /// Create a new optional dependency with a specific version range
    pub fn optional(plugin_name: &str, version_range: VersionRange) -> Self {
        Self {
            plugin_name: plugin_name.to_string(),
            version_range,
            required: false,
        }
    }

    /// Create a new optional dependency with any version
    pub fn optional_any(plugin_name: &str) -> Self {
        Self::optional(plugin_name, VersionRange::any())
    }

    /// Parses the manifest shorthand `"id@range"` or a bare `"id"`.
    pub fn parse(declaration: &str) -> Result<Self, DependencyError> {
        let declaration = declaration.trim();
        let (id, range) = match declaration.split_once('@') {
            Some((id, range)) => (id.trim(), range),
            None => (declaration, ""),
        };
        if id.is_empty() {
            return Err(DependencyError::InvalidDeclaration {
                declaration: declaration.to_string(),
                source: VersionError::Empty,
            });
        }
        let version_range =
            VersionRange::parse(range).map_err(|source| DependencyError::InvalidDeclaration {
                declaration: declaration.to_string(),
                source,
            })?;
        Ok(Self::required(id, version_range))
    }

    pub fn is_optional(&self) -> bool {
        !self.required
    }

    /// Check if this dependency accepts the given plugin version
    pub fn is_compatible_with(&self, version: &SemanticVersion) -> bool {
        self.version_range.is_satisfied_by(version)
    }
}

impl fmt::Display for PluginDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement_type = if self.required { "Requires" } else { "Optional" };
        if self.version_range.is_any() {
            write!(f, "{} plugin: {} (any version)", requirement_type, self.plugin_name)
        } else {
            write!(
                f,
                "{} plugin: {} (version: {})",
                requirement_type,
                self.plugin_name,
                self.version_range.constraint_string()
            )
        }
    }
}
