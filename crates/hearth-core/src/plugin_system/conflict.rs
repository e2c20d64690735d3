use std::fmt;

use serde::Serialize;

use crate::plugin_system::error::ErrorCode;
use crate::plugin_system::version::{SemanticVersion, VersionRange};

/// Types of dependency conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConflictKind {
    /// The registered version does not satisfy a requirement
    Unsatisfied,
    /// Two requirers disagree: the registered version satisfies one but not the other
    MutuallyUnsatisfiable,
}

impl ConflictKind {
    pub fn description(&self) -> &str {
        match self {
            ConflictKind::Unsatisfied => "Requirement not satisfied by the available version",
            ConflictKind::MutuallyUnsatisfiable => "Requirers need incompatible versions",
        }
    }
}

/// A requirement the registered version of a dependency cannot meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyConflict {
    pub kind: ConflictKind,
    pub dependency_id: String,
    pub required_by: String,
    pub requirement: VersionRange,
    /// The requirer satisfied by the same version, for mutual conflicts
    pub other_required_by: Option<String>,
    pub other_requirement: Option<VersionRange>,
    pub available_version: SemanticVersion,
}

impl fmt::Display for DependencyConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' requires '{}' {} but {} is available",
            self.required_by, self.dependency_id, self.requirement, self.available_version
        )?;
        if let (Some(other), Some(range)) = (&self.other_required_by, &self.other_requirement) {
            write!(f, " (which satisfies '{}' requiring {})", other, range)?;
        }
        Ok(())
    }
}

/// A non-optional dependency absent from the registered set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingDependency {
    pub plugin_id: String,
    pub dependency_id: String,
    pub requirement: VersionRange,
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plugin_id == self.dependency_id {
            write!(f, "Plugin '{}' is not registered", self.plugin_id)
        } else {
            write!(
                f,
                "'{}' requires missing plugin '{}' ({})",
                self.plugin_id, self.dependency_id, self.requirement
            )
        }
    }
}

/// Everything that prevented a resolution, aggregated
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionFailure {
    pub conflicts: Vec<DependencyConflict>,
    pub missing: Vec<MissingDependency>,
    /// Path of the detected cycle, first node repeated at the end
    pub cycle: Option<Vec<String>>,
}

impl ResolutionFailure {
    /// The most specific code for this failure
    pub fn code(&self) -> ErrorCode {
        if self.cycle.is_some() {
            ErrorCode::CircularDependency
        } else if !self.missing.is_empty() {
            ErrorCode::MissingDependency
        } else if self
            .conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::MutuallyUnsatisfiable)
        {
            ErrorCode::VersionConflict
        } else {
            // No requirer accepts the registered version.
            ErrorCode::VersionNotFound
        }
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut problems: Vec<String> = Vec::new();
        if let Some(cycle) = &self.cycle {
            problems.push(format!("Circular dependency: {}", cycle.join(" -> ")));
        }
        problems.extend(self.missing.iter().map(|m| m.to_string()));
        problems.extend(self.conflicts.iter().map(|c| c.to_string()));
        write!(f, "{}", problems.join("; "))
    }
}

/// Outcome of resolving a set of plugin identities
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResolutionResult {
    /// Plugin ids with dependencies before dependents
    Success(Vec<String>),
    Failure(ResolutionFailure),
}

impl ResolutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ResolutionResult::Success(_))
    }

    pub fn order(&self) -> Option<&[String]> {
        match self {
            ResolutionResult::Success(order) => Some(order),
            ResolutionResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ResolutionFailure> {
        match self {
            ResolutionResult::Success(_) => None,
            ResolutionResult::Failure(failure) => Some(failure),
        }
    }

    pub fn into_order(self) -> Result<Vec<String>, ResolutionFailure> {
        match self {
            ResolutionResult::Success(order) => Ok(order),
            ResolutionResult::Failure(failure) => Err(failure),
        }
    }
}
