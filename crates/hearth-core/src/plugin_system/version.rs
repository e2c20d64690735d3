//! # Plugin Versions and Version Ranges
//!
//! [`SemanticVersion`] is the `major.minor.patch[-prerelease][+build]` value
//! attached to every plugin identity, and [`VersionRange`] is the bounded
//! interval a dependency requirement accepts.
//!
//! Ranges are parsed from the constraint forms manifests use: exact (`1.2.3`,
//! `=1.2.3`), caret (`^1.2.3`), tilde (`~1.2.3`), single comparators
//! (`>=`, `>`, `<=`, `<`), hyphen ranges (`1.0.0 - 2.0.0`), wildcards
//! (`*`, `1.*`, `1.2.*`) and comma-separated comparator lists whose bounds
//! are intersected (`>=1.0.0, <2.0.0`). An empty constraint accepts anything.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Error type for version and range parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Empty version string")]
    Empty,

    #[error("Invalid version format '{0}': expected major.minor[.patch]")]
    InvalidFormat(String),

    #[error("Invalid numeric component '{component}' in version '{input}'")]
    InvalidNumber { input: String, component: String },

    #[error("Invalid prerelease tag '{tag}': {message}")]
    InvalidPrerelease { tag: String, message: String },

    #[error("Invalid build metadata '{build}': {message}")]
    InvalidBuild { build: String, message: String },

    #[error("Invalid version range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },
}

/// A semantic version.
///
/// Ordering compares `(major, minor, patch)` first. At an equal triple a
/// release ranks above any prerelease, and two prerelease tags compare by
/// ordinal string comparison. Build metadata is carried for display only and
/// takes no part in ordering, equality or hashing.
#[derive(Debug, Clone)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl SemanticVersion {
    /// Creates a release version with no prerelease or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Returns a copy of this version with the given prerelease tag
    pub fn with_prerelease(mut self, tag: impl Into<String>) -> Self {
        self.prerelease = Some(tag.into());
        self
    }

    /// Returns a copy of this version with the given build metadata
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    /// Parses `major.minor[.patch][-prerelease][+build]`.
    ///
    /// A two-part version (`1.0`) is read as `1.0.0`. A bare integer is
    /// rejected.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VersionError::Empty);
        }

        let (rest, build) = match text.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (text, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(VersionError::InvalidFormat(text.to_string()));
        }

        let major = parse_component(text, parts[0])?;
        let minor = parse_component(text, parts[1])?;
        let patch = match parts.get(2) {
            Some(part) => parse_component(text, part)?,
            None => 0,
        };

        let prerelease = match prerelease {
            Some(tag) => {
                semver::Prerelease::new(tag).map_err(|e| VersionError::InvalidPrerelease {
                    tag: tag.to_string(),
                    message: e.to_string(),
                })?;
                Some(tag.to_string())
            }
            None => None,
        };
        let build = match build {
            Some(meta) => {
                semver::BuildMetadata::new(meta).map_err(|e| VersionError::InvalidBuild {
                    build: meta.to_string(),
                    message: e.to_string(),
                })?;
                Some(meta.to_string())
            }
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    /// Whether this version carries a prerelease tag
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

fn parse_component(input: &str, component: &str) -> Result<u64, VersionError> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VersionError::InvalidNumber {
            input: input.to_string(),
            component: component.to_string(),
        });
    }
    component.parse::<u64>().map_err(|_| VersionError::InvalidNumber {
        input: input.to_string(),
        component: component.to_string(),
    })
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.as_str().cmp(b.as_str()),
            })
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SemanticVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemanticVersion {}

impl Hash for SemanticVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl FromStr for SemanticVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SemanticVersion::parse(s)
    }
}

impl From<&semver::Version> for SemanticVersion {
    fn from(v: &semver::Version) -> Self {
        Self {
            major: v.major,
            minor: v.minor,
            patch: v.patch,
            prerelease: (!v.pre.is_empty()).then(|| v.pre.as_str().to_string()),
            build: (!v.build.is_empty()).then(|| v.build.as_str().to_string()),
        }
    }
}

impl TryFrom<&SemanticVersion> for semver::Version {
    type Error = semver::Error;

    fn try_from(v: &SemanticVersion) -> Result<Self, Self::Error> {
        let mut out = semver::Version::new(v.major, v.minor, v.patch);
        if let Some(pre) = &v.prerelease {
            out.pre = semver::Prerelease::new(pre)?;
        }
        if let Some(build) = &v.build {
            out.build = semver::BuildMetadata::new(build)?;
        }
        Ok(out)
    }
}

/// A version interval with optional lower and upper bounds.
///
/// Both bounds absent means any version is accepted. The constraint text the
/// range was parsed from is kept for display; equality compares bounds only.
#[derive(Debug, Clone)]
pub struct VersionRange {
    min: Option<SemanticVersion>,
    max: Option<SemanticVersion>,
    min_inclusive: bool,
    max_inclusive: bool,
    constraint: String,
}

impl VersionRange {
    /// A range that accepts every version
    pub fn any() -> Self {
        Self {
            min: None,
            max: None,
            min_inclusive: true,
            max_inclusive: true,
            constraint: "*".to_string(),
        }
    }

    /// A range accepting exactly one version
    pub fn exact(version: SemanticVersion) -> Self {
        Self {
            constraint: version.to_string(),
            min: Some(version.clone()),
            max: Some(version),
            min_inclusive: true,
            max_inclusive: true,
        }
    }

    /// Builds a range from explicit bounds
    pub fn between(
        min: Option<SemanticVersion>,
        min_inclusive: bool,
        max: Option<SemanticVersion>,
        max_inclusive: bool,
    ) -> Self {
        let mut range = Self {
            min,
            max,
            min_inclusive,
            max_inclusive,
            constraint: String::new(),
        };
        range.constraint = range.bounds_text();
        range
    }

    /// Parses a constraint string.
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }

        let mut range = if trimmed.contains(',') {
            let mut acc = Self::any();
            for part in trimmed.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    return Err(VersionError::InvalidRange {
                        input: trimmed.to_string(),
                        reason: "empty comparator in list".to_string(),
                    });
                }
                acc = acc.intersect(&parse_single(part)?);
            }
            acc
        } else {
            parse_single(trimmed)?
        };
        range.constraint = trimmed.to_string();
        Ok(range)
    }

    /// Checks whether `version` falls within both bounds
    pub fn is_satisfied_by(&self, version: &SemanticVersion) -> bool {
        let above_min = match &self.min {
            Some(min) if self.min_inclusive => version >= min,
            Some(min) => version > min,
            None => true,
        };
        let below_max = match &self.max {
            Some(max) if self.max_inclusive => version <= max,
            Some(max) => version < max,
            None => true,
        };
        above_min && below_max
    }

    /// Narrows this range by another, keeping the tighter bound on each side
    pub fn intersect(&self, other: &VersionRange) -> VersionRange {
        let (min, min_inclusive) = tighter(
            (&self.min, self.min_inclusive),
            (&other.min, other.min_inclusive),
            Ordering::Greater,
        );
        let (max, max_inclusive) = tighter(
            (&self.max, self.max_inclusive),
            (&other.max, other.max_inclusive),
            Ordering::Less,
        );
        VersionRange::between(min, min_inclusive, max, max_inclusive)
    }

    /// Whether the range has no bounds at all
    pub fn is_any(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Whether no version can satisfy the range
    pub fn is_empty(&self) -> bool {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => match min.cmp(max) {
                Ordering::Greater => true,
                Ordering::Equal => !(self.min_inclusive && self.max_inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    pub fn min(&self) -> Option<&SemanticVersion> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&SemanticVersion> {
        self.max.as_ref()
    }

    pub fn min_inclusive(&self) -> bool {
        self.min_inclusive
    }

    pub fn max_inclusive(&self) -> bool {
        self.max_inclusive
    }

    /// Returns the original constraint string.
    pub fn constraint_string(&self) -> &str {
        &self.constraint
    }

    fn bounds_text(&self) -> String {
        let lower = self.min.as_ref().map(|v| {
            format!("{}{}", if self.min_inclusive { ">=" } else { ">" }, v)
        });
        let upper = self.max.as_ref().map(|v| {
            format!("{}{}", if self.max_inclusive { "<=" } else { "<" }, v)
        });
        match (lower, upper) {
            (Some(l), Some(u)) => format!("{}, {}", l, u),
            (Some(l), None) => l,
            (None, Some(u)) => u,
            (None, None) => "*".to_string(),
        }
    }
}

fn tighter(
    a: (&Option<SemanticVersion>, bool),
    b: (&Option<SemanticVersion>, bool),
    prefer: Ordering,
) -> (Option<SemanticVersion>, bool) {
    match (a.0, b.0) {
        (None, None) => (None, true),
        (Some(v), None) => (Some(v.clone()), a.1),
        (None, Some(v)) => (Some(v.clone()), b.1),
        (Some(va), Some(vb)) => {
            let ord = va.cmp(vb);
            if ord == Ordering::Equal {
                (Some(va.clone()), a.1 && b.1)
            } else if ord == prefer {
                (Some(va.clone()), a.1)
            } else {
                (Some(vb.clone()), b.1)
            }
        }
    }
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "*" | "x" | "X")
}

fn parse_single(text: &str) -> Result<VersionRange, VersionError> {
    if is_wildcard(text) {
        return Ok(VersionRange::any());
    }

    if let Some((lo, hi)) = text.split_once(" - ") {
        let lo = SemanticVersion::parse(lo)?;
        let hi = SemanticVersion::parse(hi)?;
        return Ok(VersionRange::between(Some(lo), true, Some(hi), true));
    }

    // Two-character operators must be checked before their one-character prefixes.
    if let Some(rest) = text.strip_prefix(">=") {
        return Ok(VersionRange::between(Some(SemanticVersion::parse(rest)?), true, None, true));
    }
    if let Some(rest) = text.strip_prefix("<=") {
        return Ok(VersionRange::between(None, true, Some(SemanticVersion::parse(rest)?), true));
    }
    if let Some(rest) = text.strip_prefix('>') {
        return Ok(VersionRange::between(Some(SemanticVersion::parse(rest)?), false, None, true));
    }
    if let Some(rest) = text.strip_prefix('<') {
        return Ok(VersionRange::between(None, true, Some(SemanticVersion::parse(rest)?), false));
    }
    if let Some(rest) = text.strip_prefix('=') {
        return Ok(VersionRange::exact(SemanticVersion::parse(rest)?));
    }
    if let Some(rest) = text.strip_prefix('^') {
        let base = SemanticVersion::parse(rest)?;
        let upper = if base.major > 0 {
            SemanticVersion::new(next_component(text, base.major)?, 0, 0)
        } else {
            SemanticVersion::new(0, next_component(text, base.minor)?, 0)
        };
        return Ok(VersionRange::between(Some(base), true, Some(upper), false));
    }
    if let Some(rest) = text.strip_prefix('~') {
        let base = SemanticVersion::parse(rest)?;
        let upper = SemanticVersion::new(base.major, next_component(text, base.minor)?, 0);
        return Ok(VersionRange::between(Some(base), true, Some(upper), false));
    }

    let parts: Vec<&str> = text.split('.').collect();
    if parts.last().is_some_and(|p| is_wildcard(p)) {
        return parse_wildcard(text, &parts);
    }

    Ok(VersionRange::exact(SemanticVersion::parse(text)?))
}

/// The exclusive upper bound component above `value`
fn next_component(text: &str, value: u64) -> Result<u64, VersionError> {
    value.checked_add(1).ok_or_else(|| VersionError::InvalidRange {
        input: text.to_string(),
        reason: format!("no upper bound exists above component {}", value),
    })
}

fn parse_wildcard(text: &str, parts: &[&str]) -> Result<VersionRange, VersionError> {
    let invalid = |reason: &str| VersionError::InvalidRange {
        input: text.to_string(),
        reason: reason.to_string(),
    };
    match parts {
        [major, w] if is_wildcard(w) => {
            let major = parse_component(text, major)?;
            Ok(VersionRange::between(
                Some(SemanticVersion::new(major, 0, 0)),
                true,
                Some(SemanticVersion::new(next_component(text, major)?, 0, 0)),
                false,
            ))
        }
        [major, minor, w] if is_wildcard(w) => {
            if is_wildcard(minor) {
                return parse_wildcard(text, &[*major, *minor]);
            }
            let major = parse_component(text, major)?;
            let minor = parse_component(text, minor)?;
            Ok(VersionRange::between(
                Some(SemanticVersion::new(major, minor, 0)),
                true,
                Some(SemanticVersion::new(major, next_component(text, minor)?, 0)),
                false,
            ))
        }
        _ => Err(invalid("unsupported wildcard position")),
    }
}

impl PartialEq for VersionRange {
    fn eq(&self, other: &Self) -> bool {
        self.min == other.min
            && self.max == other.max
            && (self.min.is_none() || self.min_inclusive == other.min_inclusive)
            && (self.max.is_none() || self.max_inclusive == other.max_inclusive)
    }
}

impl Eq for VersionRange {}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

/// Implement Display to show the original constraint string.
impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constraint)
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

impl serde::Serialize for VersionRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.constraint)
    }
}

impl serde::Serialize for SemanticVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
