//! Dependency validation and load ordering over registered plugin identities.
use std::collections::{HashMap, HashSet};

use crate::plugin_system::conflict::{
    ConflictKind, DependencyConflict, MissingDependency, ResolutionFailure, ResolutionResult,
};
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::manifest::PluginIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

/// Validates dependency constraints and produces a topological load order.
///
/// Registration order is preserved and drives every tie-break, so results
/// are deterministic for a given registration sequence.
#[derive(Debug, Default, Clone)]
pub struct DependencyResolver {
    identities: Vec<PluginIdentity>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an identity, replacing one with the same id in place
    pub fn register(&mut self, identity: PluginIdentity) {
        match self.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => *existing = identity,
            None => self.identities.push(identity),
        }
    }

    pub fn unregister(&mut self, plugin_id: &str) -> Option<PluginIdentity> {
        let index = self.identities.iter().position(|i| i.id == plugin_id)?;
        Some(self.identities.remove(index))
    }

    pub fn get(&self, plugin_id: &str) -> Option<&PluginIdentity> {
        self.identities.iter().find(|i| i.id == plugin_id)
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.get(plugin_id).is_some()
    }

    pub fn identities(&self) -> &[PluginIdentity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Resolves the whole registered set
    pub fn resolve(&self) -> ResolutionResult {
        let all: Vec<&PluginIdentity> = self.identities.iter().collect();
        resolve_set(&all)
    }

    /// Resolves only `plugin_id` and its transitive non-optional dependencies
    pub fn resolve_for(&self, plugin_id: &str) -> ResolutionResult {
        let Some(root) = self.get(plugin_id) else {
            return ResolutionResult::Failure(ResolutionFailure {
                missing: vec![MissingDependency {
                    plugin_id: plugin_id.to_string(),
                    dependency_id: plugin_id.to_string(),
                    requirement: Default::default(),
                }],
                ..Default::default()
            });
        };

        let mut closure: HashSet<&str> = HashSet::new();
        let mut stack = vec![root];
        while let Some(identity) = stack.pop() {
            if !closure.insert(identity.id.as_str()) {
                continue;
            }
            for dep in identity.dependencies.iter().filter(|d| d.required) {
                if let Some(target) = self.get(&dep.plugin_name) {
                    stack.push(target);
                }
            }
        }

        let subset: Vec<&PluginIdentity> = self
            .identities
            .iter()
            .filter(|i| closure.contains(i.id.as_str()))
            .collect();
        // Optional dependencies outside the closure are absent from the subset
        // and therefore neither checked nor ordered.
        resolve_set(&subset)
    }
}

fn resolve_set(set: &[&PluginIdentity]) -> ResolutionResult {
    let by_id: HashMap<&str, &PluginIdentity> = set.iter().map(|i| (i.id.as_str(), *i)).collect();
    let mut failure = ResolutionFailure::default();

    // Missing non-optional dependencies.
    for identity in set {
        for dep in identity.dependencies.iter().filter(|d| d.required) {
            if !by_id.contains_key(dep.plugin_name.as_str()) {
                failure.missing.push(MissingDependency {
                    plugin_id: identity.id.clone(),
                    dependency_id: dep.plugin_name.clone(),
                    requirement: dep.version_range.clone(),
                });
            }
        }
    }

    // Unsatisfied requirements, grouped by dependency in registration order
    // so a satisfied peer can be named as the second party.
    let mut dependency_order: Vec<&str> = Vec::new();
    let mut requirers_of: HashMap<&str, Vec<(&PluginIdentity, &PluginDependency)>> = HashMap::new();
    for identity in set {
        for dep in &identity.dependencies {
            let dependency_id = dep.plugin_name.as_str();
            if !by_id.contains_key(dependency_id) {
                continue;
            }
            let requirers = requirers_of.entry(dependency_id).or_insert_with(|| {
                dependency_order.push(dependency_id);
                Vec::new()
            });
            requirers.push((*identity, dep));
        }
    }

    for dependency_id in dependency_order {
        let (Some(target), Some(requirers)) = (by_id.get(dependency_id), requirers_of.get(dependency_id)) else {
            continue;
        };
        let satisfied_peer = requirers
            .iter()
            .find(|(_, d)| d.is_compatible_with(&target.version));

        for (requirer, dep) in requirers {
            if dep.is_compatible_with(&target.version) {
                continue;
            }
            let (kind, other_required_by, other_requirement) = match satisfied_peer {
                Some((peer, peer_dep)) if peer.id != requirer.id => (
                    ConflictKind::MutuallyUnsatisfiable,
                    Some(peer.id.clone()),
                    Some(peer_dep.version_range.clone()),
                ),
                _ => (ConflictKind::Unsatisfied, None, None),
            };
            failure.conflicts.push(DependencyConflict {
                kind,
                dependency_id: dependency_id.to_string(),
                required_by: requirer.id.clone(),
                requirement: dep.version_range.clone(),
                other_required_by,
                other_requirement,
                available_version: target.version.clone(),
            });
        }
    }

    if !failure.conflicts.is_empty() || !failure.missing.is_empty() {
        log::debug!(
            "Resolution failed with {} conflict(s) and {} missing dependency(ies)",
            failure.conflicts.len(),
            failure.missing.len()
        );
        return ResolutionResult::Failure(failure);
    }

    let mut order = Vec::with_capacity(set.len());
    let mut state: HashMap<&str, VisitState> = HashMap::new();
    for identity in set {
        if let Err(cycle) = visit(*identity, &by_id, &mut state, &mut order) {
            log::debug!("Circular dependency detected: {}", cycle.join(" -> "));
            return ResolutionResult::Failure(ResolutionFailure {
                cycle: Some(cycle),
                ..Default::default()
            });
        }
    }
    ResolutionResult::Success(order)
}

/// Post-order DFS from `root` on an explicit stack, so chain depth is not
/// bounded by the thread's stack. The frames double as the cycle path.
fn visit<'a>(
    root: &'a PluginIdentity,
    by_id: &HashMap<&'a str, &'a PluginIdentity>,
    state: &mut HashMap<&'a str, VisitState>,
    order: &mut Vec<String>,
) -> Result<(), Vec<String>> {
    if state.contains_key(root.id.as_str()) {
        return Ok(());
    }
    state.insert(root.id.as_str(), VisitState::InProgress);
    let mut stack: Vec<(&'a PluginIdentity, usize)> = vec![(root, 0)];

    while let Some((identity, next)) = stack.last_mut() {
        let identity: &'a PluginIdentity = *identity;
        let Some(dep) = identity.dependencies.get(*next) else {
            state.insert(identity.id.as_str(), VisitState::Done);
            order.push(identity.id.clone());
            stack.pop();
            continue;
        };
        *next += 1;

        // Absent optional dependencies are skipped; present ones order first.
        let Some(target) = by_id.get(dep.plugin_name.as_str()).copied() else {
            continue;
        };
        let target_id = target.id.as_str();
        match state.get(target_id) {
            Some(VisitState::Done) => {}
            Some(VisitState::InProgress) => {
                let start = stack.iter().position(|(i, _)| i.id == target_id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|(i, _)| i.id.clone()).collect();
                cycle.push(target_id.to_string());
                return Err(cycle);
            }
            None => {
                state.insert(target_id, VisitState::InProgress);
                stack.push((target, 0));
            }
        }
    }
    Ok(())
}
