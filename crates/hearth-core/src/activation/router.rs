use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::activation::trigger::{ActivationEvent, ActivationTrigger};

#[derive(Debug)]
struct PendingEntry {
    plugin_id: String,
    triggers: Vec<ActivationTrigger>,
}

#[derive(Debug, Default)]
struct RouterState {
    // Registration order is the match order.
    pending: Vec<PendingEntry>,
    activated: HashSet<String>,
    // Failed plugins kept out of matching until reload.
    excluded: HashSet<String>,
}

/// Matches fired activation events against pending plugins' triggers.
///
/// A plugin is reported by [`match_event`](Self::match_event) at most once
/// until [`reset`](Self::reset) clears its activated mark. An
/// [`exclude`](Self::exclude)d plugin is never reported until readmitted.
#[derive(Debug, Default)]
pub struct ActivationEventRouter {
    state: Mutex<RouterState>,
}

impl ActivationEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or replaces a pending plugin's triggers
    pub fn register(&self, plugin_id: &str, triggers: Vec<ActivationTrigger>) {
        let mut state = self.lock();
        match state.pending.iter_mut().find(|e| e.plugin_id == plugin_id) {
            Some(entry) => entry.triggers = triggers,
            None => state.pending.push(PendingEntry {
                plugin_id: plugin_id.to_string(),
                triggers,
            }),
        }
        log::debug!("Registered activation triggers for pending plugin '{}'", plugin_id);
    }

    /// Returns every still-pending plugin whose triggers match `event` and
    /// marks each as activated.
    pub fn match_event(&self, event: &ActivationEvent) -> Vec<String> {
        let mut state = self.lock();
        let RouterState {
            pending,
            activated,
            excluded,
        } = &mut *state;
        let mut matched = Vec::new();
        for entry in pending.iter() {
            if activated.contains(&entry.plugin_id) || excluded.contains(&entry.plugin_id) {
                continue;
            }
            if entry.triggers.iter().any(|t| t.matches(event)) {
                activated.insert(entry.plugin_id.clone());
                matched.push(entry.plugin_id.clone());
            }
        }
        if !matched.is_empty() {
            log::debug!("Activation event '{}' matched {:?}", event, matched);
        }
        matched
    }

    /// Like [`match_event`](Self::match_event) without marking anything
    pub fn peek_matches(&self, event: &ActivationEvent) -> Vec<String> {
        let state = self.lock();
        state
            .pending
            .iter()
            .filter(|e| !state.activated.contains(&e.plugin_id) && !state.excluded.contains(&e.plugin_id))
            .filter(|e| e.triggers.iter().any(|t| t.matches(event)))
            .map(|e| e.plugin_id.clone())
            .collect()
    }

    /// Removes a plugin from pending consideration, e.g. on promotion to a
    /// loaded record. The activated mark is kept.
    pub fn take(&self, plugin_id: &str) -> Option<Vec<ActivationTrigger>> {
        let mut state = self.lock();
        let index = state.pending.iter().position(|e| e.plugin_id == plugin_id)?;
        state.activated.insert(plugin_id.to_string());
        Some(state.pending.remove(index).triggers)
    }

    /// Forgets the plugin entirely
    pub fn remove(&self, plugin_id: &str) -> bool {
        let mut state = self.lock();
        state.activated.remove(plugin_id);
        state.excluded.remove(plugin_id);
        let before = state.pending.len();
        state.pending.retain(|e| e.plugin_id != plugin_id);
        before != state.pending.len()
    }

    /// Clears the activated mark so the plugin can be matched again
    pub fn reset(&self, plugin_id: &str) {
        self.lock().activated.remove(plugin_id);
    }

    /// Keeps the plugin out of matching; survives [`reset`](Self::reset)
    pub fn exclude(&self, plugin_id: &str) {
        self.lock().excluded.insert(plugin_id.to_string());
    }

    pub fn readmit(&self, plugin_id: &str) -> bool {
        self.lock().excluded.remove(plugin_id)
    }

    pub fn is_excluded(&self, plugin_id: &str) -> bool {
        self.lock().excluded.contains(plugin_id)
    }

    pub fn is_pending(&self, plugin_id: &str) -> bool {
        self.lock().pending.iter().any(|e| e.plugin_id == plugin_id)
    }

    pub fn is_activated(&self, plugin_id: &str) -> bool {
        self.lock().activated.contains(plugin_id)
    }

    /// Pending plugin ids in registration order
    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.iter().map(|e| e.plugin_id.clone()).collect()
    }
}
