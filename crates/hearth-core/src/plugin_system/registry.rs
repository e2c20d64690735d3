use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::activation::ActivationEvent;
use crate::isolation::{ContextBound, IsolationContext};
use crate::plugin_system::error::{OperationError, OperationResult};
use crate::plugin_system::lifecycle::PluginState;
use crate::plugin_system::manifest::{PendingPlugin, PluginManifest};
use crate::plugin_system::traits::{Plugin, Registration};

/// A live plugin instance
pub enum PluginInstance {
    /// Created inside an isolation context
    Isolated(ContextBound<Arc<dyn Plugin>>),
    /// Compiled into the host
    Builtin(Arc<dyn Plugin>),
}

impl PluginInstance {
    /// The plugin, unless its context has been invalidated
    pub fn plugin(&self) -> Option<Arc<dyn Plugin>> {
        match self {
            PluginInstance::Isolated(bound) => bound.get().cloned(),
            PluginInstance::Builtin(plugin) => Some(plugin.clone()),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            PluginInstance::Isolated(bound) => Some(bound.generation()),
            PluginInstance::Builtin(_) => None,
        }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginInstance::Isolated(bound) => f.debug_tuple("Isolated").field(bound).finish(),
            PluginInstance::Builtin(_) => f.write_str("Builtin"),
        }
    }
}

/// Runtime bookkeeping for a plugin that has left the pending table
#[derive(Debug)]
pub struct PluginRecord {
    pub manifest: Arc<PluginManifest>,
    pub manifest_path: Option<PathBuf>,
    state: PluginState,
    pub context: Option<Arc<IsolationContext>>,
    pub instance: Option<PluginInstance>,
    /// `None` for plugins registered in code
    pub install_path: Option<PathBuf>,
    pub data_path: PathBuf,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub registrations: Vec<Registration>,
    pub trigger: Option<ActivationEvent>,
    pub builtin: bool,
}

impl PluginRecord {
    pub fn new(pending: &PendingPlugin, data_path: PathBuf, builtin: bool) -> Self {
        let install_path = (!builtin && !pending.manifest.plugin_base_dir.as_os_str().is_empty())
            .then(|| pending.manifest.plugin_base_dir.clone());
        Self {
            manifest: pending.manifest.clone(),
            manifest_path: pending.manifest_path.clone(),
            state: PluginState::NotLoaded,
            context: None,
            instance: None,
            install_path,
            data_path,
            error_count: 0,
            last_error: None,
            registrations: Vec::new(),
            trigger: None,
            builtin,
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Moves to `next` if the lifecycle allows it; returns the previous state
    pub fn transition(&mut self, next: PluginState) -> OperationResult<PluginState> {
        if !self.state.can_transition_to(next) {
            return Err(OperationError::invalid_state(
                &self.manifest.id,
                self.state,
                &format!("move to {}", next),
            ));
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.last_error = Some(message.into());
    }

    /// Whether this plugin requires `dependency_id` (optional dependencies excluded)
    pub fn requires(&self, dependency_id: &str) -> bool {
        self.manifest
            .dependencies
            .iter()
            .any(|d| !d.is_optional() && d.plugin_name == dependency_id)
    }

    /// Turns the record back into a pending plugin, dropping its instance
    pub fn into_pending(self) -> PendingPlugin {
        PendingPlugin {
            identity: self.manifest.identity(),
            manifest_path: self.manifest_path,
            manifest: self.manifest,
        }
    }

    pub fn snapshot(&self) -> PluginRecordSnapshot {
        PluginRecordSnapshot {
            id: self.manifest.id.clone(),
            name: self.manifest.name.clone(),
            version: self.manifest.version.to_string(),
            state: self.state,
            pending: false,
            builtin: self.builtin,
            install_path: self.install_path.clone(),
            data_path: Some(self.data_path.clone()),
            context_generation: self.context.as_ref().map(|c| c.generation()),
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            registrations: self.registrations.len(),
            trigger: self.trigger.as_ref().map(ToString::to_string),
            dependencies: dependency_labels(&self.manifest),
        }
    }
}

/// `id@range`, with a trailing `?` for optional dependencies
fn dependency_labels(manifest: &PluginManifest) -> Vec<String> {
    manifest
        .dependencies
        .iter()
        .map(|d| {
            format!(
                "{}@{}{}",
                d.plugin_name,
                d.version_range,
                if d.is_optional() { "?" } else { "" }
            )
        })
        .collect()
}

/// Read-only copy of a record for monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRecordSnapshot {
    pub id: String,
    pub name: String,
    pub version: String,
    pub state: PluginState,
    /// Discovered but never loaded
    pub pending: bool,
    pub builtin: bool,
    pub install_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub context_generation: Option<u64>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub registrations: usize,
    pub trigger: Option<String>,
    pub dependencies: Vec<String>,
}

impl PluginRecordSnapshot {
    pub fn from_pending(pending: &PendingPlugin, builtin: bool) -> Self {
        let manifest = &pending.manifest;
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.to_string(),
            state: PluginState::NotLoaded,
            pending: true,
            builtin,
            install_path: (!manifest.plugin_base_dir.as_os_str().is_empty()).then(|| manifest.plugin_base_dir.clone()),
            data_path: None,
            context_generation: None,
            error_count: 0,
            last_error: None,
            registrations: 0,
            trigger: None,
            dependencies: dependency_labels(manifest),
        }
    }
}

/// The record table. Locks are held only for the duration of a closure,
/// never across an await.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: Mutex<HashMap<String, PluginRecord>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PluginRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: PluginRecord) {
        self.lock().insert(record.id().to_string(), record);
    }

    pub fn remove(&self, plugin_id: &str) -> Option<PluginRecord> {
        self.lock().remove(plugin_id)
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.lock().contains_key(plugin_id)
    }

    pub fn state(&self, plugin_id: &str) -> Option<PluginState> {
        self.lock().get(plugin_id).map(PluginRecord::state)
    }

    /// Runs `f` on the record under the table lock
    pub fn with<R>(&self, plugin_id: &str, f: impl FnOnce(&mut PluginRecord) -> R) -> Option<R> {
        self.lock().get_mut(plugin_id).map(f)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn ids_in_state(&self, state: PluginState) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .values()
            .filter(|r| r.state() == state)
            .map(|r| r.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Active plugins that require `plugin_id`
    pub fn active_dependents(&self, plugin_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .values()
            .filter(|r| r.state() == PluginState::Active && r.requires(plugin_id))
            .map(|r| r.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn snapshots(&self) -> Vec<PluginRecordSnapshot> {
        self.lock().values().map(PluginRecord::snapshot).collect()
    }
}
