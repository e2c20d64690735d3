//! # Plugin Runtime
//!
//! [`PluginRuntime`] owns every shared table of the plugin system (identities,
//! pending plugins, records, contributions, subscribers, isolation contexts)
//! and drives the lifecycle:
//!
//! 1. Discovered plugins are registered as *pending*: their identity goes to
//!    the resolver, their triggers to the router, and their declared
//!    contributions become proxies.
//! 2. A fired [`ActivationEvent`] (or a proxy being used) activates matching
//!    plugins. Required dependencies are activated first; the module is loaded
//!    into an isolation context, instantiated, initialized and asked to
//!    register its contributions.
//! 3. Deactivation tears a plugin down after its active dependents; unloading
//!    releases its context and returns it to the pending table.
//!
//! Every operation returns an [`OperationResult`]. Errors and panics raised by
//! plugin code are caught per plugin and surface as [`OperationError`]s.
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::activation::{
    ActivationError, ActivationEvent, ActivationEventRouter, ActivationKind, ActivationSink,
    ActivationTrigger, ContributionError, ContributionProxyRegistry, ContributionRegistry,
};
use crate::config::RuntimeConfig;
use crate::event::{InstallPhase, InstallProgress, PluginActivated, PluginStateChanged, SharedEventDispatcher};
use crate::isolation::{
    DefaultModuleLoader, IsolationContext, IsolationContextManager, ModuleLoader, PluginFactory,
    SharedModuleTable, StaticModuleLoader,
};
use crate::kernel::constants::MANIFEST_FILE_NAME;
use crate::plugin_system::conflict::ResolutionResult;
use crate::plugin_system::error::{ErrorCode, OperationError, OperationResult, PluginSystemError};
use crate::plugin_system::lifecycle::PluginState;
use crate::plugin_system::loader::{ManifestLoader, ScanReport};
use crate::plugin_system::manifest::{PendingPlugin, PluginManifest};
use crate::plugin_system::registry::{PluginInstance, PluginRecord, PluginRecordSnapshot, PluginRegistry};
use crate::plugin_system::resolver::DependencyResolver;
use crate::plugin_system::traits::{Plugin, PluginContext, Registration};
use crate::utils::{fs as hearth_fs, panic_message};

/// Cooperative cancellation for activation. Checked only between steps:
/// before the module is loaded and before the plugin is instantiated.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-plugin outcomes of firing an activation event
#[derive(Debug, Default)]
pub struct ActivationReport {
    pub activated: Vec<String>,
    pub failures: Vec<OperationError>,
}

impl ActivationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-plugin outcomes of [`PluginRuntime::shutdown`]
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub deactivated: Vec<String>,
    pub failures: Vec<OperationError>,
    /// Plugins whose isolation context is still referenced
    pub leaked: Vec<String>,
}

/// The plugin host. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PluginRuntime {
    inner: Arc<RuntimeInner>,
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRuntime")
            .field("records", &self.inner.records.ids())
            .field("pending", &self.pending_ids())
            .finish_non_exhaustive()
    }
}

struct RuntimeInner {
    config: RuntimeConfig,
    loader: ManifestLoader,
    resolver: RwLock<DependencyResolver>,
    pending: Mutex<HashMap<String, PendingPlugin>>,
    records: PluginRegistry,
    builtins: Mutex<HashMap<String, PluginFactory>>,
    activation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    router: ActivationEventRouter,
    contributions: Arc<ContributionRegistry>,
    proxies: ContributionProxyRegistry,
    events: SharedEventDispatcher,
    contexts: IsolationContextManager,
    statics: Arc<StaticModuleLoader>,
}

impl PluginRuntime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_events(config, SharedEventDispatcher::new())
    }

    /// Builds a runtime publishing to an existing dispatcher
    pub fn with_events(config: RuntimeConfig, events: SharedEventDispatcher) -> Self {
        let statics = Arc::new(StaticModuleLoader::new());
        let module_loader: Arc<dyn ModuleLoader> = Arc::new(DefaultModuleLoader::new(statics.clone()));
        let shared = Arc::new(SharedModuleTable::new(config.shared_modules_dir.clone()));
        let contexts = IsolationContextManager::new(module_loader, shared, config.unload_policy());
        let contributions = Arc::new(ContributionRegistry::new());
        let loader = ManifestLoader::from_config(&config);

        let inner = Arc::new_cyclic(|weak: &Weak<RuntimeInner>| {
            let sink: Weak<dyn ActivationSink> = weak.clone();
            RuntimeInner {
                config,
                loader,
                resolver: RwLock::new(DependencyResolver::new()),
                pending: Mutex::new(HashMap::new()),
                records: PluginRegistry::new(),
                builtins: Mutex::new(HashMap::new()),
                activation_locks: Mutex::new(HashMap::new()),
                router: ActivationEventRouter::new(),
                proxies: ContributionProxyRegistry::new(contributions.clone(), sink),
                contributions,
                events,
                contexts,
                statics,
            }
        });
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &SharedEventDispatcher {
        &self.inner.events
    }

    pub fn contributions(&self) -> &Arc<ContributionRegistry> {
        &self.inner.contributions
    }

    pub fn proxies(&self) -> &ContributionProxyRegistry {
        &self.inner.proxies
    }

    pub fn router(&self) -> &ActivationEventRouter {
        &self.inner.router
    }

    pub fn contexts(&self) -> &IsolationContextManager {
        &self.inner.contexts
    }

    /// Factories for modules compiled into the host, matched by the file
    /// name in a manifest's `main`
    pub fn static_modules(&self) -> &Arc<StaticModuleLoader> {
        &self.inner.statics
    }

    /// Scans the configured plugin roots and registers what it finds as pending
    pub async fn discover(&self) -> ScanReport {
        self.inner.discover().await
    }

    pub fn register_pending(&self, pending: PendingPlugin) -> OperationResult<()> {
        self.inner.register_pending(pending)
    }

    /// Registers a plugin compiled into the host. It stays pending until one
    /// of its triggers fires; no isolation context is created for it.
    pub fn register_builtin(&self, manifest: PluginManifest, factory: PluginFactory) -> OperationResult<()> {
        self.inner.register_builtin(manifest, factory)
    }

    /// Copies a plugin directory into the first plugins root and registers it
    pub async fn install_directory(&self, source: &Path) -> OperationResult<String> {
        self.inner.install_directory(source).await
    }

    pub fn resolve_all(&self) -> ResolutionResult {
        self.inner.resolver().resolve()
    }

    pub fn resolve_for(&self, plugin_id: &str) -> ResolutionResult {
        self.inner.resolver().resolve_for(plugin_id)
    }

    pub async fn fire_event(&self, event: ActivationEvent) -> ActivationReport {
        self.inner.fire_event(event, None).await
    }

    pub async fn fire_event_with(&self, event: ActivationEvent, cancel: CancellationSignal) -> ActivationReport {
        self.inner.fire_event(event, Some(cancel)).await
    }

    /// Fires `onStartup`
    pub async fn startup(&self) -> ActivationReport {
        self.inner.fire_event(ActivationEvent::startup(), None).await
    }

    pub async fn activate(&self, plugin_id: &str) -> OperationResult<()> {
        self.inner.activate_boxed(plugin_id.to_string(), None, None).await
    }

    pub async fn activate_with(
        &self,
        plugin_id: &str,
        trigger: Option<ActivationEvent>,
        cancel: Option<CancellationSignal>,
    ) -> OperationResult<()> {
        self.inner.activate_boxed(plugin_id.to_string(), trigger, cancel).await
    }

    pub async fn deactivate(&self, plugin_id: &str) -> OperationResult<()> {
        self.inner.deactivate_boxed(plugin_id.to_string()).await
    }

    /// Deactivates, releases the isolation context and returns the plugin to
    /// the pending table. `Ok(false)` means the context is still referenced
    /// and has been recorded as leaked. A plugin unloaded out of `Error`
    /// stays excluded from activation until [`reload`](Self::reload).
    pub async fn unload(&self, plugin_id: &str) -> OperationResult<bool> {
        self.inner.unload(plugin_id).await
    }

    /// Unloads, re-reads the manifest from disk and re-activates the plugin
    /// if it was active. This is the only way out of `Error`.
    pub async fn reload(&self, plugin_id: &str) -> OperationResult<bool> {
        self.inner.reload(plugin_id).await
    }

    pub async fn uninstall(&self, plugin_id: &str) -> OperationResult<bool> {
        self.inner.uninstall(plugin_id).await
    }

    /// Deactivates every active plugin, dependents first, and unloads all records
    pub async fn shutdown(&self) -> ShutdownReport {
        self.inner.shutdown().await
    }

    pub fn state(&self, plugin_id: &str) -> Option<PluginState> {
        self.inner.state(plugin_id)
    }

    /// Snapshots of every known plugin, pending ones included, sorted by id
    pub fn records(&self) -> Vec<PluginRecordSnapshot> {
        self.inner.snapshots()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.pending().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Re-checks contexts reported as leaked; returns the ids released since
    pub fn retry_leaked(&self) -> Vec<String> {
        self.inner.contexts.retry_leaked()
    }

    pub async fn execute_command(&self, id: &str, args: &[Value]) -> Result<Value, ContributionError> {
        self.inner.proxies.execute_command(id, args).await
    }

    pub async fn create_view(&self, id: &str) -> Result<Value, ContributionError> {
        self.inner.proxies.create_view(id).await
    }

    pub async fn invoke_menu(&self, id: &str, args: &[Value]) -> Result<Value, ContributionError> {
        self.inner.proxies.invoke_menu(id, args).await
    }
}

/// Declared triggers plus the implicit `onCommand`/`onView`/`onMenu` triggers
/// of every declared contribution, so that using a proxy always activates
/// its owner.
fn routing_triggers(manifest: &PluginManifest) -> Vec<ActivationTrigger> {
    let contributes = &manifest.contributes;
    let implicit = contributes
        .commands
        .iter()
        .map(|c| ActivationTrigger::on(ActivationKind::Command, c.id.as_str()))
        .chain(
            contributes
                .views
                .iter()
                .map(|v| ActivationTrigger::on(ActivationKind::View, v.id.as_str())),
        )
        .chain(
            contributes
                .menus
                .iter()
                .map(|m| ActivationTrigger::on(ActivationKind::Menu, m.id.as_str())),
        );

    let mut triggers = manifest.activation_events.clone();
    for trigger in implicit {
        if !triggers.contains(&trigger) {
            triggers.push(trigger);
        }
    }
    triggers
}

fn check_cancelled(plugin_id: &str, cancel: Option<&CancellationSignal>) -> OperationResult<()> {
    if cancel.is_some_and(CancellationSignal::is_cancelled) {
        log::info!("Activation of '{}' cancelled", plugin_id);
        return Err(OperationError::cancelled(plugin_id));
    }
    Ok(())
}

/// Runs `initialize` then `register_contributions`, catching errors and panics
async fn run_activation_hooks(plugin: &dyn Plugin, ctx: &mut PluginContext) -> Result<(), String> {
    match AssertUnwindSafe(plugin.initialize(ctx)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(format!("initialize failed: {}", e)),
        Err(payload) => return Err(format!("initialize panicked: {}", panic_message(payload.as_ref()))),
    }
    match AssertUnwindSafe(plugin.register_contributions(ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("register_contributions failed: {}", e)),
        Err(payload) => Err(format!(
            "register_contributions panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

impl RuntimeInner {
    fn resolver(&self) -> RwLockReadGuard<'_, DependencyResolver> {
        self.resolver.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolver_mut(&self) -> RwLockWriteGuard<'_, DependencyResolver> {
        self.resolver.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingPlugin>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn builtins(&self) -> MutexGuard<'_, HashMap<String, PluginFactory>> {
        self.builtins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn activation_lock(&self, plugin_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.activation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(plugin_id.to_string())
            .or_default()
            .clone()
    }

    fn is_pending(&self, plugin_id: &str) -> bool {
        self.pending().contains_key(plugin_id)
    }

    fn state(&self, plugin_id: &str) -> Option<PluginState> {
        match self.records.state(plugin_id) {
            Some(state) => Some(state),
            None => self.is_pending(plugin_id).then_some(PluginState::NotLoaded),
        }
    }

    fn snapshots(&self) -> Vec<PluginRecordSnapshot> {
        let mut snapshots = self.records.snapshots();
        {
            let builtins = self.builtins();
            snapshots.extend(
                self.pending()
                    .values()
                    .map(|p| PluginRecordSnapshot::from_pending(p, builtins.contains_key(p.id()))),
            );
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    // --- Registration ---

    fn register_pending(&self, pending: PendingPlugin) -> OperationResult<()> {
        let id = pending.id().to_string();
        match self.records.state(&id) {
            Some(PluginState::Uninstalled) => {
                self.records.remove(&id);
            }
            Some(state) => return Err(OperationError::invalid_state(&id, state, "register")),
            None => {}
        }

        // Clears stale proxies and keybindings from a previous registration.
        self.contributions.dispose_owner(&id);
        self.resolver_mut().register(pending.identity.clone());
        self.proxies.register_proxies(&pending);
        self.router.register(&id, routing_triggers(&pending.manifest));
        self.router.reset(&id);
        if self.pending().insert(id.clone(), pending).is_some() {
            log::info!("Replaced pending registration of '{}'", id);
        } else {
            log::info!("Registered pending plugin '{}'", id);
        }
        Ok(())
    }

    fn register_builtin(&self, manifest: PluginManifest, factory: PluginFactory) -> OperationResult<()> {
        let id = manifest.id.clone();
        let previous = self.builtins().insert(id.clone(), factory);
        let result = self.register_pending(PendingPlugin::from_manifest(manifest));
        if result.is_err() {
            let mut builtins = self.builtins();
            match previous {
                Some(previous) => builtins.insert(id, previous),
                None => builtins.remove(&id),
            };
        }
        result
    }

    /// Drops every trace of a plugin except its record
    async fn forget(&self, plugin_id: &str) {
        self.pending().remove(plugin_id);
        self.resolver_mut().unregister(plugin_id);
        self.router.remove(plugin_id);
        self.contributions.dispose_owner(plugin_id);
        self.builtins().remove(plugin_id);
        self.events.unsubscribe_owner(plugin_id).await;
    }

    async fn discover(&self) -> ScanReport {
        let mut report = self.loader.scan().await;
        let found = std::mem::take(&mut report.plugins);
        for pending in found {
            let live = self
                .records
                .state(pending.id())
                .is_some_and(|s| s != PluginState::Uninstalled);
            if live {
                log::debug!("Plugin '{}' is already loaded; skipping rediscovery", pending.id());
                continue;
            }
            let path = pending.manifest_path.clone().unwrap_or_default();
            match self.register_pending(pending.clone()) {
                Ok(()) => report.plugins.push(pending),
                Err(e) => report.failures.push((path, PluginSystemError::Operation(e))),
            }
        }
        report
    }

    // --- Events ---

    async fn publish_state(&self, plugin_id: &str, old_state: PluginState, new_state: PluginState) {
        log::debug!("Plugin '{}': {} -> {}", plugin_id, old_state, new_state);
        self.events
            .publish(&PluginStateChanged {
                plugin_id: plugin_id.to_string(),
                old_state,
                new_state,
            })
            .await;
    }

    async fn progress(&self, plugin_id: &str, phase: InstallPhase, fraction: f32, message: impl Into<String>) {
        let event = InstallProgress::new(plugin_id, phase, fraction, message);
        log::info!("Install '{}': {} ({:.0}%) {}", plugin_id, event.phase, event.fraction * 100.0, event.message);
        self.events.publish(&event).await;
    }

    /// Applies a lifecycle transition and announces it
    async fn transition(&self, plugin_id: &str, next: PluginState) -> OperationResult<PluginState> {
        let previous = self
            .records
            .with(plugin_id, |r| r.transition(next))
            .ok_or_else(|| OperationError::not_found(plugin_id))??;
        self.publish_state(plugin_id, previous, next).await;
        Ok(previous)
    }

    /// Moves the plugin to `Error` and excludes it from routing until reload
    async fn fail<T>(&self, plugin_id: &str, code: ErrorCode, message: String) -> OperationResult<T> {
        let moved = self
            .records
            .with(plugin_id, |r| {
                r.record_error(message.clone());
                r.transition(PluginState::Error).ok()
            })
            .flatten();
        if let Some(previous) = moved {
            self.publish_state(plugin_id, previous, PluginState::Error).await;
        }
        self.router.take(plugin_id);
        log::error!("Plugin '{}' failed: {}", plugin_id, message);
        Err(OperationError::for_plugin(code, plugin_id, message))
    }

    async fn dispose_registrations(&self, plugin_id: &str, registrations: Vec<Registration>) {
        let count = registrations.len();
        for registration in registrations {
            match registration {
                Registration::Contribution { kind, id } => {
                    self.contributions.dispose(kind, &id, plugin_id);
                }
                Registration::Subscription(subscription) => {
                    self.events.unsubscribe(subscription).await;
                }
            }
        }
        if count > 0 {
            log::debug!("Disposed {} registrations of '{}'", count, plugin_id);
        }
    }

    // --- Activation ---

    async fn fire_event(&self, event: ActivationEvent, cancel: Option<CancellationSignal>) -> ActivationReport {
        let matched = self.router.match_event(&event);
        let mut report = ActivationReport::default();
        for plugin_id in matched {
            match self
                .activate_boxed(plugin_id.clone(), Some(event.clone()), cancel.clone())
                .await
            {
                Ok(()) => report.activated.push(plugin_id),
                Err(e) => {
                    log::warn!("Activation of '{}' on '{}' failed: {}", plugin_id, event, e);
                    report.failures.push(e);
                }
            }
        }
        report
    }

    fn activate_boxed(
        &self,
        plugin_id: String,
        trigger: Option<ActivationEvent>,
        cancel: Option<CancellationSignal>,
    ) -> BoxFuture<'_, OperationResult<()>> {
        Box::pin(self.activate(plugin_id, trigger, cancel))
    }

    async fn activate(
        &self,
        plugin_id: String,
        trigger: Option<ActivationEvent>,
        cancel: Option<CancellationSignal>,
    ) -> OperationResult<()> {
        let lock = self.activation_lock(&plugin_id);
        let _guard = lock.lock().await;
        let started = Instant::now();

        match self.records.state(&plugin_id) {
            Some(PluginState::Active) => return Ok(()),
            Some(PluginState::Loaded | PluginState::Deactivated) => {}
            Some(state) => return Err(OperationError::invalid_state(&plugin_id, state, "activate")),
            None if self.router.is_excluded(&plugin_id) => {
                return Err(OperationError::for_plugin(
                    ErrorCode::InvalidState,
                    &plugin_id,
                    "Plugin was unloaded after a failure and must be reloaded before it can activate",
                ));
            }
            None if self.is_pending(&plugin_id) => {}
            None => return Err(OperationError::not_found(&plugin_id)),
        }

        if let Err(e) = self.prepare(&plugin_id, cancel.as_ref()).await {
            // Not a plugin fault: the plugin may be matched again later.
            self.router.reset(&plugin_id);
            return Err(e);
        }
        self.start(&plugin_id, trigger, started).await
    }

    /// Resolves, activates required dependencies and loads the module
    async fn prepare(&self, plugin_id: &str, cancel: Option<&CancellationSignal>) -> OperationResult<()> {
        let dependencies = {
            let resolver = self.resolver();
            if let ResolutionResult::Failure(failure) = resolver.resolve_for(plugin_id) {
                return Err(OperationError::for_plugin(failure.code(), plugin_id, failure.to_string()));
            }
            resolver
                .get(plugin_id)
                .map(|identity| {
                    identity
                        .dependencies
                        .iter()
                        .filter(|d| !d.is_optional())
                        .map(|d| d.plugin_name.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        for dependency in dependencies {
            check_cancelled(plugin_id, cancel)?;
            if let Err(e) = self.activate_boxed(dependency.clone(), None, cancel.cloned()).await {
                return Err(OperationError::for_plugin(
                    if e.code == ErrorCode::Cancelled { ErrorCode::Cancelled } else { ErrorCode::ActivationFailed },
                    plugin_id,
                    format!("Dependency '{}' failed to activate: {}", dependency, e.message),
                ));
            }
        }

        if !self.records.contains(plugin_id) {
            check_cancelled(plugin_id, cancel)?;
            self.load(plugin_id).await?;
        }
        check_cancelled(plugin_id, cancel)
    }

    /// Promotes a pending plugin to a record and loads its module
    async fn load(&self, plugin_id: &str) -> OperationResult<()> {
        let pending = self
            .pending()
            .remove(plugin_id)
            .ok_or_else(|| OperationError::not_found(plugin_id))?;
        let builtin = self.builtins().contains_key(plugin_id);
        let mut record = PluginRecord::new(&pending, self.config.data_root.join(plugin_id), builtin);
        record.transition(PluginState::Loading)?;
        self.records.insert(record);
        self.publish_state(plugin_id, PluginState::NotLoaded, PluginState::Loading)
            .await;

        if !builtin {
            match self.load_module(&pending.manifest) {
                Ok(context) => {
                    self.records.with(plugin_id, |r| r.context = Some(context));
                }
                Err(message) => {
                    return self.fail(plugin_id, ErrorCode::ModuleLoadFailed, message).await;
                }
            }
        }
        self.transition(plugin_id, PluginState::Loaded).await?;
        Ok(())
    }

    fn load_module(&self, manifest: &PluginManifest) -> Result<Arc<IsolationContext>, String> {
        let module_path = manifest
            .module_path()
            .ok_or_else(|| format!("Manifest of '{}' declares no entry module", manifest.id))?;
        self.contexts
            .create_context(&manifest.id, &module_path, &manifest.plugin_base_dir)
            .map_err(|e| e.to_string())
    }

    /// The plugin instance, created on first activation
    fn instance(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>, String> {
        let existing = self
            .records
            .with(plugin_id, |r| r.instance.as_ref().and_then(PluginInstance::plugin))
            .flatten();
        if let Some(plugin) = existing {
            return Ok(plugin);
        }

        let context = self.records.with(plugin_id, |r| r.context.clone()).flatten();
        let instance = match context {
            Some(context) => PluginInstance::Isolated(context.instantiate().map_err(|e| e.to_string())?),
            None => {
                let factory = self
                    .builtins()
                    .get(plugin_id)
                    .cloned()
                    .ok_or_else(|| format!("No module or factory for plugin '{}'", plugin_id))?;
                let plugin = catch_unwind(AssertUnwindSafe(|| factory())).map_err(|payload| {
                    format!("Factory of '{}' panicked: {}", plugin_id, panic_message(payload.as_ref()))
                })?;
                PluginInstance::Builtin(Arc::from(plugin))
            }
        };
        let plugin = instance
            .plugin()
            .ok_or_else(|| format!("Isolation context of '{}' has been unloaded", plugin_id))?;
        self.records.with(plugin_id, move |r| r.instance = Some(instance));
        Ok(plugin)
    }

    /// `Loaded`/`Deactivated` to `Active`
    async fn start(&self, plugin_id: &str, trigger: Option<ActivationEvent>, started: Instant) -> OperationResult<()> {
        self.transition(plugin_id, PluginState::Activating).await?;

        let plugin = match self.instance(plugin_id) {
            Ok(plugin) => plugin,
            Err(message) => return self.fail(plugin_id, ErrorCode::ActivationFailed, message).await,
        };

        let Some((install_path, data_path)) = self
            .records
            .with(plugin_id, |r| (r.install_path.clone(), r.data_path.clone()))
        else {
            return Err(OperationError::not_found(plugin_id));
        };
        if let Err(e) = tokio::fs::create_dir_all(&data_path).await {
            log::warn!(
                "Could not create data directory {} for '{}': {}",
                data_path.display(),
                plugin_id,
                e
            );
        }

        let mut ctx = PluginContext::new(
            plugin_id,
            install_path,
            data_path,
            trigger.clone(),
            self.contributions.clone(),
            self.events.clone(),
        );
        let outcome = run_activation_hooks(plugin.as_ref(), &mut ctx).await;
        drop(plugin);
        let registrations = ctx.take_registrations();

        if let Err(message) = outcome {
            self.dispose_registrations(plugin_id, registrations).await;
            return self.fail(plugin_id, ErrorCode::ActivationFailed, message).await;
        }

        let stored_trigger = trigger.clone();
        self.records.with(plugin_id, move |r| {
            r.registrations = registrations;
            r.trigger = stored_trigger;
        });
        self.transition(plugin_id, PluginState::Active).await?;
        self.proxies.dispose_proxies(plugin_id);
        self.router.take(plugin_id);

        let elapsed = started.elapsed();
        log::info!("Activated plugin '{}' in {:?}", plugin_id, elapsed);
        self.events
            .publish(&PluginActivated {
                plugin_id: plugin_id.to_string(),
                trigger,
                elapsed,
            })
            .await;
        Ok(())
    }

    // --- Teardown ---

    fn deactivate_boxed(&self, plugin_id: String) -> BoxFuture<'_, OperationResult<()>> {
        Box::pin(self.deactivate(plugin_id))
    }

    async fn deactivate(&self, plugin_id: String) -> OperationResult<()> {
        // Dependents go first, before this plugin's lock is taken.
        for dependent in self.records.active_dependents(&plugin_id) {
            if let Err(e) = self.deactivate_boxed(dependent.clone()).await {
                log::warn!(
                    "Dependent '{}' of '{}' did not deactivate cleanly: {}",
                    dependent,
                    plugin_id,
                    e
                );
            }
        }

        let lock = self.activation_lock(&plugin_id);
        let _guard = lock.lock().await;

        match self.records.state(&plugin_id) {
            Some(PluginState::Active) => {}
            Some(PluginState::Loaded | PluginState::Deactivated) => return Ok(()),
            Some(state) => return Err(OperationError::invalid_state(&plugin_id, state, "deactivate")),
            None if self.is_pending(&plugin_id) => return Ok(()),
            None => return Err(OperationError::not_found(&plugin_id)),
        }

        self.transition(&plugin_id, PluginState::Deactivating).await?;

        let plugin = self
            .records
            .with(&plugin_id, |r| r.instance.as_ref().and_then(PluginInstance::plugin))
            .flatten();
        let outcome = match plugin {
            Some(plugin) => match AssertUnwindSafe(plugin.deactivate()).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(format!("deactivate failed: {}", e)),
                Err(payload) => Err(format!("deactivate panicked: {}", panic_message(payload.as_ref()))),
            },
            None => Ok(()),
        };

        let registrations = self
            .records
            .with(&plugin_id, |r| std::mem::take(&mut r.registrations))
            .unwrap_or_default();
        self.dispose_registrations(&plugin_id, registrations).await;

        match outcome {
            Ok(()) => {
                self.transition(&plugin_id, PluginState::Deactivated).await?;
                log::info!("Deactivated plugin '{}'", plugin_id);
                Ok(())
            }
            Err(message) => self.fail(&plugin_id, ErrorCode::DeactivationFailed, message).await,
        }
    }

    /// Drops a record taken out of the table and verifies its context is released
    async fn release(&self, record: PluginRecord) -> (PendingPlugin, bool) {
        let plugin_id = record.id().to_string();
        let builtin = record.builtin;
        let pending = record.into_pending();
        let released = builtin || self.contexts.unload_with_policy(&plugin_id).await;
        (pending, released)
    }

    async fn unload(&self, plugin_id: &str) -> OperationResult<bool> {
        if self.records.state(plugin_id) == Some(PluginState::Active) {
            if let Err(e) = self.deactivate_boxed(plugin_id.to_string()).await {
                log::warn!("Unloading '{}' after failed deactivation: {}", plugin_id, e);
            }
        }

        let lock = self.activation_lock(plugin_id);
        let _guard = lock.lock().await;

        let failed = match self.records.state(plugin_id) {
            Some(PluginState::Uninstalled) => {
                return Err(OperationError::invalid_state(plugin_id, PluginState::Uninstalled, "unload"));
            }
            Some(PluginState::Active) => {
                return Err(OperationError::invalid_state(plugin_id, PluginState::Active, "unload"));
            }
            Some(state) => state == PluginState::Error,
            None if self.is_pending(plugin_id) => return Ok(true),
            None => return Err(OperationError::not_found(plugin_id)),
        };

        let Some(record) = self.records.remove(plugin_id) else {
            return Err(OperationError::not_found(plugin_id));
        };
        let (pending, released) = self.release(record).await;
        if !released {
            log::warn!("Isolation context of '{}' is still referenced after unload", plugin_id);
        }
        self.register_pending(pending)?;
        if failed {
            self.router.exclude(plugin_id);
            log::info!("Plugin '{}' stays excluded from activation until reload", plugin_id);
        }
        log::info!("Unloaded plugin '{}'", plugin_id);
        Ok(released)
    }

    async fn reload(&self, plugin_id: &str) -> OperationResult<bool> {
        let was_active = self.records.state(plugin_id) == Some(PluginState::Active);
        let released = self.unload(plugin_id).await?;
        self.router.readmit(plugin_id);

        let manifest_path = self.pending().get(plugin_id).and_then(|p| p.manifest_path.clone());
        if let Some(path) = manifest_path {
            let manifest = ManifestLoader::load_manifest(&path).await.map_err(|e| {
                OperationError::for_plugin(ErrorCode::ManifestInvalid, plugin_id, e.to_string())
            })?;
            if manifest.id == plugin_id {
                self.register_pending(PendingPlugin::from_manifest(manifest))?;
            } else {
                log::warn!(
                    "Manifest at {} now declares id '{}'; keeping '{}'",
                    path.display(),
                    manifest.id,
                    plugin_id
                );
            }
        }

        if was_active {
            self.activate_boxed(plugin_id.to_string(), None, None).await?;
        }
        Ok(released)
    }

    async fn uninstall(&self, plugin_id: &str) -> OperationResult<bool> {
        if self.records.state(plugin_id) == Some(PluginState::Active) {
            if let Err(e) = self.deactivate_boxed(plugin_id.to_string()).await {
                log::warn!("Uninstalling '{}' after failed deactivation: {}", plugin_id, e);
            }
        }

        let lock = self.activation_lock(plugin_id);
        let _guard = lock.lock().await;

        let base_dir = match self.records.state(plugin_id) {
            Some(PluginState::Loaded | PluginState::Deactivated) => {
                let (base_dir, context_owner) = self
                    .records
                    .with(plugin_id, |r| {
                        r.instance = None;
                        r.context = None;
                        (r.manifest.plugin_base_dir.clone(), !r.builtin)
                    })
                    .ok_or_else(|| OperationError::not_found(plugin_id))?;
                self.transition(plugin_id, PluginState::Uninstalled).await?;
                let released = !context_owner || self.contexts.unload_with_policy(plugin_id).await;
                self.forget(plugin_id).await;
                self.remove_installed_files(plugin_id, &base_dir).await;
                return Ok(released);
            }
            Some(PluginState::Error) => {
                let record = self
                    .records
                    .remove(plugin_id)
                    .ok_or_else(|| OperationError::not_found(plugin_id))?;
                let base_dir = record.manifest.plugin_base_dir.clone();
                let (_, released) = self.release(record).await;
                self.forget(plugin_id).await;
                self.remove_installed_files(plugin_id, &base_dir).await;
                return Ok(released);
            }
            Some(state) => return Err(OperationError::invalid_state(plugin_id, state, "uninstall")),
            None => self
                .pending()
                .get(plugin_id)
                .map(|p| p.manifest.plugin_base_dir.clone())
                .ok_or_else(|| OperationError::not_found(plugin_id))?,
        };

        self.forget(plugin_id).await;
        self.remove_installed_files(plugin_id, &base_dir).await;
        log::info!("Uninstalled pending plugin '{}'", plugin_id);
        Ok(true)
    }

    /// Removes the plugin directory when it lives directly under a plugins root
    async fn remove_installed_files(&self, plugin_id: &str, base_dir: &Path) {
        let managed = base_dir
            .parent()
            .is_some_and(|parent| self.config.plugins_root.iter().any(|root| root == parent));
        if !managed {
            return;
        }
        match hearth_fs::remove_dir_if_exists(base_dir).await {
            Ok(true) => log::info!("Removed {} for '{}'", base_dir.display(), plugin_id),
            Ok(false) => {}
            Err(e) => log::warn!("Could not remove {} for '{}': {}", base_dir.display(), plugin_id, e),
        }
    }

    async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let order = match self.resolver().resolve() {
            ResolutionResult::Success(order) => order,
            ResolutionResult::Failure(_) => self.records.ids(),
        };
        for plugin_id in order.iter().rev() {
            if self.records.state(plugin_id) != Some(PluginState::Active) {
                continue;
            }
            match self.deactivate_boxed(plugin_id.clone()).await {
                Ok(()) => report.deactivated.push(plugin_id.clone()),
                Err(e) => report.failures.push(e),
            }
        }
        // Dependents deactivated on behalf of a dependency count too.
        for plugin_id in self.records.ids_in_state(PluginState::Deactivated) {
            if !report.deactivated.contains(&plugin_id) {
                report.deactivated.push(plugin_id);
            }
        }

        for plugin_id in self.records.ids() {
            if self.records.state(&plugin_id) == Some(PluginState::Uninstalled) {
                continue;
            }
            match self.unload(&plugin_id).await {
                Ok(true) => {}
                Ok(false) => report.leaked.push(plugin_id),
                Err(e) => report.failures.push(e),
            }
        }
        log::info!(
            "Shutdown complete: {} deactivated, {} failed, {} leaked",
            report.deactivated.len(),
            report.failures.len(),
            report.leaked.len()
        );
        report
    }

    // --- Installation ---

    async fn install_directory(&self, source: &Path) -> OperationResult<String> {
        let manifest = match ManifestLoader::load_manifest(&source.join(MANIFEST_FILE_NAME)).await {
            Ok(manifest) => manifest,
            Err(e) => {
                let label = source.display().to_string();
                self.progress(&label, InstallPhase::Failed, 1.0, e.to_string()).await;
                return Err(OperationError::new(ErrorCode::ManifestInvalid, None, e.to_string()));
            }
        };
        let plugin_id = manifest.id.clone();
        self.progress(&plugin_id, InstallPhase::Validating, 0.1, "Manifest is valid").await;

        let known = self.is_pending(&plugin_id)
            || self
                .records
                .state(&plugin_id)
                .is_some_and(|s| s != PluginState::Uninstalled);
        if known {
            return self
                .install_failed(
                    &plugin_id,
                    ErrorCode::InvalidState,
                    format!("Plugin '{}' is already installed", plugin_id),
                )
                .await;
        }
        let Some(root) = self.config.plugins_root.first() else {
            return self
                .install_failed(&plugin_id, ErrorCode::InvalidState, "No plugins root configured".into())
                .await;
        };
        let target = root.join(&plugin_id);
        if hearth_fs::is_dir(&target).await {
            return self
                .install_failed(
                    &plugin_id,
                    ErrorCode::InvalidState,
                    format!("Target directory {} already exists", target.display()),
                )
                .await;
        }

        self.progress(
            &plugin_id,
            InstallPhase::Installing,
            0.4,
            format!("Copying into {}", target.display()),
        )
        .await;
        let registered = match hearth_fs::copy_dir_all(source, &target).await {
            Ok(_) => ManifestLoader::load_plugin_dir(&target)
                .await
                .map_err(|e| OperationError::for_plugin(ErrorCode::ManifestInvalid, &plugin_id, e.to_string()))
                .and_then(|pending| self.register_pending(pending)),
            Err(e) => Err(OperationError::for_plugin(
                ErrorCode::ModuleLoadFailed,
                &plugin_id,
                format!("Copy failed: {}", e),
            )),
        };
        if let Err(e) = registered {
            self.roll_back(&plugin_id, &target).await;
            return self.install_failed(&plugin_id, e.code, e.message).await;
        }

        let resolution = self.resolver().resolve_for(&plugin_id);
        if let ResolutionResult::Failure(failure) = resolution {
            self.roll_back(&plugin_id, &target).await;
            return self
                .install_failed(&plugin_id, failure.code(), failure.to_string())
                .await;
        }

        if self.router.peek_matches(&ActivationEvent::startup()).contains(&plugin_id) {
            self.progress(&plugin_id, InstallPhase::Activating, 0.8, "Activating").await;
            self.router.match_event(&ActivationEvent::startup());
            if let Err(e) = self
                .activate_boxed(plugin_id.clone(), Some(ActivationEvent::startup()), None)
                .await
            {
                return self.install_failed(&plugin_id, e.code, e.message).await;
            }
        } else {
            self.progress(
                &plugin_id,
                InstallPhase::Activating,
                0.8,
                "Activation deferred until a trigger fires",
            )
            .await;
        }

        self.progress(&plugin_id, InstallPhase::Completed, 1.0, "Installed").await;
        Ok(plugin_id)
    }

    async fn roll_back(&self, plugin_id: &str, target: &Path) {
        self.progress(plugin_id, InstallPhase::RollingBack, 0.9, "Rolling back").await;
        self.forget(plugin_id).await;
        if let Err(e) = hearth_fs::remove_dir_if_exists(target).await {
            log::warn!("Rollback of '{}' could not remove {}: {}", plugin_id, target.display(), e);
        }
    }

    async fn install_failed<T>(&self, plugin_id: &str, code: ErrorCode, message: String) -> OperationResult<T> {
        self.progress(plugin_id, InstallPhase::Failed, 1.0, message.clone()).await;
        Err(OperationError::for_plugin(code, plugin_id, message))
    }
}

#[async_trait]
impl ActivationSink for RuntimeInner {
    async fn activate(&self, owner: &str, event: ActivationEvent) -> Result<(), ActivationError> {
        let report = self.fire_event(event.clone(), None).await;
        let failed = |failure: OperationError| ActivationError::ActivationFailed {
            event: event.to_string(),
            plugin_id: failure.plugin_id.clone().unwrap_or_else(|| owner.to_string()),
            code: failure.code.to_string(),
            message: failure.message,
        };
        if let Some(failure) = report
            .failures
            .into_iter()
            .find(|f| f.plugin_id.as_deref() == Some(owner))
        {
            return Err(failed(failure));
        }

        // Waits on the per-id lock when another caller is activating the owner.
        match self.activate_boxed(owner.to_string(), Some(event.clone()), None).await {
            Ok(()) => Ok(()),
            // Failed earlier; the lookup reports its proxies as unavailable.
            Err(e)
                if e.code == ErrorCode::InvalidState
                    && (self.records.state(owner) == Some(PluginState::Error) || self.router.is_excluded(owner)) =>
            {
                Ok(())
            }
            Err(e) => Err(failed(e)),
        }
    }
}
