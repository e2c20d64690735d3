use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::isolation::context::{IsolationContext, SharedModuleTable};
use crate::isolation::error::IsolationError;
use crate::isolation::module::ModuleLoader;
use crate::kernel::constants::{DEFAULT_UNLOAD_MAX_ATTEMPTS, DEFAULT_UNLOAD_RETRY_DELAY_MS};

/// Retry budget for verified unloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnloadPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for UnloadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UNLOAD_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_UNLOAD_RETRY_DELAY_MS),
        }
    }
}

#[derive(Debug)]
struct LeakedContext {
    plugin_id: String,
    generation: u64,
    context: Weak<IsolationContext>,
}

/// Creates isolation contexts and verifies their release.
///
/// The manager never holds a strong reference to a context, so its `Weak`
/// handle reports exactly whether anything else still does.
pub struct IsolationContextManager {
    contexts: Mutex<HashMap<String, Weak<IsolationContext>>>,
    leaked: Mutex<Vec<LeakedContext>>,
    next_generation: AtomicU64,
    loader: Arc<dyn ModuleLoader>,
    shared: Arc<SharedModuleTable>,
    policy: UnloadPolicy,
}

impl std::fmt::Debug for IsolationContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationContextManager")
            .field("contexts", &self.loaded_ids())
            .field("leaked", &self.leaked_ids())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl IsolationContextManager {
    pub fn new(loader: Arc<dyn ModuleLoader>, shared: Arc<SharedModuleTable>, policy: UnloadPolicy) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            leaked: Mutex::new(Vec::new()),
            next_generation: AtomicU64::new(1),
            loader,
            shared,
            policy,
        }
    }

    pub fn policy(&self) -> UnloadPolicy {
        self.policy
    }

    fn contexts(&self) -> MutexGuard<'_, HashMap<String, Weak<IsolationContext>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn leaked(&self) -> MutexGuard<'_, Vec<LeakedContext>> {
        self.leaked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads `module_path` into a new context for `plugin_id`.
    ///
    /// An existing context for the id is unloaded first. The caller owns the
    /// only strong reference to the returned context.
    pub fn create_context(
        &self,
        plugin_id: &str,
        module_path: &Path,
        install_dir: &Path,
    ) -> Result<Arc<IsolationContext>, IsolationError> {
        if let Some(previous) = self.unload_context(plugin_id) {
            if previous.strong_count() > 0 {
                log::warn!(
                    "Replacing isolation context of '{}' while the previous one is still referenced",
                    plugin_id
                );
                self.remember_leak(plugin_id, previous);
            }
        }

        let module = self.loader.load(plugin_id, module_path)?;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let context = Arc::new(IsolationContext::new(
            plugin_id,
            generation,
            module_path.to_path_buf(),
            install_dir.to_path_buf(),
            module,
            self.shared.clone(),
        ));
        self.contexts()
            .insert(plugin_id.to_string(), Arc::downgrade(&context));
        log::info!(
            "Created isolation context for '{}' (generation {})",
            plugin_id,
            generation
        );
        Ok(context)
    }

    /// The live context for `plugin_id`, if one exists and has not been invalidated
    pub fn get_context(&self, plugin_id: &str) -> Option<Arc<IsolationContext>> {
        self.contexts()
            .get(plugin_id)
            .and_then(Weak::upgrade)
            .filter(|c| !c.is_unload_requested())
    }

    /// Requests release of the context without waiting.
    ///
    /// The context is invalidated and forgotten by the manager; the returned
    /// handle can be polled to observe the release.
    pub fn unload_context(&self, plugin_id: &str) -> Option<Weak<IsolationContext>> {
        let weak = self.contexts().remove(plugin_id)?;
        if let Some(context) = weak.upgrade() {
            context.request_unload();
            log::debug!(
                "Unload requested for '{}' (generation {})",
                plugin_id,
                context.generation()
            );
        }
        Some(weak)
    }

    /// Requests release and waits for it, polling at most `max_attempts` times.
    ///
    /// Returns true once nothing references the context (or none existed).
    /// False means something outside the context still holds it; the context
    /// is remembered as leaked for [`retry_leaked`](Self::retry_leaked).
    pub async fn unload_context_async(&self, plugin_id: &str, max_attempts: u32) -> bool {
        let Some(weak) = self.unload_context(plugin_id) else {
            return true;
        };
        let generation = weak.upgrade().map(|c| c.generation());

        for attempt in 0..max_attempts.max(1) {
            if weak.strong_count() == 0 {
                log::info!(
                    "Isolation context of '{}' released after {} attempt(s)",
                    plugin_id,
                    attempt + 1
                );
                return true;
            }
            tokio::task::yield_now().await;
            if weak.strong_count() == 0 {
                continue;
            }
            tokio::time::sleep(self.policy.retry_delay).await;
        }

        if weak.strong_count() == 0 {
            return true;
        }

        log::warn!(
            "Isolation context of '{}' (generation {}) is still referenced after {} attempts; marking as leaked",
            plugin_id,
            generation.map_or_else(|| "?".to_string(), |g| g.to_string()),
            max_attempts
        );
        self.remember_leak(plugin_id, weak);
        false
    }

    /// [`unload_context_async`](Self::unload_context_async) with the configured budget
    pub async fn unload_with_policy(&self, plugin_id: &str) -> bool {
        self.unload_context_async(plugin_id, self.policy.max_attempts).await
    }

    fn remember_leak(&self, plugin_id: &str, context: Weak<IsolationContext>) {
        let generation = context.upgrade().map_or(0, |c| c.generation());
        self.leaked().push(LeakedContext {
            plugin_id: plugin_id.to_string(),
            generation,
            context,
        });
    }

    /// Re-checks leaked contexts; returns the ids released since the last check
    pub fn retry_leaked(&self) -> Vec<String> {
        let mut leaked = self.leaked();
        let mut released = Vec::new();
        leaked.retain(|entry| {
            if entry.context.strong_count() == 0 {
                log::info!(
                    "Leaked isolation context of '{}' (generation {}) has been released",
                    entry.plugin_id,
                    entry.generation
                );
                released.push(entry.plugin_id.clone());
                false
            } else {
                true
            }
        });
        released
    }

    pub fn leaked_ids(&self) -> Vec<String> {
        self.leaked().iter().map(|e| e.plugin_id.clone()).collect()
    }

    pub fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .contexts()
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
