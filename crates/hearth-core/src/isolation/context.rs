use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use libloading::Library;

use crate::isolation::error::IsolationError;
use crate::isolation::module::LoadedModule;
use crate::plugin_system::traits::Plugin;
use crate::utils::panic_message;

/// Libraries shared by every plugin, loaded at most once from the host's
/// shared modules directory.
#[derive(Default)]
pub struct SharedModuleTable {
    dir: Option<PathBuf>,
    loaded: Mutex<HashMap<String, Arc<Library>>>,
}

impl fmt::Debug for SharedModuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("SharedModuleTable")
            .field("dir", &self.dir)
            .field("loaded", &names)
            .finish()
    }
}

impl SharedModuleTable {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a library the host already loaded
    pub fn insert(&self, name: &str, library: Arc<Library>) {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), library);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Returns the shared copy of `name`, loading it from the shared directory
    /// on first use. `Ok(None)` when no such module exists.
    pub fn resolve(&self, name: &str) -> Result<Option<Arc<Library>>, IsolationError> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(library) = loaded.get(name) {
            return Ok(Some(library.clone()));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = dir.join(libloading::library_filename(name));
        if !path.is_file() {
            return Ok(None);
        }
        let library = unsafe { Library::new(&path) }.map_err(|source| IsolationError::DependencyLoadFailed {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let library = Arc::new(library);
        loaded.insert(name.to_string(), library.clone());
        log::debug!("Loaded shared module '{}' from {}", name, path.display());
        Ok(Some(library))
    }
}

/// Where a context found a dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Shipped in the plugin's install directory
    Private(PathBuf),
    /// Provided by the host's shared modules
    Shared,
}

/// The boundary a plugin module is loaded into.
///
/// The module and the plugin's private libraries live exactly as long as the
/// context; the context lives as long as any [`ContextBound`] handle or
/// `Arc` to it.
pub struct IsolationContext {
    plugin_id: String,
    generation: u64,
    module_path: PathBuf,
    install_dir: PathBuf,
    // Field order is drop order: the module library goes before the
    // dependencies it links against.
    module: LoadedModule,
    private_deps: Mutex<HashMap<String, Library>>,
    shared_deps: Mutex<HashMap<String, Arc<Library>>>,
    shared: Arc<SharedModuleTable>,
    unload_requested: AtomicBool,
}

impl fmt::Debug for IsolationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolationContext")
            .field("plugin_id", &self.plugin_id)
            .field("generation", &self.generation)
            .field("module_path", &self.module_path)
            .field("unload_requested", &self.is_unload_requested())
            .finish_non_exhaustive()
    }
}

impl IsolationContext {
    pub(crate) fn new(
        plugin_id: &str,
        generation: u64,
        module_path: PathBuf,
        install_dir: PathBuf,
        module: LoadedModule,
        shared: Arc<SharedModuleTable>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            generation,
            module_path,
            install_dir,
            module,
            private_deps: Mutex::new(HashMap::new()),
            shared_deps: Mutex::new(HashMap::new()),
            shared,
            unload_requested: AtomicBool::new(false),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn is_native(&self) -> bool {
        self.module.is_native()
    }

    pub fn is_unload_requested(&self) -> bool {
        self.unload_requested.load(Ordering::Acquire)
    }

    /// Invalidates the generation; handles stop yielding their values
    pub(crate) fn request_unload(&self) {
        self.unload_requested.store(true, Ordering::Release);
    }

    fn ensure_live(&self) -> Result<(), IsolationError> {
        if self.is_unload_requested() {
            return Err(IsolationError::ContextUnloaded {
                plugin_id: self.plugin_id.clone(),
                generation: self.generation,
            });
        }
        Ok(())
    }

    /// Resolves a native dependency by name: the plugin's install directory
    /// first, then the host's shared modules.
    pub fn resolve_dependency(&self, name: &str) -> Result<DependencySource, IsolationError> {
        self.ensure_live()?;

        let private_path = self.install_dir.join(libloading::library_filename(name));
        {
            let mut private = self.private_deps.lock().unwrap_or_else(PoisonError::into_inner);
            if private.contains_key(name) {
                return Ok(DependencySource::Private(private_path));
            }
            if private_path.is_file() {
                let library = unsafe { Library::new(&private_path) }.map_err(|source| {
                    IsolationError::DependencyLoadFailed {
                        name: name.to_string(),
                        path: private_path.clone(),
                        source,
                    }
                })?;
                private.insert(name.to_string(), library);
                log::debug!(
                    "Plugin '{}' loaded private dependency '{}' from {}",
                    self.plugin_id,
                    name,
                    private_path.display()
                );
                return Ok(DependencySource::Private(private_path));
            }
        }

        match self.shared.resolve(name)? {
            Some(library) => {
                self.shared_deps
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), library);
                Ok(DependencySource::Shared)
            }
            None => Err(IsolationError::DependencyNotFound {
                plugin_id: self.plugin_id.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// Creates the plugin instance through the module's entry point
    pub fn instantiate(self: &Arc<Self>) -> Result<ContextBound<Arc<dyn Plugin>>, IsolationError> {
        self.ensure_live()?;
        let factory = self.module.factory().clone();
        let instance = catch_unwind(AssertUnwindSafe(|| factory())).map_err(|payload| {
            IsolationError::InstantiationPanicked {
                plugin_id: self.plugin_id.clone(),
                message: panic_message(payload.as_ref()),
            }
        })?;
        Ok(self.bind(Arc::from(instance)))
    }

    /// Ties a value produced by this context's code to the context
    pub fn bind<T>(self: &Arc<Self>, value: T) -> ContextBound<T> {
        ContextBound {
            value,
            context: Arc::clone(self),
            generation: self.generation,
        }
    }
}

/// A value that came out of an isolation context.
///
/// Holding it keeps the context (and its module code) alive; once the
/// context is invalidated [`get`](Self::get) returns `None`.
pub struct ContextBound<T> {
    // Dropped before the context that owns its code.
    value: T,
    context: Arc<IsolationContext>,
    generation: u64,
}

impl<T> ContextBound<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn plugin_id(&self) -> &str {
        self.context.plugin_id()
    }

    pub fn is_valid(&self) -> bool {
        self.context.generation == self.generation && !self.context.is_unload_requested()
    }

    pub fn get(&self) -> Option<&T> {
        self.is_valid().then_some(&self.value)
    }

    pub fn context(&self) -> &Arc<IsolationContext> {
        &self.context
    }
}

impl<T: Clone> Clone for ContextBound<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            context: self.context.clone(),
            generation: self.generation,
        }
    }
}

impl<T> fmt::Debug for ContextBound<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextBound")
            .field("plugin_id", &self.context.plugin_id)
            .field("generation", &self.generation)
            .field("valid", &self.is_valid())
            .finish()
    }
}
