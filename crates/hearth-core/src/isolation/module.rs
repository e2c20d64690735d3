//! Module loading: turning a module path into a plugin factory.
//!
//! A module exposes exactly one entry point. Native libraries export the
//! `hearth_plugin_create` symbol (see [`declare_plugin!`](crate::declare_plugin));
//! plugins compiled into the host register a factory under their module file
//! name with the [`StaticModuleLoader`].
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use libloading::{Library, Symbol};

use crate::isolation::error::IsolationError;
use crate::kernel::constants::ENTRY_SYMBOL;
use crate::plugin_system::traits::Plugin;

/// Creates a fresh plugin instance
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Signature of the exported entry point. Host and plugin must be built by
/// the same compiler, since `Box<dyn Plugin>` crosses the boundary.
type PluginCreateFn = fn() -> Box<dyn Plugin>;

/// A loaded module: its entry factory and, for native modules, the library
/// the factory's code lives in.
pub struct LoadedModule {
    factory: PluginFactory,
    library: Option<Library>,
}

impl LoadedModule {
    pub fn from_factory(factory: PluginFactory) -> Self {
        Self { factory, library: None }
    }

    pub fn from_library(factory: PluginFactory, library: Library) -> Self {
        Self {
            factory,
            library: Some(library),
        }
    }

    pub fn factory(&self) -> &PluginFactory {
        &self.factory
    }

    pub fn is_native(&self) -> bool {
        self.library.is_some()
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("native", &self.is_native())
            .finish_non_exhaustive()
    }
}

/// Resolves a module path to a loaded module
pub trait ModuleLoader: Send + Sync {
    fn load(&self, plugin_id: &str, module_path: &Path) -> Result<LoadedModule, IsolationError>;
}

/// Loads native plugin libraries with `libloading`
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl ModuleLoader for NativeModuleLoader {
    fn load(&self, plugin_id: &str, module_path: &Path) -> Result<LoadedModule, IsolationError> {
        if !module_path.is_file() {
            return Err(IsolationError::ModuleNotFound {
                plugin_id: plugin_id.to_string(),
                path: module_path.to_path_buf(),
            });
        }

        // Loading runs the library's initializers; plugin libraries are trusted code.
        let library = unsafe { Library::new(module_path) }.map_err(|source| IsolationError::LoadFailed {
            plugin_id: plugin_id.to_string(),
            path: module_path.to_path_buf(),
            source,
        })?;

        let create: PluginCreateFn = unsafe {
            let symbol: Symbol<PluginCreateFn> =
                library
                    .get(ENTRY_SYMBOL)
                    .map_err(|source| IsolationError::EntryPointMissing {
                        plugin_id: plugin_id.to_string(),
                        symbol: String::from_utf8_lossy(ENTRY_SYMBOL).into_owned(),
                        source,
                    })?;
            *symbol
        };

        log::debug!("Loaded native module for '{}' from {}", plugin_id, module_path.display());
        Ok(LoadedModule::from_library(Arc::new(create), library))
    }
}

/// Factories for plugins compiled into the host, keyed by module file name
#[derive(Default)]
pub struct StaticModuleLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl fmt::Debug for StaticModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("StaticModuleLoader").field("modules", &names).finish()
    }
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, module_name: &str, factory: PluginFactory) {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(module_name.to_string(), factory);
    }

    pub fn contains(&self, module_name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(module_name)
    }

    fn factory_for(&self, module_path: &Path) -> Option<PluginFactory> {
        let name = module_path.file_name()?.to_str()?;
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, plugin_id: &str, module_path: &Path) -> Result<LoadedModule, IsolationError> {
        self.factory_for(module_path)
            .map(LoadedModule::from_factory)
            .ok_or_else(|| IsolationError::ModuleNotFound {
                plugin_id: plugin_id.to_string(),
                path: module_path.to_path_buf(),
            })
    }
}

/// Tries static factories first, then native libraries
#[derive(Debug, Clone)]
pub struct DefaultModuleLoader {
    statics: Arc<StaticModuleLoader>,
    native: NativeModuleLoader,
}

impl DefaultModuleLoader {
    pub fn new(statics: Arc<StaticModuleLoader>) -> Self {
        Self {
            statics,
            native: NativeModuleLoader,
        }
    }

    pub fn statics(&self) -> &Arc<StaticModuleLoader> {
        &self.statics
    }
}

impl ModuleLoader for DefaultModuleLoader {
    fn load(&self, plugin_id: &str, module_path: &Path) -> Result<LoadedModule, IsolationError> {
        if let Some(factory) = self.statics.factory_for(module_path) {
            return Ok(LoadedModule::from_factory(factory));
        }
        self.native.load(plugin_id, module_path)
    }
}
