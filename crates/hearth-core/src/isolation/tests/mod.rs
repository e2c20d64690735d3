#[cfg(test)]
mod manager_tests;

use std::sync::Arc;

use async_trait::async_trait;

use crate::isolation::{DefaultModuleLoader, PluginFactory, StaticModuleLoader};
use crate::plugin_system::error::PluginError;
use crate::plugin_system::traits::{Plugin, PluginContext};

/// Minimal plugin produced by the static factories below
pub(super) struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    async fn initialize(&self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}

pub(super) fn noop_factory() -> PluginFactory {
    Arc::new(|| Box::new(NoopPlugin) as Box<dyn Plugin>)
}

pub(super) fn panicking_factory() -> PluginFactory {
    Arc::new(|| -> Box<dyn Plugin> { panic!("entry point exploded") })
}

/// Loader with `noop.so` and `panics.so` registered as static modules
pub(super) fn static_loader() -> Arc<DefaultModuleLoader> {
    let statics = Arc::new(StaticModuleLoader::new());
    statics.register("noop.so", noop_factory());
    statics.register("panics.so", panicking_factory());
    Arc::new(DefaultModuleLoader::new(statics))
}
