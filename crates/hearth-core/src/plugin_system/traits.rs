use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::activation::{
    ActivationEvent, CommandHandler, ContributionKind, ContributionRegistry, ViewFactory,
};
use crate::event::{AsyncEventHandler, Event, PublishReport, SharedEventDispatcher, SubscriptionId};
use crate::plugin_system::error::PluginError;

/// Core trait implemented by every plugin.
///
/// Identity, version and dependencies come from the manifest, not from the
/// implementation. The runtime calls [`initialize`](Plugin::initialize) and
/// then [`register_contributions`](Plugin::register_contributions) during
/// activation, and [`deactivate`](Plugin::deactivate) during teardown.
/// Registrations made through the [`PluginContext`] are disposed by the
/// runtime after `deactivate` returns.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn initialize(&self, ctx: &mut PluginContext) -> Result<(), PluginError>;

    async fn register_contributions(&self, _ctx: &mut PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Something a plugin registered through its context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Contribution { kind: ContributionKind, id: String },
    Subscription(SubscriptionId),
}

/// The runtime services handed to a plugin during activation
pub struct PluginContext {
    plugin_id: String,
    install_path: Option<PathBuf>,
    data_path: PathBuf,
    trigger: Option<ActivationEvent>,
    contributions: Arc<ContributionRegistry>,
    events: SharedEventDispatcher,
    registrations: Vec<Registration>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .field("install_path", &self.install_path)
            .field("data_path", &self.data_path)
            .field("registrations", &self.registrations)
            .finish_non_exhaustive()
    }
}

impl PluginContext {
    pub fn new(
        plugin_id: &str,
        install_path: Option<PathBuf>,
        data_path: PathBuf,
        trigger: Option<ActivationEvent>,
        contributions: Arc<ContributionRegistry>,
        events: SharedEventDispatcher,
    ) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            install_path,
            data_path,
            trigger,
            contributions,
            events,
            registrations: Vec::new(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Plugin directory; `None` for plugins registered in code
    pub fn install_path(&self) -> Option<&Path> {
        self.install_path.as_deref()
    }

    /// Per-plugin writable directory
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Event that caused this activation, if any
    pub fn trigger(&self) -> Option<&ActivationEvent> {
        self.trigger.as_ref()
    }

    pub fn register_command(
        &mut self,
        id: &str,
        title: Option<&str>,
        handler: CommandHandler,
    ) -> Result<(), PluginError> {
        self.contributions
            .register_command(id, &self.plugin_id, title.map(str::to_string), handler)?;
        self.registrations.push(Registration::Contribution {
            kind: ContributionKind::Command,
            id: id.to_string(),
        });
        Ok(())
    }

    pub fn register_view(&mut self, id: &str, title: Option<&str>, factory: ViewFactory) -> Result<(), PluginError> {
        self.contributions
            .register_view(id, &self.plugin_id, title.map(str::to_string), factory)?;
        self.registrations.push(Registration::Contribution {
            kind: ContributionKind::View,
            id: id.to_string(),
        });
        Ok(())
    }

    pub fn register_menu(&mut self, id: &str, title: Option<&str>, command: &str) -> Result<(), PluginError> {
        self.contributions
            .register_menu(id, &self.plugin_id, title.map(str::to_string), command)?;
        self.registrations.push(Registration::Contribution {
            kind: ContributionKind::Menu,
            id: id.to_string(),
        });
        Ok(())
    }

    pub async fn subscribe(&mut self, event_name: &str, handler: Arc<dyn AsyncEventHandler>) -> SubscriptionId {
        let id = self.events.subscribe(event_name, &self.plugin_id, handler).await;
        self.registrations.push(Registration::Subscription(id));
        id
    }

    pub async fn publish(&self, event: &dyn Event) -> PublishReport {
        self.events.publish(event).await
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub(crate) fn take_registrations(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.registrations)
    }
}

/// Exports the entry point a native plugin library must provide.
///
/// ```ignore
/// hearth_core::declare_plugin!(HelloPlugin, HelloPlugin::default());
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, $constructor:expr) => {
        #[unsafe(no_mangle)]
        pub fn hearth_plugin_create() -> Box<dyn $crate::plugin_system::Plugin> {
            let plugin: $plugin_type = $constructor;
            Box::new(plugin)
        }
    };
}
