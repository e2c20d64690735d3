//! Sample plugin contributing the `hello.greet` command.
//!
//! Built as a `cdylib`, the host loads it through the `hearth_plugin_create`
//! entry point exported by [`declare_plugin!`](hearth_core::declare_plugin).
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use hearth_core::activation::ContributionError;
use hearth_core::plugin_system::{Plugin, PluginContext, PluginError};
use log::{debug, info};
use serde_json::{Value, json};

pub const GREET_COMMAND: &str = "hello.greet";
pub const GREET_MENU: &str = "hello.menu";

const DEFAULT_GREETING: &str = "Hello";

pub struct HelloPlugin {
    culture: String,
    greeting: Arc<Mutex<String>>,
}

impl Default for HelloPlugin {
    fn default() -> Self {
        Self::with_culture("en")
    }
}

impl HelloPlugin {
    pub fn with_culture(culture: &str) -> Self {
        Self {
            culture: culture.to_string(),
            greeting: Arc::new(Mutex::new(DEFAULT_GREETING.to_string())),
        }
    }

    /// Reads `locales/<culture>.json` from the plugin directory, if present
    fn localized_greeting(&self, install_path: &Path) -> Option<String> {
        let path = install_path.join("locales").join(format!("{}.json", self.culture));
        let text = std::fs::read_to_string(&path).ok()?;
        let value: Value = serde_json::from_str(&text).ok()?;
        value["greeting"].as_str().map(str::to_string)
    }
}

#[async_trait]
impl Plugin for HelloPlugin {
    async fn initialize(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        if let Some(greeting) = ctx.install_path().and_then(|p| self.localized_greeting(p)) {
            *self.greeting.lock().unwrap_or_else(PoisonError::into_inner) = greeting;
        }
        info!(
            "hello-command activated (trigger: {})",
            ctx.trigger().map_or_else(|| "direct".to_string(), ToString::to_string)
        );
        Ok(())
    }

    async fn register_contributions(&self, ctx: &mut PluginContext) -> Result<(), PluginError> {
        let greeting = self.greeting.clone();
        ctx.register_command(
            GREET_COMMAND,
            Some("Say Hello"),
            Arc::new(move |args: &[Value]| {
                let name = match args.first() {
                    None => "world",
                    Some(Value::String(name)) => name.as_str(),
                    Some(other) => {
                        return Err(ContributionError::failed(format!("expected a name, got {}", other)));
                    }
                };
                let greeting = greeting.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(json!({ "greeting": format!("{}, {}!", greeting, name) }))
            }),
        )?;
        ctx.register_menu(GREET_MENU, Some("Hello"), GREET_COMMAND)?;
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), PluginError> {
        debug!("hello-command deactivated");
        Ok(())
    }
}

hearth_core::declare_plugin!(HelloPlugin, HelloPlugin::default());
