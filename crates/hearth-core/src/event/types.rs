use std::any::Any;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::activation::ActivationEvent;
use crate::event::Event;
use crate::plugin_system::lifecycle::PluginState;

pub const PLUGIN_STATE_CHANGED: &str = "plugin.state_changed";
pub const PLUGIN_ACTIVATED: &str = "plugin.activated";
pub const INSTALL_PROGRESS: &str = "plugin.install_progress";

macro_rules! impl_event {
    ($ty:ty, $name:expr) => {
        impl Event for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn clone_event(&self) -> Box<dyn Event> {
                Box::new(self.clone())
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }
    };
}

/// A plugin moved between lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginStateChanged {
    pub plugin_id: String,
    pub old_state: PluginState,
    pub new_state: PluginState,
}

impl_event!(PluginStateChanged, PLUGIN_STATE_CHANGED);

/// A plugin finished activating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginActivated {
    pub plugin_id: String,
    /// The event that caused activation; `None` for direct activation calls
    pub trigger: Option<ActivationEvent>,
    pub elapsed: Duration,
}

impl_event!(PluginActivated, PLUGIN_ACTIVATED);

/// Phases reported while installing a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstallPhase {
    Extracting,
    Validating,
    Installing,
    Activating,
    BackingUp,
    RollingBack,
    Completed,
    Failed,
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallPhase::Extracting => "Extracting",
            InstallPhase::Validating => "Validating",
            InstallPhase::Installing => "Installing",
            InstallPhase::Activating => "Activating",
            InstallPhase::BackingUp => "BackingUp",
            InstallPhase::RollingBack => "RollingBack",
            InstallPhase::Completed => "Completed",
            InstallPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallProgress {
    pub plugin_id: String,
    pub phase: InstallPhase,
    /// 0.0 to 1.0
    pub fraction: f32,
    pub message: String,
}

impl InstallProgress {
    pub fn new(plugin_id: &str, phase: InstallPhase, fraction: f32, message: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            phase,
            fraction: fraction.clamp(0.0, 1.0),
            message: message.into(),
        }
    }
}

impl_event!(InstallProgress, INSTALL_PROGRESS);

/// Named event with a JSON payload, used for plugin-to-plugin messages
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

impl CustomEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

impl Event for CustomEvent {
    fn name(&self) -> &str {
        &self.name
    }

    fn clone_event(&self) -> Box<dyn Event> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
