use std::fmt;

use serde::Serialize;

/// Lifecycle state of a plugin record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PluginState {
    NotLoaded,
    Loading,
    Loaded,
    Activating,
    Active,
    Deactivating,
    Deactivated,
    Error,
    Uninstalled,
}

impl PluginState {
    /// Whether the runtime may move a plugin from `self` to `next`.
    ///
    /// `Error` is entered from `Loading` when the module fails to load, and
    /// from `Activating`/`Deactivating` on a plugin fault. Leaving `Error`
    /// requires a reload, which starts a fresh record at `NotLoaded`.
    pub fn can_transition_to(self, next: PluginState) -> bool {
        use PluginState::*;
        matches!(
            (self, next),
            (NotLoaded, Loading)
                | (Loading, Loaded)
                | (Loading, Error)
                | (Loaded, Activating)
                | (Activating, Active)
                | (Activating, Error)
                | (Active, Deactivating)
                | (Deactivating, Deactivated)
                | (Deactivating, Error)
                | (Deactivated, Activating)
                | (Loaded, Uninstalled)
                | (Deactivated, Uninstalled)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PluginState::Uninstalled
    }

    /// States in which the plugin's module is resident
    pub fn has_module(self) -> bool {
        matches!(
            self,
            PluginState::Loaded
                | PluginState::Activating
                | PluginState::Active
                | PluginState::Deactivating
                | PluginState::Deactivated
        )
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginState::NotLoaded => "NotLoaded",
            PluginState::Loading => "Loading",
            PluginState::Loaded => "Loaded",
            PluginState::Activating => "Activating",
            PluginState::Active => "Active",
            PluginState::Deactivating => "Deactivating",
            PluginState::Deactivated => "Deactivated",
            PluginState::Error => "Error",
            PluginState::Uninstalled => "Uninstalled",
        };
        f.write_str(name)
    }
}
