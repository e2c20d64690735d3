//! Host-side tables of commands, views and menu entries contributed by
//! plugins. An entry is either bound to the real implementation or is a
//! proxy that stands in for a plugin that has not been activated yet.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::activation::error::ContributionError;
use crate::activation::trigger::ActivationEvent;

/// Executes a command with JSON arguments
pub type CommandHandler = Arc<dyn Fn(&[Value]) -> Result<Value, ContributionError> + Send + Sync>;

/// Creates a view model for the host to render
pub type ViewFactory = Arc<dyn Fn() -> Result<Value, ContributionError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ContributionKind {
    Command,
    View,
    Menu,
}

impl fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContributionKind::Command => f.write_str("Command"),
            ContributionKind::View => f.write_str("View"),
            ContributionKind::Menu => f.write_str("Menu item"),
        }
    }
}

#[derive(Clone)]
pub enum Binding<T> {
    Real(T),
    /// Placeholder that fires this event when used
    Proxy(ActivationEvent),
}

impl<T> Binding<T> {
    pub fn is_proxy(&self) -> bool {
        matches!(self, Binding::Proxy(_))
    }
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Real(_) => f.write_str("Real"),
            Binding::Proxy(event) => write!(f, "Proxy({})", event),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Contribution<T> {
    pub id: String,
    pub owner: String,
    pub title: Option<String>,
    pub binding: Binding<T>,
}

/// A declarative key binding; needs no proxy because it only names a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Keybinding {
    pub owner: String,
    pub command: String,
    pub key: String,
    pub when: Option<String>,
}

struct Table<T> {
    kind: ContributionKind,
    entries: RwLock<HashMap<String, Contribution<T>>>,
}

impl<T: Clone> Table<T> {
    fn new(kind: ContributionKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn register_real(&self, id: &str, owner: &str, title: Option<String>, value: T) -> Result<(), ContributionError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(id) {
            // A proxy may only be replaced by its own plugin.
            if !existing.binding.is_proxy() || existing.owner != owner {
                return Err(ContributionError::Duplicate {
                    kind: self.kind,
                    id: id.to_string(),
                    owner: existing.owner.clone(),
                });
            }
        }
        entries.insert(
            id.to_string(),
            Contribution {
                id: id.to_string(),
                owner: owner.to_string(),
                title,
                binding: Binding::Real(value),
            },
        );
        Ok(())
    }

    fn register_proxy(&self, id: &str, owner: &str, title: Option<String>, event: ActivationEvent) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(id) {
            if !existing.binding.is_proxy() || existing.owner != owner {
                log::debug!(
                    "{} '{}' already registered by '{}'; skipping proxy for '{}'",
                    self.kind,
                    id,
                    existing.owner,
                    owner
                );
                return false;
            }
        }
        entries.insert(
            id.to_string(),
            Contribution {
                id: id.to_string(),
                owner: owner.to_string(),
                title,
                binding: Binding::Proxy(event),
            },
        );
        true
    }

    fn get(&self, id: &str) -> Option<Contribution<T>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn remove(&self, id: &str, owner: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(id).is_some_and(|c| c.owner == owner) {
            entries.remove(id);
            true
        } else {
            false
        }
    }

    fn remove_where(&self, owner: &str, proxies_only: bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, c| !(c.owner == owner && (!proxies_only || c.binding.is_proxy())));
        before - entries.len()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// The host's contribution tables, shared by handle between the runtime,
/// the proxy registry and plugin contexts.
pub struct ContributionRegistry {
    commands: Table<CommandHandler>,
    views: Table<ViewFactory>,
    // Real menu bindings name the command the entry runs.
    menus: Table<String>,
    keybindings: RwLock<Vec<Keybinding>>,
}

impl fmt::Debug for ContributionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContributionRegistry")
            .field("commands", &self.commands.ids())
            .field("views", &self.views.ids())
            .field("menus", &self.menus.ids())
            .finish_non_exhaustive()
    }
}

impl Default for ContributionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContributionRegistry {
    pub fn new() -> Self {
        Self {
            commands: Table::new(ContributionKind::Command),
            views: Table::new(ContributionKind::View),
            menus: Table::new(ContributionKind::Menu),
            keybindings: RwLock::new(Vec::new()),
        }
    }

    pub fn register_command(
        &self,
        id: &str,
        owner: &str,
        title: Option<String>,
        handler: CommandHandler,
    ) -> Result<(), ContributionError> {
        self.commands.register_real(id, owner, title, handler)
    }

    pub fn register_view(
        &self,
        id: &str,
        owner: &str,
        title: Option<String>,
        factory: ViewFactory,
    ) -> Result<(), ContributionError> {
        self.views.register_real(id, owner, title, factory)
    }

    pub fn register_menu(
        &self,
        id: &str,
        owner: &str,
        title: Option<String>,
        command: &str,
    ) -> Result<(), ContributionError> {
        self.menus.register_real(id, owner, title, command.to_string())
    }

    /// Registers a placeholder; returns false when a real entry or another
    /// plugin's proxy already holds the id.
    pub fn register_proxy(
        &self,
        kind: ContributionKind,
        id: &str,
        owner: &str,
        title: Option<String>,
        event: ActivationEvent,
    ) -> bool {
        match kind {
            ContributionKind::Command => self.commands.register_proxy(id, owner, title, event),
            ContributionKind::View => self.views.register_proxy(id, owner, title, event),
            ContributionKind::Menu => self.menus.register_proxy(id, owner, title, event),
        }
    }

    pub fn command(&self, id: &str) -> Option<Contribution<CommandHandler>> {
        self.commands.get(id)
    }

    pub fn view(&self, id: &str) -> Option<Contribution<ViewFactory>> {
        self.views.get(id)
    }

    pub fn menu(&self, id: &str) -> Option<Contribution<String>> {
        self.menus.get(id)
    }

    pub fn is_proxy(&self, kind: ContributionKind, id: &str) -> Option<bool> {
        match kind {
            ContributionKind::Command => self.commands.get(id).map(|c| c.binding.is_proxy()),
            ContributionKind::View => self.views.get(id).map(|c| c.binding.is_proxy()),
            ContributionKind::Menu => self.menus.get(id).map(|c| c.binding.is_proxy()),
        }
    }

    /// Removes one entry if `owner` holds it
    pub fn dispose(&self, kind: ContributionKind, id: &str, owner: &str) -> bool {
        match kind {
            ContributionKind::Command => self.commands.remove(id, owner),
            ContributionKind::View => self.views.remove(id, owner),
            ContributionKind::Menu => self.menus.remove(id, owner),
        }
    }

    /// Removes every proxy owned by `owner`, leaving real entries in place
    pub fn dispose_proxies(&self, owner: &str) -> usize {
        self.commands.remove_where(owner, true)
            + self.views.remove_where(owner, true)
            + self.menus.remove_where(owner, true)
    }

    /// Removes everything owned by `owner`, including keybindings
    pub fn dispose_owner(&self, owner: &str) -> usize {
        let mut keybindings = self.keybindings.write().unwrap_or_else(PoisonError::into_inner);
        let before = keybindings.len();
        keybindings.retain(|k| k.owner != owner);
        let removed_keys = before - keybindings.len();
        drop(keybindings);
        self.commands.remove_where(owner, false)
            + self.views.remove_where(owner, false)
            + self.menus.remove_where(owner, false)
            + removed_keys
    }

    /// Adds a keybinding, replacing an identical one from the same owner
    pub fn add_keybinding(&self, binding: Keybinding) {
        let mut keybindings = self.keybindings.write().unwrap_or_else(PoisonError::into_inner);
        keybindings.retain(|k| !(k.owner == binding.owner && k.command == binding.command && k.key == binding.key));
        keybindings.push(binding);
    }

    pub fn keybindings(&self) -> Vec<Keybinding> {
        self.keybindings.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn command_ids(&self) -> Vec<String> {
        self.commands.ids()
    }

    pub fn view_ids(&self) -> Vec<String> {
        self.views.ids()
    }

    pub fn menu_ids(&self) -> Vec<String> {
        self.menus.ids()
    }
}
