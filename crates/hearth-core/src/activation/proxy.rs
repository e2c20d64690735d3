use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::activation::contribution::{
    Binding, CommandHandler, ContributionKind, ContributionRegistry, Keybinding, ViewFactory,
};
use crate::activation::error::{ActivationError, ContributionError};
use crate::activation::trigger::ActivationEvent;
use crate::plugin_system::manifest::PendingPlugin;

/// Receives activation requests raised by proxies. Implemented by the runtime.
#[async_trait]
pub trait ActivationSink: Send + Sync {
    /// Fires `event`, then waits until `owner` has finished activating.
    /// An activation of `owner` already in flight is awaited, not repeated.
    async fn activate(&self, owner: &str, event: ActivationEvent) -> Result<(), ActivationError>;
}

/// Handle returned for a contribution whose plugin is still pending.
///
/// Awaiting the token fires the activation event and completes once the
/// owning plugin finished activating, even when another caller started it.
pub struct ActivationToken {
    event: ActivationEvent,
    owner: String,
    sink: Weak<dyn ActivationSink>,
}

impl std::fmt::Debug for ActivationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationToken")
            .field("event", &self.event)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl ActivationToken {
    pub fn event(&self) -> &ActivationEvent {
        &self.event
    }

    /// Plugin that owns the proxied contribution
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub async fn activate(self) -> Result<(), ActivationError> {
        let sink = self.sink.upgrade().ok_or(ActivationError::RuntimeUnavailable)?;
        sink.activate(&self.owner, self.event).await
    }
}

impl IntoFuture for ActivationToken {
    type Output = Result<(), ActivationError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.activate())
    }
}

/// Result of a two-phase contribution lookup
#[derive(Debug)]
pub enum Lookup<T> {
    Ready(T),
    Pending(ActivationToken),
}

/// Registers placeholders for pending plugins and resolves lookups against
/// the shared [`ContributionRegistry`].
pub struct ContributionProxyRegistry {
    registry: Arc<ContributionRegistry>,
    sink: Weak<dyn ActivationSink>,
}

impl ContributionProxyRegistry {
    pub fn new(registry: Arc<ContributionRegistry>, sink: Weak<dyn ActivationSink>) -> Self {
        Self { registry, sink }
    }

    pub fn registry(&self) -> &Arc<ContributionRegistry> {
        &self.registry
    }

    /// Pre-registers every command, view and menu entry the pending plugin
    /// declares. Returns the number of proxies registered.
    pub fn register_proxies(&self, pending: &PendingPlugin) -> usize {
        let owner = pending.id();
        let contributes = &pending.manifest.contributes;
        let mut count = 0;
        for cmd in &contributes.commands {
            if self.registry.register_proxy(
                ContributionKind::Command,
                &cmd.id,
                owner,
                cmd.display_title(),
                ActivationEvent::command(&cmd.id),
            ) {
                count += 1;
            }
        }
        for view in &contributes.views {
            if self.registry.register_proxy(
                ContributionKind::View,
                &view.id,
                owner,
                view.display_title(),
                ActivationEvent::view(&view.id),
            ) {
                count += 1;
            }
        }
        for menu in &contributes.menus {
            if self.registry.register_proxy(
                ContributionKind::Menu,
                &menu.id,
                owner,
                menu.display_title(),
                ActivationEvent::menu(&menu.id),
            ) {
                count += 1;
            }
        }
        for key in &contributes.keybindings {
            self.registry.add_keybinding(Keybinding {
                owner: owner.to_string(),
                command: key.command.clone(),
                key: key.key.clone(),
                when: key.when.clone(),
            });
        }
        log::debug!("Registered {} proxy contributions for '{}'", count, owner);
        count
    }

    /// Drops the remaining proxies of `owner` once its real registrations exist
    pub fn dispose_proxies(&self, owner: &str) -> usize {
        let removed = self.registry.dispose_proxies(owner);
        if removed > 0 {
            log::debug!("Disposed {} proxy contributions of '{}'", removed, owner);
        }
        removed
    }

    fn token(&self, owner: &str, event: ActivationEvent) -> ActivationToken {
        ActivationToken {
            event,
            owner: owner.to_string(),
            sink: self.sink.clone(),
        }
    }

    pub fn lookup_command(&self, id: &str) -> Result<Lookup<CommandHandler>, ContributionError> {
        let entry = self.registry.command(id).ok_or_else(|| ContributionError::NotFound {
            kind: ContributionKind::Command,
            id: id.to_string(),
        })?;
        Ok(match entry.binding {
            Binding::Real(handler) => Lookup::Ready(handler),
            Binding::Proxy(event) => Lookup::Pending(self.token(&entry.owner, event)),
        })
    }

    pub fn lookup_view(&self, id: &str) -> Result<Lookup<ViewFactory>, ContributionError> {
        let entry = self.registry.view(id).ok_or_else(|| ContributionError::NotFound {
            kind: ContributionKind::View,
            id: id.to_string(),
        })?;
        Ok(match entry.binding {
            Binding::Real(factory) => Lookup::Ready(factory),
            Binding::Proxy(event) => Lookup::Pending(self.token(&entry.owner, event)),
        })
    }

    /// Ready menu entries yield the id of the command they run
    pub fn lookup_menu(&self, id: &str) -> Result<Lookup<String>, ContributionError> {
        let entry = self.registry.menu(id).ok_or_else(|| ContributionError::NotFound {
            kind: ContributionKind::Menu,
            id: id.to_string(),
        })?;
        Ok(match entry.binding {
            Binding::Real(command) => Lookup::Ready(command),
            Binding::Proxy(event) => Lookup::Pending(self.token(&entry.owner, event)),
        })
    }

    /// Runs a command, activating its plugin first if the entry is a proxy.
    /// The real handler receives the original arguments.
    pub async fn execute_command(&self, id: &str, args: &[Value]) -> Result<Value, ContributionError> {
        let handler = match self.lookup_command(id)? {
            Lookup::Ready(handler) => handler,
            Lookup::Pending(token) => {
                let owner = token.owner().to_string();
                token.await?;
                match self.lookup_command(id)? {
                    Lookup::Ready(handler) => handler,
                    Lookup::Pending(_) => {
                        return Err(ContributionError::Unavailable {
                            kind: ContributionKind::Command,
                            id: id.to_string(),
                            owner,
                        });
                    }
                }
            }
        };
        handler(args)
    }

    /// Creates a view, retrying creation once after activating a proxied entry
    pub async fn create_view(&self, id: &str) -> Result<Value, ContributionError> {
        match self.lookup_view(id)? {
            Lookup::Ready(factory) => factory(),
            Lookup::Pending(token) => {
                let owner = token.owner().to_string();
                token.await?;
                match self.lookup_view(id)? {
                    Lookup::Ready(factory) => factory(),
                    Lookup::Pending(_) => Err(ContributionError::Unavailable {
                        kind: ContributionKind::View,
                        id: id.to_string(),
                        owner,
                    }),
                }
            }
        }
    }

    /// Invokes a menu entry by running its command
    pub async fn invoke_menu(&self, id: &str, args: &[Value]) -> Result<Value, ContributionError> {
        let command = match self.lookup_menu(id)? {
            Lookup::Ready(command) => command,
            Lookup::Pending(token) => {
                let owner = token.owner().to_string();
                token.await?;
                match self.lookup_menu(id)? {
                    Lookup::Ready(command) => command,
                    Lookup::Pending(_) => {
                        return Err(ContributionError::Unavailable {
                            kind: ContributionKind::Menu,
                            id: id.to_string(),
                            owner,
                        });
                    }
                }
            }
        };
        self.execute_command(&command, args).await
    }
}
