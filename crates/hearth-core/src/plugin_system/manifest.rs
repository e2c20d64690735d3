use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::activation::ActivationTrigger;
use crate::kernel::constants::MANIFEST_FILE_NAME;
use crate::plugin_system::dependency::PluginDependency;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::version::{SemanticVersion, VersionRange};

/// A command declared under `contributes.commands`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandContribution {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_key: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// A view declared under `contributes.views`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewContribution {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_key: Option<String>,
    /// Where the host should place the view, e.g. `sidebar`
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// A menu entry declared under `contributes.menus`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuContribution {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_key: Option<String>,
    /// Command run when the entry is chosen
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeybindingContribution {
    pub command: String,
    pub key: String,
    #[serde(default)]
    pub when: Option<String>,
}

macro_rules! display_title {
    ($($ty:ty),*) => {$(
        impl $ty {
            /// The literal title, falling back to the localization key
            pub fn display_title(&self) -> Option<String> {
                self.title.clone().or_else(|| self.title_key.clone())
            }
        }
    )*};
}

display_title!(CommandContribution, ViewContribution, MenuContribution);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributes {
    #[serde(default)]
    pub views: Vec<ViewContribution>,
    #[serde(default)]
    pub menus: Vec<MenuContribution>,
    #[serde(default)]
    pub commands: Vec<CommandContribution>,
    #[serde(default)]
    pub keybindings: Vec<KeybindingContribution>,
}

impl Contributes {
    pub fn is_empty(&self) -> bool {
        self.views.is_empty() && self.menus.is_empty() && self.commands.is_empty() && self.keybindings.is_empty()
    }
}

/// Represents a plugin manifest that describes a plugin
#[derive(Debug, Clone)]
pub struct PluginManifest {
    /// Unique identifier for the plugin
    pub id: String,

    /// Human-readable name
    pub name: String,

    pub version: SemanticVersion,

    pub description: Option<String>,

    pub author: Option<String>,

    /// Entry module file name, relative to the plugin directory
    pub main: Option<String>,

    pub dependencies: Vec<PluginDependency>,

    pub activation_events: Vec<ActivationTrigger>,

    pub contributes: Contributes,

    /// Culture name to localization file, relative to the plugin directory
    pub l10n: BTreeMap<String, String>,

    /// Directory holding the manifest and module files
    pub plugin_base_dir: PathBuf,
}

impl PluginManifest {
    pub fn new(id: &str, name: &str, version: SemanticVersion) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version,
            description: None,
            author: None,
            main: None,
            dependencies: Vec::new(),
            activation_events: Vec::new(),
            contributes: Contributes::default(),
            l10n: BTreeMap::new(),
            plugin_base_dir: PathBuf::new(),
        }
    }

    /// Parses `manifest.json` content. Relative paths resolve against `base_dir`.
    pub fn from_json(content: &str, base_dir: &Path) -> Result<Self, PluginSystemError> {
        let manifest_path = base_dir.join(MANIFEST_FILE_NAME);
        let raw: RawPluginManifest = serde_json::from_str(content).map_err(|e| PluginSystemError::ManifestError {
            path: manifest_path.clone(),
            message: format!("Failed to parse manifest JSON: {}", e),
            source: Some(Box::new(e)),
        })?;
        raw.into_manifest(&manifest_path, base_dir)
    }

    /// The resolver-facing view of this manifest
    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            dependencies: self.dependencies.clone(),
            activation_events: self.activation_events.clone(),
        }
    }

    /// Absolute path of the entry module, if the manifest names one
    pub fn module_path(&self) -> Option<PathBuf> {
        self.main.as_ref().map(|m| self.plugin_base_dir.join(m))
    }

    /// Localization file for `culture`, falling back from a specific culture
    /// (`fr-CA`) to its neutral parent (`fr`).
    pub fn localization_path(&self, culture: &str) -> Option<PathBuf> {
        let lookup = |name: &str| {
            self.l10n
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, rel)| self.plugin_base_dir.join(rel))
        };
        lookup(culture).or_else(|| {
            let neutral = culture.split(['-', '_']).next()?;
            (neutral != culture).then(|| lookup(neutral)).flatten()
        })
    }
}

/// The identity the resolver works on. Immutable for a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginIdentity {
    pub id: String,
    pub name: String,
    pub version: SemanticVersion,
    pub dependencies: Vec<PluginDependency>,
    pub activation_events: Vec<ActivationTrigger>,
}

impl PluginIdentity {
    pub fn new(id: &str, version: SemanticVersion) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            version,
            dependencies: Vec::new(),
            activation_events: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }
}

/// A discovered plugin whose module has not been loaded
#[derive(Debug, Clone)]
pub struct PendingPlugin {
    pub identity: PluginIdentity,
    /// `None` for plugins registered in code
    pub manifest_path: Option<PathBuf>,
    pub manifest: Arc<PluginManifest>,
}

impl PendingPlugin {
    pub fn from_manifest(manifest: PluginManifest) -> Self {
        let manifest_path = (!manifest.plugin_base_dir.as_os_str().is_empty())
            .then(|| manifest.plugin_base_dir.join(MANIFEST_FILE_NAME));
        Self {
            identity: manifest.identity(),
            manifest_path,
            manifest: Arc::new(manifest),
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }
}

// --- Intermediate structs for deserialization ---

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum RawDependency {
    /// `"id@range"` or `"id"`
    Shorthand(String),
    Detailed {
        id: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawPluginManifest {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
    #[serde(default)]
    activation_events: Vec<String>,
    #[serde(default)]
    contributes: Contributes,
    #[serde(default)]
    l10n: BTreeMap<String, String>,
}

impl RawPluginManifest {
    fn into_manifest(self, manifest_path: &Path, base_dir: &Path) -> Result<PluginManifest, PluginSystemError> {
        let invalid = |message: String| PluginSystemError::ManifestError {
            path: manifest_path.to_path_buf(),
            message,
            source: None,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("Manifest 'id' must not be empty".to_string()));
        }

        let version = SemanticVersion::parse(&self.version).map_err(|e| PluginSystemError::ManifestError {
            path: manifest_path.to_path_buf(),
            message: format!("Invalid version '{}'", self.version),
            source: Some(Box::new(e)),
        })?;

        let mut dependencies = Vec::with_capacity(self.dependencies.len());
        for raw in self.dependencies {
            let dependency = match raw {
                RawDependency::Shorthand(text) => PluginDependency::parse(&text).map_err(|e| {
                    PluginSystemError::ManifestError {
                        path: manifest_path.to_path_buf(),
                        message: format!("Invalid dependency '{}'", text),
                        source: Some(Box::new(e)),
                    }
                })?,
                RawDependency::Detailed { id, version, optional } => {
                    let range = match version.as_deref() {
                        Some(text) => VersionRange::parse(text).map_err(|e| PluginSystemError::ManifestError {
                            path: manifest_path.to_path_buf(),
                            message: format!("Invalid version range '{}' for dependency '{}'", text, id),
                            source: Some(Box::new(e)),
                        })?,
                        None => VersionRange::any(),
                    };
                    if optional {
                        PluginDependency::optional(&id, range)
                    } else {
                        PluginDependency::required(&id, range)
                    }
                }
            };
            if dependency.plugin_name == self.id {
                return Err(invalid(format!("Plugin '{}' cannot depend on itself", self.id)));
            }
            dependencies.push(dependency);
        }

        let mut activation_events = Vec::with_capacity(self.activation_events.len());
        for text in &self.activation_events {
            match ActivationTrigger::parse(text) {
                Ok(trigger) => activation_events.push(trigger),
                Err(e) => log::warn!(
                    "Skipping activation event in {}: {}",
                    manifest_path.display(),
                    e
                ),
            }
        }

        Ok(PluginManifest {
            id: self.id,
            name: self.name,
            version,
            description: self.description,
            author: self.author,
            main: self.main,
            dependencies,
            activation_events,
            contributes: self.contributes,
            l10n: self.l10n,
            plugin_base_dir: base_dir.to_path_buf(),
        })
    }
}

// --- End Intermediate structs ---

/// Builder for creating a plugin manifest in code
pub struct ManifestBuilder {
    manifest: PluginManifest,
}

impl ManifestBuilder {
    pub fn new(id: &str, name: &str, version: SemanticVersion) -> Self {
        Self {
            manifest: PluginManifest::new(id, name, version),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.manifest.description = Some(description.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.manifest.author = Some(author.to_string());
        self
    }

    /// Set the entry module file name
    pub fn main(mut self, main: &str) -> Self {
        self.manifest.main = Some(main.to_string());
        self
    }

    pub fn dependency(mut self, dependency: PluginDependency) -> Self {
        self.manifest.dependencies.push(dependency);
        self
    }

    pub fn activation(mut self, trigger: ActivationTrigger) -> Self {
        self.manifest.activation_events.push(trigger);
        self
    }

    pub fn command(mut self, id: &str, title: &str) -> Self {
        self.manifest.contributes.commands.push(CommandContribution {
            id: id.to_string(),
            title: Some(title.to_string()),
            title_key: None,
            category: None,
        });
        self
    }

    pub fn view(mut self, id: &str, title: &str) -> Self {
        self.manifest.contributes.views.push(ViewContribution {
            id: id.to_string(),
            title: Some(title.to_string()),
            title_key: None,
            location: None,
            icon: None,
        });
        self
    }

    pub fn menu(mut self, id: &str, title: &str, command: &str) -> Self {
        self.manifest.contributes.menus.push(MenuContribution {
            id: id.to_string(),
            title: Some(title.to_string()),
            title_key: None,
            command: Some(command.to_string()),
            group: None,
            order: None,
        });
        self
    }

    pub fn keybinding(mut self, command: &str, key: &str) -> Self {
        self.manifest.contributes.keybindings.push(KeybindingContribution {
            command: command.to_string(),
            key: key.to_string(),
            when: None,
        });
        self
    }

    pub fn l10n(mut self, culture: &str, path: &str) -> Self {
        self.manifest.l10n.insert(culture.to_string(), path.to_string());
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest.plugin_base_dir = dir.into();
        self
    }

    pub fn build(self) -> PluginManifest {
        self.manifest
    }
}
