//! # Runtime Configuration
//!
//! [`RuntimeConfig`] describes where the runtime finds plugins, where it
//! keeps per-plugin data, and how hard it tries to verify unloads. It can be
//! read from JSON, YAML (feature `yaml-config`) or TOML (feature
//! `toml-config`) files; the format follows the file extension.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::isolation::UnloadPolicy;
use crate::kernel::constants::{
    DEFAULT_DATA_DIR, DEFAULT_PLUGINS_DIR, DEFAULT_UNLOAD_MAX_ATTEMPTS, DEFAULT_UNLOAD_RETRY_DELAY_MS,
};

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported configuration format for '{}'", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to read configuration '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to deserialize {format} configuration: {message}")]
    Deserialize { format: &'static str, message: String },

    #[error("Failed to serialize {format} configuration: {message}")]
    Serialize { format: &'static str, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Verified-unload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnloadConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for UnloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UNLOAD_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_UNLOAD_RETRY_DELAY_MS,
        }
    }
}

impl UnloadConfig {
    pub fn policy(&self) -> UnloadPolicy {
        UnloadPolicy {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Settings for a [`PluginRuntime`](crate::plugin_system::PluginRuntime)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directories scanned for `<plugin>/manifest.json`
    pub plugins_root: Vec<PathBuf>,
    /// Parent of every plugin's data directory
    pub data_root: PathBuf,
    /// Host modules shared by all plugins
    pub shared_modules_dir: Option<PathBuf>,
    /// Plugin ids skipped during discovery
    pub disabled_plugins: Vec<String>,
    pub unload: UnloadConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugins_root: vec![PathBuf::from(DEFAULT_PLUGINS_DIR)],
            data_root: PathBuf::from(DEFAULT_DATA_DIR),
            shared_modules_dir: None,
            disabled_plugins: Vec::new(),
            unload: UnloadConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_plugins_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.plugins_root = vec![root.into()];
        self
    }

    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }

    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled_plugins.iter().any(|id| id == plugin_id)
    }

    pub fn unload_policy(&self) -> UnloadPolicy {
        self.unload.policy()
    }

    /// Rejects settings the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unload.max_attempts == 0 {
            return Err(ConfigError::Invalid("unload.max_attempts must be at least 1".into()));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_root must not be empty".into()));
        }
        Ok(())
    }

    /// Makes relative paths relative to `base` (usually the config file's directory)
    pub fn resolve_paths(&mut self, base: &Path) {
        let absolutize = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.plugins_root.iter_mut().for_each(absolutize);
        absolutize(&mut self.data_root);
        if let Some(shared) = self.shared_modules_dir.as_mut() {
            absolutize(shared);
        }
    }

    /// Deserialize from string based on format
    pub fn deserialize(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| ConfigError::Deserialize {
                format: "JSON",
                message: e.to_string(),
            })?,
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| ConfigError::Deserialize {
                format: "YAML",
                message: e.to_string(),
            })?,
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| ConfigError::Deserialize {
                format: "TOML",
                message: e.to_string(),
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize to string based on format
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
                format: "JSON",
                message: e.to_string(),
            }),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| ConfigError::Serialize {
                format: "YAML",
                message: e.to_string(),
            }),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
                format: "TOML",
                message: e.to_string(),
            }),
        }
    }

    /// Reads a config file; relative paths inside it are taken relative to
    /// the file's directory.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let data = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config = Self::deserialize(&data, format)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        log::debug!("Loaded runtime configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let data = self.serialize(format)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::Write {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(path, data)
            .await
            .map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}
