//! Manifest discovery.
//!
//! Each plugin root holds one directory per plugin with a `manifest.json` at
//! its top. A manifest that cannot be read or parsed is logged and skipped;
//! it never aborts the scan.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReadDirStream;

use crate::config::RuntimeConfig;
use crate::kernel::constants::MANIFEST_FILE_NAME;
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::manifest::{PendingPlugin, PluginManifest};

/// What a scan found
#[derive(Debug, Default)]
pub struct ScanReport {
    pub plugins: Vec<PendingPlugin>,
    /// Manifests that were skipped, with the reason
    pub failures: Vec<(PathBuf, PluginSystemError)>,
    /// Ids filtered out by configuration
    pub disabled: Vec<String>,
}

/// Finds and parses plugin manifests under a set of roots
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader {
    roots: Vec<PathBuf>,
    disabled: HashSet<String>,
}

impl ManifestLoader {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            disabled: HashSet::new(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.plugins_root.iter().cloned())
            .with_disabled(config.disabled_plugins.iter().map(String::as_str))
    }

    pub fn with_disabled<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.disabled.extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn add_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Scans every root. Plugin directories are visited in name order; when
    /// two manifests declare the same id the first one found wins.
    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut seen = HashSet::new();

        for root in &self.roots {
            let dirs = match plugin_dirs(root).await {
                Ok(dirs) => dirs,
                Err(e) => {
                    log::debug!("Skipping plugin root {}: {}", root.display(), e);
                    continue;
                }
            };

            for dir in dirs {
                let manifest_path = dir.join(MANIFEST_FILE_NAME);
                if !fs::try_exists(&manifest_path).await.unwrap_or(false) {
                    continue;
                }
                match Self::load_manifest(&manifest_path).await {
                    Ok(manifest) => {
                        if self.disabled.contains(&manifest.id) {
                            log::info!("Plugin '{}' is disabled; not registering it", manifest.id);
                            report.disabled.push(manifest.id);
                            continue;
                        }
                        if !seen.insert(manifest.id.clone()) {
                            log::warn!(
                                "Duplicate plugin id '{}' at {}; keeping the first manifest",
                                manifest.id,
                                manifest_path.display()
                            );
                            continue;
                        }
                        log::debug!("Discovered plugin '{}' {}", manifest.id, manifest.version);
                        report.plugins.push(PendingPlugin::from_manifest(manifest));
                    }
                    Err(e) => {
                        log::warn!("Skipping manifest {}: {}", manifest_path.display(), e);
                        report.failures.push((manifest_path, e));
                    }
                }
            }
        }

        log::info!(
            "Manifest scan found {} plugin(s), skipped {}",
            report.plugins.len(),
            report.failures.len()
        );
        report
    }

    /// Reads and parses one manifest file
    pub async fn load_manifest(path: &Path) -> Result<PluginManifest, PluginSystemError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PluginSystemError::ManifestError {
                path: path.to_path_buf(),
                message: format!("Failed to read manifest: {}", e),
                source: Some(Box::new(e)),
            })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        PluginManifest::from_json(&content, base_dir)
    }

    /// Loads the manifest of a single plugin directory
    pub async fn load_plugin_dir(dir: &Path) -> Result<PendingPlugin, PluginSystemError> {
        let manifest = Self::load_manifest(&dir.join(MANIFEST_FILE_NAME)).await?;
        Ok(PendingPlugin::from_manifest(manifest))
    }
}

async fn plugin_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = ReadDirStream::new(fs::read_dir(root).await?);
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next().await {
        let entry = entry?;
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
