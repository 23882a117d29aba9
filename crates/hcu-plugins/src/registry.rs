//! Plugin registry. Resolves `"<class>-<name>"` to a provider capability.
//!
//! Resolution order:
//! 1. compiled-in plugins registered with [`PluginRegistry::register`]
//! 2. `<plugin_dir>/<class>-<name>.toml` manifests, built as [`HttpPlugin`]s

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use hcu_core::error::{HcuError, Result};
use hcu_core::traits::ProviderPlugin;

use crate::http::{HttpPlugin, PluginManifest};

/// Plugin class used for inventory/event providers.
pub const PROVIDER_CLASS: &str = "provider";

const MANIFEST_EXT: &str = "toml";

pub fn plugin_key(class: &str, name: &str) -> String {
    format!("{class}-{name}")
}

pub struct PluginRegistry {
    dir: PathBuf,
    builtin: RwLock<HashMap<String, Arc<dyn ProviderPlugin>>>,
}

impl PluginRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            builtin: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a compiled-in plugin under `class`, keyed by its own name.
    pub fn register(&self, class: &str, plugin: Arc<dyn ProviderPlugin>) -> Result<()> {
        let key = plugin_key(class, plugin.name());
        self.builtin
            .write()
            .map_err(|e| HcuError::Plugin(format!("plugin registry poisoned: {e}")))?
            .insert(key, plugin);
        Ok(())
    }

    /// Resolve and initialize a plugin. Any failure is a resolution failure.
    pub async fn get(&self, name: &str, class: &str) -> Result<Arc<dyn ProviderPlugin>> {
        let key = plugin_key(class, name);
        let plugin = match self.builtin_plugin(&key)? {
            Some(p) => p,
            None => {
                let path = self.dir.join(format!("{key}.{MANIFEST_EXT}"));
                let manifest = PluginManifest::load(&path)?;
                let plugin: Arc<dyn ProviderPlugin> = Arc::new(
                    HttpPlugin::new(name, &manifest)
                        .map_err(|e| HcuError::Resolution(format!("{key}: {e}")))?,
                );
                plugin
            }
        };
        plugin
            .init()
            .await
            .map_err(|e| HcuError::Resolution(format!("{key}: init failed: {e}")))?;
        tracing::debug!("🔌 plugin {key} resolved");
        Ok(plugin)
    }

    /// Names of every plugin of `class` that resolves, sorted.
    pub async fn list_plugins(&self, class: &str) -> Vec<String> {
        let prefix = format!("{class}-");
        let mut candidates = BTreeSet::new();

        if let Ok(builtin) = self.builtin.read() {
            for key in builtin.keys() {
                if let Some(name) = key.strip_prefix(&prefix) {
                    candidates.insert(name.to_string());
                }
            }
        }

        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if let Some(name) = stem.strip_prefix(&prefix) {
                        candidates.insert(name.to_string());
                    }
                }
            }
            Err(e) => {
                tracing::debug!("plugin dir {} not readable: {e}", self.dir.display());
            }
        }

        let mut found = Vec::new();
        for name in candidates {
            match self.get(&name, class).await {
                Ok(_) => found.push(name),
                Err(e) => tracing::debug!("skipping plugin {name}: {e}"),
            }
        }
        tracing::debug!("plugins found: {found:?}");
        found
    }

    fn builtin_plugin(&self, key: &str) -> Result<Option<Arc<dyn ProviderPlugin>>> {
        Ok(self
            .builtin
            .read()
            .map_err(|e| HcuError::Plugin(format!("plugin registry poisoned: {e}")))?
            .get(key)
            .cloned())
    }
}
