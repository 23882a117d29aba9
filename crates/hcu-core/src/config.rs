//! hcu configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HcuError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HcuConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_plugin_dir")]
    pub plugin_dir: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_db_path() -> String { "~/.hcu/hcu.db".into() }
fn default_plugin_dir() -> String { "~/.hcu/plugins".into() }

impl Default for HcuConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            plugin_dir: default_plugin_dir(),
            scheduler: SchedulerConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl HcuConfig {
    /// Load config from the default path ($HCU_HOME/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HcuError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HcuError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HcuError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// The hcu home directory: `$HCU_HOME`, or `~/.hcu`.
    pub fn home_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HCU_HOME") {
            if !home.is_empty() {
                return PathBuf::from(home);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hcu")
    }

    /// Database file with `~` expanded.
    pub fn db_file(&self) -> PathBuf {
        expand_path(&self.db_path)
    }

    /// Plugin directory with `~` expanded.
    pub fn plugin_path(&self) -> PathBuf {
        expand_path(&self.plugin_dir)
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Job scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Periodic workers with a shorter period are never chained.
    #[serde(default = "default_min_period_secs")]
    pub min_period_secs: u64,
    /// Upper bound of the random delay added to every repeat (0 = deterministic).
    #[serde(default)]
    pub jitter_secs: u64,
}

fn default_min_period_secs() -> u64 { 5 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_period_secs: default_min_period_secs(),
            jitter_secs: 0,
        }
    }
}

/// Sync orchestrator timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_resource_initial_delay")]
    pub resource_initial_delay_secs: u64,
    #[serde(default = "default_period")]
    pub resource_period_secs: u64,
    #[serde(default = "default_notification_initial_delay")]
    pub notification_initial_delay_secs: u64,
    #[serde(default = "default_period")]
    pub notification_period_secs: u64,
    /// Sliding window of NotificationWatch, counted back from "now".
    #[serde(default = "default_lookback_months")]
    pub lookback_months: u32,
}

fn default_resource_initial_delay() -> u64 { 10 }
fn default_notification_initial_delay() -> u64 { 30 }
fn default_period() -> u64 { 24 * 60 * 60 }
fn default_lookback_months() -> u32 { 5 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            resource_initial_delay_secs: default_resource_initial_delay(),
            resource_period_secs: default_period(),
            notification_initial_delay_secs: default_notification_initial_delay(),
            notification_period_secs: default_period(),
            lookback_months: default_lookback_months(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HcuConfig::default();
        assert_eq!(config.scheduler.min_period_secs, 5);
        assert_eq!(config.sync.lookback_months, 5);
        assert_eq!(config.sync.resource_period_secs, 86400);
    }

    #[test]
    fn test_partial_toml() {
        let config: HcuConfig = toml::from_str(
            r#"
            plugin_dir = "/opt/hcu/plugins"
            [sync]
            lookback_months = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.plugin_path(), PathBuf::from("/opt/hcu/plugins"));
        assert_eq!(config.sync.lookback_months, 2);
        assert_eq!(config.sync.notification_initial_delay_secs, 30);
        assert_eq!(config.db_path, "~/.hcu/hcu.db");
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = HcuConfig::load_from(Path::new("/nonexistent/hcu/config.toml")).unwrap_err();
        assert!(matches!(err, HcuError::Config(_)));
    }
}
