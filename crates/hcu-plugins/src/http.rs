//! HTTP provider plugin described by a TOML manifest.
//!
//! A manifest at `<plugin_dir>/<class>-<name>.toml` points at a service that
//! speaks the normalized wire shape:
//!
//! ```toml
//! base_url = "https://inventory.example.com/api"
//! timeout_secs = 30
//! ```

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hcu_core::error::{HcuError, Result};
use hcu_core::traits::{AccountInfo, ProviderPlugin};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 30 }

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HcuError::Resolution(format!("plugin manifest {}: {e}", path.display())))?;
        let manifest: Self = toml::from_str(&content)
            .map_err(|e| HcuError::Resolution(format!("plugin manifest {}: {e}", path.display())))?;
        if manifest.base_url.trim().is_empty() {
            return Err(HcuError::Resolution(format!(
                "plugin manifest {}: base_url is empty",
                path.display()
            )));
        }
        Ok(manifest)
    }
}

/// Provider reached over HTTP with basic auth.
pub struct HttpPlugin {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpPlugin {
    pub fn new(name: &str, manifest: &PluginManifest) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(manifest.timeout_secs))
            .build()
            .map_err(|e| HcuError::Plugin(format!("{name}: http client: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            base_url: manifest.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json(
        &self,
        path: &str,
        user: &str,
        pass: &str,
        query: &[(&str, String)],
    ) -> Result<Value> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .basic_auth(user, Some(pass))
            .query(query)
            .send()
            .await
            .map_err(|e| HcuError::Plugin(format!("{} connection failed ({url}): {e}", self.name)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(HcuError::Plugin(format!("{} API error {status}: {text}", self.name)));
        }

        resp.json()
            .await
            .map_err(|e| HcuError::Decode(format!("{} response from {url}: {e}", self.name)))
    }

    async fn get_list(
        &self,
        path: &str,
        user: &str,
        pass: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>> {
        match self.get_json(path, user, pass, query).await? {
            Value::Array(items) => Ok(items),
            other => Err(HcuError::Decode(format!(
                "{} {path}: expected a list, got {}",
                self.name,
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[async_trait]
impl ProviderPlugin for HttpPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| HcuError::Plugin(format!("{}: invalid base_url: {e}", self.name)))?;
        Ok(())
    }

    async fn check_account(&self, user: &str, pass: &str) -> Result<AccountInfo> {
        let body = self.get_json("/account", user, pass, &[]).await?;
        serde_json::from_value(body)
            .map_err(|e| HcuError::Decode(format!("{} account: {e}", self.name)))
    }

    async fn get_resources(&self, user: &str, pass: &str) -> Result<Vec<Value>> {
        self.get_list("/resources", user, pass, &[]).await
    }

    async fn get_notifications(
        &self,
        user: &str,
        pass: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        self.get_list("/notifications", user, pass, &[("since", since.to_rfc3339())])
            .await
    }

    async fn get_statuses(&self, user: &str, pass: &str) -> Result<Vec<Value>> {
        self.get_list("/statuses", user, pass, &[]).await
    }
}
