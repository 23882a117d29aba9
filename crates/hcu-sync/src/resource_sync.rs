//! ResourceSync: pulls every provider's inventory into the relational store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hcu_core::config::SyncConfig;
use hcu_core::error::Result;
use hcu_core::types::{Attribute, Provider};
use hcu_db::Db;
use hcu_plugins::{PROVIDER_CLASS, PluginRegistry, RawResource};
use hcu_scheduler::{JobArgs, Worker};
use serde_json::Value;
use uuid::Uuid;

use crate::pass::{SyncReport, select_providers};

pub const RESOURCE_SYNC: &str = "worker.ResourceSync";

pub struct ResourceSync {
    db: Arc<Db>,
    plugins: Arc<PluginRegistry>,
    initial_delay: Duration,
    period: Duration,
}

impl ResourceSync {
    pub fn new(db: Arc<Db>, plugins: Arc<PluginRegistry>, config: &SyncConfig) -> Self {
        Self {
            db,
            plugins,
            initial_delay: Duration::from_secs(config.resource_initial_delay_secs),
            period: Duration::from_secs(config.resource_period_secs),
        }
    }

    /// One pass over the selected providers. Only provider selection can
    /// fail the pass; everything below it is logged and counted.
    pub async fn sync(&self, provider_id: Option<&str>) -> Result<SyncReport> {
        let providers = select_providers(&self.db, provider_id)?;
        tracing::info!("💾 Syncing resources for {} provider(s)", providers.len());

        let mut report = SyncReport::default();
        for provider in &providers {
            self.sync_provider(provider, &mut report).await;
        }
        tracing::info!("💾 Resource sync done: {report}");
        Ok(report)
    }

    async fn sync_provider(&self, provider: &Provider, report: &mut SyncReport) {
        let plugin = match self.plugins.get(&provider.provider, PROVIDER_CLASS).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("⚠️ Skipping provider {provider}: {e}");
                report.skipped_providers += 1;
                return;
            }
        };
        report.providers += 1;

        let items = match plugin.get_resources(&provider.user, &provider.pass).await {
            Ok(items) => items,
            Err(e) => {
                // Whatever was obtained (nothing) is still linked below
                tracing::error!("⚠️ Could not get resources for {provider}: {e}");
                report.fetch_errors += 1;
                Vec::new()
            }
        };
        tracing::debug!("got {} resources from {provider}", items.len());

        let mut ids = Vec::with_capacity(items.len());
        for item in &items {
            match self.sync_item(item, report) {
                Some(id) => {
                    ids.push(id);
                    report.synced += 1;
                }
                None => report.skipped_items += 1,
            }
        }

        if let Err(e) = self.db.link_provider_resources(provider.id, &ids) {
            tracing::warn!("⚠️ Provider links for {provider}: {e}");
            report.link_failures += 1;
        }
        tracing::debug!("resources for {provider} synced ({} items)", ids.len());
    }

    /// Store one item. Returns its local id, or `None` when it was skipped.
    fn sync_item(&self, item: &Value, report: &mut SyncReport) -> Option<Uuid> {
        let raw = match RawResource::decode(item) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("⚠️ Skipping resource: {e}");
                return None;
            }
        };

        let id = match self
            .db
            .resolve_resource_id(&raw.provider, &raw.original_id, raw.external_id())
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("could not resolve resource {}: {e}", raw.name);
                return None;
            }
        };
        let resource = raw.to_resource(id);
        let id = match self.db.upsert_resource(&resource) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("could not save resource {resource}: {e}");
                return None;
            }
        };

        for (name, value) in &raw.attributes {
            let attr = Attribute {
                resource_id: id,
                name: name.clone(),
                value: value.clone(),
            };
            if let Err(e) = self.db.upsert_attribute(&attr) {
                tracing::warn!("attribute {name} of {resource}: {e}");
            }
        }
        if !raw.integer_attributes.is_empty() {
            // Not persisted yet
            tracing::debug!("integer attributes of {resource}: {:?}", raw.integer_attributes);
        }

        if let Err(e) = self.db.link_tags(id, &raw.tags) {
            tracing::warn!("tags of {resource}: {e}");
            report.link_failures += 1;
        }
        if let Err(e) = self.db.link_resource_users(id, &raw.user_ids) {
            tracing::warn!("users of {resource}: {e}");
            report.link_failures += 1;
        }
        Some(id)
    }
}

#[async_trait]
impl Worker for ResourceSync {
    fn name(&self) -> &str {
        RESOURCE_SYNC
    }

    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn handle(&self, args: JobArgs) -> Result<()> {
        self.sync(args.provider_id()).await.map(|_| ())
    }
}
