//! NotificationWatch: mirrors provider notifications as incidents.
//!
//! Every run looks back over a fixed window from "now"; no cursor is kept.
//! Incidents are upserted on (provider, original_id), so overlapping windows
//! just refresh the same rows.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use hcu_core::config::SyncConfig;
use hcu_core::error::Result;
use hcu_core::types::Provider;
use hcu_db::Db;
use hcu_plugins::{PROVIDER_CLASS, PluginRegistry, RawNotification};
use hcu_scheduler::{JobArgs, Worker};
use serde_json::Value;
use uuid::Uuid;

use crate::pass::{SyncReport, select_providers};

pub const NOTIFICATION_WATCH: &str = "worker.NotificationWatch";

pub struct NotificationWatch {
    db: Arc<Db>,
    plugins: Arc<PluginRegistry>,
    initial_delay: Duration,
    period: Duration,
    lookback_months: u32,
}

impl NotificationWatch {
    pub fn new(db: Arc<Db>, plugins: Arc<PluginRegistry>, config: &SyncConfig) -> Self {
        Self {
            db,
            plugins,
            initial_delay: Duration::from_secs(config.notification_initial_delay_secs),
            period: Duration::from_secs(config.notification_period_secs),
            lookback_months: config.lookback_months,
        }
    }

    /// Start of the window for a run at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_months(Months::new(self.lookback_months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub async fn watch(&self, provider_id: Option<&str>) -> Result<SyncReport> {
        let providers = select_providers(&self.db, provider_id)?;
        let since = self.since(Utc::now());
        tracing::info!(
            "🔔 Watching notifications for {} provider(s) since {}",
            providers.len(),
            since.format("%Y-%m-%d")
        );

        let mut report = SyncReport::default();
        for provider in &providers {
            self.watch_provider(provider, since, &mut report).await;
        }
        tracing::info!("🔔 Notification watch done: {report}");
        Ok(report)
    }

    async fn watch_provider(&self, provider: &Provider, since: DateTime<Utc>, report: &mut SyncReport) {
        let plugin = match self.plugins.get(&provider.provider, PROVIDER_CLASS).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("⚠️ Skipping provider {provider}: {e}");
                report.skipped_providers += 1;
                return;
            }
        };
        report.providers += 1;

        let notes = match plugin
            .get_notifications(&provider.user, &provider.pass, since)
            .await
        {
            Ok(notes) => notes,
            Err(e) => {
                tracing::error!("⚠️ Could not get notifications for {provider}: {e}");
                report.fetch_errors += 1;
                return;
            }
        };
        tracing::debug!("got {} notifications from {provider}", notes.len());

        for note in &notes {
            match self.watch_item(note, report) {
                Some(_) => report.synced += 1,
                None => report.skipped_items += 1,
            }
        }
    }

    fn watch_item(&self, item: &Value, report: &mut SyncReport) -> Option<Uuid> {
        let note = match RawNotification::decode(item) {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!("⚠️ Skipping notification: {e}");
                return None;
            }
        };

        let saved = self
            .db
            .resolve_incident_id(&note.provider, &note.original_id)
            .and_then(|id| self.db.upsert_incident(&note.to_incident(id)));
        let id = match saved {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("could not save incident {}: {e}", note.original_id);
                return None;
            }
        };

        if let Err(e) = self.db.link_incident_resources(id, &note.resource_ids) {
            tracing::warn!("resources of incident {}: {e}", note.original_id);
            report.link_failures += 1;
        }
        if let Err(e) = self.db.link_incident_users(id, &note.user_ids) {
            tracing::warn!("users of incident {}: {e}", note.original_id);
            report.link_failures += 1;
        }
        Some(id)
    }
}

#[async_trait]
impl Worker for NotificationWatch {
    fn name(&self) -> &str {
        NOTIFICATION_WATCH
    }

    fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    fn period(&self) -> Duration {
        self.period
    }

    async fn handle(&self, args: JobArgs) -> Result<()> {
        self.watch(args.provider_id()).await.map(|_| ())
    }
}
