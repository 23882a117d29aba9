//! Capability traits implemented outside the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identity returned by a provider for a checked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub subject_id: String,
    pub group_id: String,
}

/// An external inventory/event provider.
///
/// Items are returned as opaque JSON values; decoding into the normalized
/// wire shape is the caller's job so one malformed item never poisons a batch.
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Plugin name, as used in `"<class>-<name>"` lookups.
    fn name(&self) -> &str;

    async fn init(&self) -> Result<()>;

    async fn check_account(&self, user: &str, pass: &str) -> Result<AccountInfo>;

    async fn get_resources(&self, user: &str, pass: &str) -> Result<Vec<serde_json::Value>>;

    async fn get_notifications(
        &self,
        user: &str,
        pass: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>>;

    async fn get_statuses(&self, user: &str, pass: &str) -> Result<Vec<serde_json::Value>>;
}
