//! Shared pieces of a sync pass: provider selection and the pass report.

use hcu_core::error::{HcuError, Result};
use hcu_core::types::Provider;
use hcu_db::Db;
use serde::Serialize;
use uuid::Uuid;

/// Outcome of one orchestrator pass. Item and provider failures are counted
/// here instead of failing the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Providers whose plugin resolved.
    pub providers: usize,
    /// Providers skipped because their plugin did not resolve.
    pub skipped_providers: usize,
    /// Providers whose fetch returned an error.
    pub fetch_errors: usize,
    /// Items stored.
    pub synced: usize,
    /// Items that failed to decode or persist.
    pub skipped_items: usize,
    /// Link reconciliations that reported a failure.
    pub link_failures: usize,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_providers == 0
            && self.fetch_errors == 0
            && self.skipped_items == 0
            && self.link_failures == 0
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} providers ({} skipped), {} items synced, {} items skipped",
            self.providers, self.skipped_providers, self.synced, self.skipped_items
        )
    }
}

/// Exactly the named provider when an id is given, otherwise all of them.
pub fn select_providers(db: &Db, provider_id: Option<&str>) -> Result<Vec<Provider>> {
    match provider_id {
        Some(raw) => {
            let id = Uuid::parse_str(raw.trim())
                .map_err(|_| HcuError::NotFound(format!("provider {raw}")))?;
            Ok(vec![db.provider(id)?])
        }
        None => db.providers(),
    }
}
