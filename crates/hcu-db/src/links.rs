//! Junction reconciler. Converges an owner's links to a desired set.
//!
//! One algorithm serves every many-to-many relation:
//! 1. load the owner's existing junction rows
//! 2. resolve each row's target; dangling rows are deleted (self-healing),
//!    wanted rows are kept and struck off the desired set, the rest deleted
//! 3. resolve-or-create every remaining desired target and insert its row
//!
//! Rows are keyed on (owner, target), so inserts use `INSERT OR IGNORE` and
//! two overlapping passes converge to the same state. Individual failures
//! do not stop the pass; they are counted and reported once at the end.

use std::collections::BTreeSet;

use chrono::Utc;
use hcu_core::error::{HcuError, Result};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::db::{Db, db_err, ts};

/// How a junction's target column is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Rows of this table, keyed by `id`. Desired values are ids.
    Entity(&'static str),
    /// Tags. Desired values are names; missing tags are created.
    TagName,
    /// No local entity (external user ids). The stored value is the target.
    Opaque,
}

/// A many-to-many junction table.
#[derive(Debug, Clone, Copy)]
pub struct Junction {
    pub table: &'static str,
    pub owner_col: &'static str,
    pub target_col: &'static str,
    pub target: TargetKind,
}

pub const RESOURCE_TAGS: Junction = Junction {
    table: "resources_tags",
    owner_col: "resource_id",
    target_col: "tag_id",
    target: TargetKind::TagName,
};

pub const RESOURCE_USERS: Junction = Junction {
    table: "resources_users",
    owner_col: "resource_id",
    target_col: "user_id",
    target: TargetKind::Opaque,
};

pub const PROVIDER_RESOURCES: Junction = Junction {
    table: "providers_resources",
    owner_col: "provider_id",
    target_col: "resource_id",
    target: TargetKind::Entity("resources"),
};

pub const SERVICE_TAGS: Junction = Junction {
    table: "services_tags",
    owner_col: "service_id",
    target_col: "tag_id",
    target: TargetKind::TagName,
};

pub const INCIDENT_RESOURCES: Junction = Junction {
    table: "incidents_resources",
    owner_col: "incident_id",
    target_col: "resource_id",
    target: TargetKind::Entity("resources"),
};

pub const INCIDENT_USERS: Junction = Junction {
    table: "incidents_users",
    owner_col: "incident_id",
    target_col: "user_id",
    target: TargetKind::Opaque,
};

/// What one reconcile call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Rows already matching the desired set.
    pub kept: usize,
    pub added: usize,
    /// Rows no longer wanted.
    pub removed: usize,
    /// Dangling rows purged.
    pub healed: usize,
    pub failed: usize,
}

impl LinkReport {
    /// Number of rows written (inserted or deleted).
    pub fn writes(&self) -> usize {
        self.added + self.removed + self.healed
    }

    fn attempted(&self) -> usize {
        self.writes() + self.failed
    }
}

/// Trim, drop blanks and collapse duplicates. Matching stays case-sensitive.
fn normalize<I, S>(desired: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    desired
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve a stored target to its desired-set key. `None` means dangling.
fn resolve_key(conn: &Connection, kind: TargetKind, stored: &str) -> rusqlite::Result<Option<String>> {
    match kind {
        TargetKind::Entity(table) => conn
            .query_row(
                &format!("SELECT id FROM {table} WHERE id = ?1"),
                params![stored],
                |row| row.get(0),
            )
            .optional(),
        TargetKind::TagName => conn
            .query_row("SELECT name FROM tags WHERE id = ?1", params![stored], |row| row.get(0))
            .optional(),
        TargetKind::Opaque => Ok(Some(stored.to_string())),
    }
}

/// Resolve a desired key to the value stored in the junction, creating the
/// target when the relation allows it.
fn resolve_or_create(conn: &Connection, kind: TargetKind, key: &str) -> Result<String> {
    match kind {
        TargetKind::Entity(table) => conn
            .query_row(
                &format!("SELECT id FROM {table} WHERE id = ?1"),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|e| db_err("Resolve target", e))?
            .ok_or_else(|| HcuError::Resolution(format!("{table} {key}"))),
        TargetKind::TagName => {
            // Lookup-by-unique-name after an ignoring insert: safe when two
            // passes create the same tag at once.
            conn.execute(
                "INSERT OR IGNORE INTO tags (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![Uuid::new_v4().to_string(), key, ts(Utc::now())],
            )
            .map_err(|e| db_err("Create tag", e))?;
            conn.query_row("SELECT id FROM tags WHERE name = ?1", params![key], |row| row.get(0))
                .map_err(|e| db_err("Resolve tag", e))
        }
        TargetKind::Opaque => Ok(key.to_string()),
    }
}

impl Db {
    /// Converge `junction` rows of `owner` to exactly `desired`.
    ///
    /// Returns [`HcuError::PartialFailure`] if any single delete, insert or
    /// resolution failed; everything else is still applied.
    pub fn reconcile_links<I, S>(&self, junction: &Junction, owner: &str, desired: I) -> Result<LinkReport>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut desired = normalize(desired);
        let mut report = LinkReport::default();
        let conn = self.conn()?;

        let Junction {
            table,
            owner_col,
            target_col,
            target,
        } = *junction;

        let existing: Vec<String> = {
            let mut stmt = conn
                .prepare(&format!("SELECT {target_col} FROM {table} WHERE {owner_col} = ?1"))
                .map_err(|e| db_err("Load links", e))?;
            let rows = stmt
                .query_map(params![owner], |row| row.get(0))
                .map_err(|e| db_err("Load links", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_err("Load links", e))?
        };
        tracing::debug!(
            "🔗 reconcile {table} for {owner}: {} existing, {} desired",
            existing.len(),
            desired.len()
        );

        let delete = format!("DELETE FROM {table} WHERE {owner_col} = ?1 AND {target_col} = ?2");
        for stored in existing {
            match resolve_key(&conn, target, &stored) {
                Ok(Some(key)) if desired.remove(&key) => report.kept += 1,
                Ok(Some(key)) => match conn.execute(&delete, params![owner, stored]) {
                    Ok(_) => {
                        tracing::debug!("removing {key} from {table}. no longer exists");
                        report.removed += 1;
                    }
                    Err(e) => {
                        tracing::error!("could not remove {key} from {table}: {e}");
                        report.failed += 1;
                    }
                },
                Ok(None) => match conn.execute(&delete, params![owner, stored]) {
                    Ok(_) => {
                        tracing::warn!("⚠️ found broken link {owner}→{stored} in {table} and deleted");
                        report.healed += 1;
                    }
                    Err(e) => {
                        tracing::error!("found broken link {owner}→{stored} in {table} but could not delete: {e}");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    tracing::error!("could not resolve {stored} in {table}: {e}");
                    report.failed += 1;
                }
            }
        }

        let insert = format!(
            "INSERT OR IGNORE INTO {table} ({owner_col}, {target_col}, created_at) VALUES (?1, ?2, ?3)"
        );
        for key in desired {
            let stored = match resolve_or_create(&conn, target, &key) {
                Ok(stored) => stored,
                Err(e) => {
                    tracing::error!("could not link {key} to {owner} in {table}: {e}");
                    report.failed += 1;
                    continue;
                }
            };
            match conn.execute(&insert, params![owner, stored, ts(Utc::now())]) {
                // 0 rows: a concurrent pass inserted it first, nothing written here
                Ok(n) => report.added += n,
                Err(e) => {
                    tracing::error!("could not save {table} link {owner}→{key}: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            tracing::warn!(
                "⚠️ {table} for {owner}: linking done with {} error(s)",
                report.failed
            );
            return Err(HcuError::PartialFailure {
                failed: report.failed,
                total: report.attempted(),
            });
        }
        Ok(report)
    }

    /// Resolved targets currently linked to `owner`, sorted. Dangling rows
    /// are skipped, not deleted.
    pub fn links(&self, junction: &Junction, owner: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM {} WHERE {} = ?1",
                junction.target_col, junction.table, junction.owner_col
            ))
            .map_err(|e| db_err("Load links", e))?;
        let stored = stmt
            .query_map(params![owner], |row| row.get::<_, String>(0))
            .map_err(|e| db_err("Load links", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("Load links", e))?;
        let mut keys = Vec::with_capacity(stored.len());
        for s in stored {
            if let Some(key) = resolve_key(&conn, junction.target, &s).map_err(|e| db_err("Resolve link", e))? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    // ── Relation helpers ────────────────────────────────────

    /// Tags of a resource, by name.
    pub fn link_tags(&self, resource_id: Uuid, names: &[String]) -> Result<LinkReport> {
        self.reconcile_links(&RESOURCE_TAGS, &resource_id.to_string(), names)
    }

    /// External user ids allowed on a resource.
    pub fn link_resource_users(&self, resource_id: Uuid, user_ids: &[String]) -> Result<LinkReport> {
        self.reconcile_links(&RESOURCE_USERS, &resource_id.to_string(), user_ids)
    }

    /// Resources visible to a provider account.
    pub fn link_provider_resources(&self, provider_id: Uuid, resource_ids: &[Uuid]) -> Result<LinkReport> {
        self.reconcile_links(
            &PROVIDER_RESOURCES,
            &provider_id.to_string(),
            resource_ids.iter().map(|id| id.to_string()),
        )
    }

    /// Resources affected by an incident, given as provider original ids.
    /// Ids without a stored resource are left out of the desired set.
    pub fn link_incident_resources(&self, incident_id: Uuid, original_ids: &[String]) -> Result<LinkReport> {
        let (found, missing) = self.resource_ids_by_original_ids(original_ids)?;
        for oid in &missing {
            tracing::warn!("no resource with original_id {oid}");
        }
        if !missing.is_empty() {
            tracing::warn!(
                "only {} of {} resources resolved for incident {incident_id}",
                found.len(),
                original_ids.len()
            );
        }
        self.reconcile_links(
            &INCIDENT_RESOURCES,
            &incident_id.to_string(),
            found.iter().map(|id| id.to_string()),
        )
    }

    pub fn link_incident_users(&self, incident_id: Uuid, user_ids: &[String]) -> Result<LinkReport> {
        self.reconcile_links(&INCIDENT_USERS, &incident_id.to_string(), user_ids)
    }

    /// Replace a service's tag set, by name.
    pub fn set_service_tags(&self, service_id: Uuid, names: &[String]) -> Result<LinkReport> {
        self.service(service_id)?;
        self.reconcile_links(&SERVICE_TAGS, &service_id.to_string(), names)
    }

    /// Tag names of a resource.
    pub fn resource_tags(&self, resource_id: Uuid) -> Result<Vec<String>> {
        self.links(&RESOURCE_TAGS, &resource_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::resource;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn stored_resource(db: &Db, oid: &str) -> Uuid {
        let r = resource(db, oid, None);
        db.upsert_resource(&r).unwrap();
        r.id
    }

    #[test]
    fn test_converges_from_any_prior_state() {
        let db = Db::open_in_memory().unwrap();
        let id = stored_resource(&db, "1001");
        let desired = names(&["web", "prod", "seoul"]);

        for prior in [
            names(&[]),
            names(&["web"]),
            names(&["web", "prod", "seoul", "legacy"]),
            names(&["db", "staging"]),
            names(&["web", "prod", "seoul"]),
        ] {
            db.link_tags(id, &prior).unwrap();
            db.link_tags(id, &desired).unwrap();
            assert_eq!(db.resource_tags(id).unwrap(), names(&["prod", "seoul", "web"]));
        }
    }

    #[test]
    fn test_second_call_writes_nothing() {
        let db = Db::open_in_memory().unwrap();
        let id = stored_resource(&db, "1001");
        db.link_tags(id, &names(&["a", "b"])).unwrap();
        let first = db.link_tags(id, &names(&["b", "c"])).unwrap();
        assert_eq!((first.kept, first.added, first.removed), (1, 1, 1));

        let second = db.link_tags(id, &names(&["b", "c"])).unwrap();
        assert_eq!(second.writes(), 0);
        assert_eq!(second.kept, 2);
    }

    #[test]
    fn test_names_trimmed_and_deduplicated() {
        let db = Db::open_in_memory().unwrap();
        let id = stored_resource(&db, "1001");
        let report = db.link_tags(id, &names(&[" web ", "web", "Web", "  "])).unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(db.resource_tags(id).unwrap(), names(&["Web", "web"]));
    }

    #[test]
    fn test_tags_are_shared_between_owners() {
        let db = Db::open_in_memory().unwrap();
        let a = stored_resource(&db, "1001");
        let b = stored_resource(&db, "1002");
        db.link_tags(a, &names(&["web"])).unwrap();
        db.link_tags(b, &names(&["web"])).unwrap();
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM tags WHERE name = 'web'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_broken_link_is_healed_not_recreated() {
        let db = Db::open_in_memory().unwrap();
        let id = stored_resource(&db, "1001");
        db.link_tags(id, &names(&["web", "gone"])).unwrap();
        let gone = db.tag_by_name("gone").unwrap().unwrap();
        db.conn()
            .unwrap()
            .execute("DELETE FROM tags WHERE id = ?1", params![gone.id.to_string()])
            .unwrap();

        let report = db.link_tags(id, &names(&["web"])).unwrap();
        assert_eq!(report.healed, 1);
        assert_eq!(report.added, 0);
        let rows: i64 = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM resources_tags WHERE resource_id = ?1",
                params![id.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_opaque_user_links() {
        let db = Db::open_in_memory().unwrap();
        let id = stored_resource(&db, "1001");
        db.link_resource_users(id, &names(&["u1", "u2"])).unwrap();
        db.link_resource_users(id, &names(&["u2", "u3"])).unwrap();
        assert_eq!(
            db.links(&RESOURCE_USERS, &id.to_string()).unwrap(),
            names(&["u2", "u3"])
        );
    }

    #[test]
    fn test_provider_links_drop_stale_resources() {
        let db = Db::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let a = stored_resource(&db, "1001");
        let b = stored_resource(&db, "1002");
        db.link_provider_resources(provider, &[a, b]).unwrap();
        let report = db.link_provider_resources(provider, &[b]).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(
            db.links(&PROVIDER_RESOURCES, &provider.to_string()).unwrap(),
            vec![b.to_string()]
        );
    }

    #[test]
    fn test_partial_failure_applies_the_rest() {
        let db = Db::open_in_memory().unwrap();
        let provider = Uuid::new_v4();
        let a = stored_resource(&db, "1001");
        let unknown = Uuid::new_v4();

        let err = db.link_provider_resources(provider, &[a, unknown]).unwrap_err();
        assert!(matches!(err, HcuError::PartialFailure { failed: 1, total: 2 }));
        assert_eq!(
            db.links(&PROVIDER_RESOURCES, &provider.to_string()).unwrap(),
            vec![a.to_string()]
        );
    }

    #[test]
    fn test_incident_resources_by_original_id() {
        let db = Db::open_in_memory().unwrap();
        let a = stored_resource(&db, "1001");
        let incident = Uuid::new_v4();
        let report = db
            .link_incident_resources(incident, &names(&["1001", "missing"]))
            .unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(
            db.links(&INCIDENT_RESOURCES, &incident.to_string()).unwrap(),
            vec![a.to_string()]
        );
    }

    #[test]
    fn test_service_tags_require_service() {
        let db = Db::open_in_memory().unwrap();
        let err = db.set_service_tags(Uuid::new_v4(), &names(&["web"])).unwrap_err();
        assert!(matches!(err, HcuError::NotFound(_)));
    }
}
