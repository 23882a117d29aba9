//! Entity upserts and lookups.
//!
//! Every write here is idempotent and runs under a single connection lock:
//! re-running a sync pass (at-least-once delivery, overlapping runs) updates
//! rows instead of duplicating them.

use chrono::Utc;
use hcu_core::error::{HcuError, Result};
use hcu_core::types::{Attribute, Incident, Member, Provider, Resource, Service, Tag};
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use crate::db::{Db, db_err, get_uuid, parse_ts, ts};

/// Shared SELECT column list for resource queries.
pub(crate) const RESOURCE_SELECT: &str = "SELECT id,provider,kind,original_id,uuid,name,notes,group_id,resource_created_at,resource_modified_at,ip_address,location,is_conn,is_on FROM resources";

pub(crate) const INCIDENT_SELECT: &str = "SELECT id,provider,kind,original_id,group_id,user_id,title,content,category,issued_by,is_open,issued_at,modified_at FROM incidents";

const PROVIDER_SELECT: &str =
    "SELECT id,member_id,provider,username,pass,group_id,user_id,created_at FROM providers";

pub(crate) fn row_to_resource(row: &rusqlite::Row) -> rusqlite::Result<Resource> {
    let uuid: Option<String> = row.get(4)?;
    Ok(Resource {
        id: get_uuid(row, 0)?,
        provider: row.get(1)?,
        kind: row.get(2)?,
        original_id: row.get(3)?,
        uuid: uuid.and_then(|s| Uuid::parse_str(&s).ok()),
        name: row.get(5)?,
        notes: row.get(6)?,
        group_id: row.get(7)?,
        resource_created_at: parse_ts(row.get(8)?),
        resource_modified_at: parse_ts(row.get(9)?),
        ip_address: row.get(10)?,
        location: row.get(11)?,
        is_conn: row.get::<_, i32>(12)? != 0,
        is_on: row.get::<_, i32>(13)? != 0,
    })
}

pub(crate) fn row_to_incident(row: &rusqlite::Row) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: get_uuid(row, 0)?,
        provider: row.get(1)?,
        kind: row.get(2)?,
        original_id: row.get(3)?,
        group_id: row.get(4)?,
        user_id: row.get(5)?,
        title: row.get(6)?,
        content: row.get(7)?,
        category: row.get(8)?,
        issued_by: row.get(9)?,
        is_open: row.get::<_, i32>(10)? != 0,
        issued_at: parse_ts(row.get(11)?),
        modified_at: parse_ts(row.get(12)?),
    })
}

fn row_to_provider(row: &rusqlite::Row) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: get_uuid(row, 0)?,
        member_id: get_uuid(row, 1)?,
        provider: row.get(2)?,
        user: row.get(3)?,
        pass: row.get(4)?,
        group_id: row.get(5)?,
        user_id: row.get(6)?,
        created_at: parse_ts(row.get(7)?).unwrap_or_else(Utc::now),
    })
}

impl Db {
    // ── Members ─────────────────────────────────────────────

    /// Get or create the member with this email.
    pub fn insert_member(&self, email: &str) -> Result<Member> {
        HcuError::require(email, "Email")?;
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT OR IGNORE INTO members (id, email, created_at) VALUES (?1, ?2, ?3)",
            params![Uuid::new_v4().to_string(), email, ts(now)],
        )
        .map_err(|e| db_err("Insert member", e))?;
        conn.query_row(
            "SELECT id, email, created_at FROM members WHERE email = ?1",
            params![email],
            |row| {
                Ok(Member {
                    id: get_uuid(row, 0)?,
                    email: row.get(1)?,
                    created_at: parse_ts(row.get(2)?).unwrap_or(now),
                })
            },
        )
        .map_err(|e| db_err("Get member", e))
    }

    // ── Providers ───────────────────────────────────────────

    pub fn insert_provider(&self, provider: &Provider) -> Result<()> {
        provider.validate()?;
        self.conn()?
            .execute(
                "INSERT INTO providers (id, member_id, provider, username, pass, group_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    provider.id.to_string(),
                    provider.member_id.to_string(),
                    provider.provider,
                    provider.user,
                    provider.pass,
                    provider.group_id,
                    provider.user_id,
                    ts(provider.created_at),
                ],
            )
            .map_err(|e| db_err("Insert provider", e))?;
        Ok(())
    }

    pub fn provider(&self, id: Uuid) -> Result<Provider> {
        self.conn()?
            .query_row(
                &format!("{PROVIDER_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_provider,
            )
            .optional()
            .map_err(|e| db_err("Get provider", e))?
            .ok_or_else(|| HcuError::NotFound(format!("provider {id}")))
    }

    /// All configured providers, in a stable order.
    pub fn providers(&self) -> Result<Vec<Provider>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{PROVIDER_SELECT} ORDER BY provider, created_at, id"))
            .map_err(|e| db_err("List providers", e))?;
        let rows = stmt
            .query_map([], row_to_provider)
            .map_err(|e| db_err("List providers", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List providers", e))
    }

    // ── Resources ───────────────────────────────────────────

    /// Local identity for a fetched resource.
    ///
    /// An external UUID always wins. Without one, the row already holding
    /// this (provider, original_id) keeps its id; only unseen resources get
    /// a fresh one.
    pub fn resolve_resource_id(
        &self,
        provider: &str,
        original_id: &str,
        external: Option<Uuid>,
    ) -> Result<Uuid> {
        if let Some(id) = external.filter(|u| !u.is_nil()) {
            return Ok(id);
        }
        let existing: Option<String> = self
            .conn()?
            .query_row(
                "SELECT id FROM resources WHERE provider = ?1 AND original_id = ?2 ORDER BY created_at LIMIT 1",
                params![provider, original_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("Resolve resource", e))?;
        Ok(existing
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::new_v4))
    }

    /// Create or update a resource and return the id it is stored under.
    ///
    /// Without an external UUID the (provider, original_id) row found under
    /// the same lock keeps its id, so overlapping passes that each resolved
    /// a fresh id still converge on one row.
    pub fn upsert_resource(&self, r: &Resource) -> Result<Uuid> {
        r.validate()?;
        let now = ts(Utc::now());
        let conn = self.conn()?;
        let id = match r.uuid {
            Some(_) => r.id,
            None => conn
                .query_row(
                    "SELECT id FROM resources WHERE provider = ?1 AND original_id = ?2 AND uuid IS NULL",
                    params![r.provider, r.original_id],
                    |row| get_uuid(row, 0),
                )
                .optional()
                .map_err(|e| db_err("Resolve resource", e))?
                .unwrap_or(r.id),
        };
        conn.execute(
            "INSERT INTO resources
             (id, provider, kind, original_id, uuid, name, notes, group_id, resource_created_at,
              resource_modified_at, ip_address, location, is_conn, is_on, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
             ON CONFLICT(id) DO UPDATE SET
                provider=excluded.provider, kind=excluded.kind, original_id=excluded.original_id,
                uuid=excluded.uuid, name=excluded.name, notes=excluded.notes,
                group_id=excluded.group_id, resource_created_at=excluded.resource_created_at,
                resource_modified_at=excluded.resource_modified_at,
                ip_address=excluded.ip_address, location=excluded.location,
                is_conn=excluded.is_conn, is_on=excluded.is_on, updated_at=excluded.updated_at",
            params![
                id.to_string(),
                r.provider,
                r.kind,
                r.original_id,
                r.uuid.map(|u| u.to_string()),
                r.name,
                r.notes,
                r.group_id,
                r.resource_created_at.map(ts),
                r.resource_modified_at.map(ts),
                r.ip_address,
                r.location,
                r.is_conn as i32,
                r.is_on as i32,
                now,
            ],
        )
        .map_err(|e| db_err("Upsert resource", e))?;
        Ok(id)
    }

    pub fn resource(&self, id: Uuid) -> Result<Resource> {
        self.conn()?
            .query_row(
                &format!("{RESOURCE_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_resource,
            )
            .optional()
            .map_err(|e| db_err("Get resource", e))?
            .ok_or_else(|| HcuError::NotFound(format!("resource {id}")))
    }

    pub fn resource_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM resources", [], |r| r.get(0))
            .map_err(|e| db_err("Count resources", e))?;
        Ok(n as usize)
    }

    /// Map original ids to local resource ids. Unknown ids are returned
    /// separately so callers can report them.
    pub fn resource_ids_by_original_ids(
        &self,
        original_ids: &[String],
    ) -> Result<(Vec<Uuid>, Vec<String>)> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM resources WHERE original_id = ?1 ORDER BY created_at LIMIT 1")
            .map_err(|e| db_err("Resolve original ids", e))?;
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for oid in original_ids {
            let id: Option<String> = stmt
                .query_row(params![oid], |row| row.get(0))
                .optional()
                .map_err(|e| db_err("Resolve original ids", e))?;
            match id.and_then(|s| Uuid::parse_str(&s).ok()) {
                Some(id) => found.push(id),
                None => missing.push(oid.clone()),
            }
        }
        Ok((found, missing))
    }

    // ── Attributes ──────────────────────────────────────────

    /// Create or overwrite a resource attribute.
    pub fn upsert_attribute(&self, attr: &Attribute) -> Result<()> {
        attr.validate()?;
        let now = ts(Utc::now());
        self.conn()?
            .execute(
                "INSERT INTO attributes (resource_id, name, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(resource_id, name) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
                params![attr.resource_id.to_string(), attr.name, attr.value, now],
            )
            .map_err(|e| db_err("Upsert attribute", e))?;
        Ok(())
    }

    pub fn attributes(&self, resource_id: Uuid) -> Result<Vec<Attribute>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, value FROM attributes WHERE resource_id = ?1 ORDER BY name")
            .map_err(|e| db_err("List attributes", e))?;
        let rows = stmt
            .query_map(params![resource_id.to_string()], |row| {
                Ok(Attribute {
                    resource_id,
                    name: row.get(0)?,
                    value: row.get(1)?,
                })
            })
            .map_err(|e| db_err("List attributes", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List attributes", e))
    }

    // ── Tags ────────────────────────────────────────────────

    pub fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        self.conn()?
            .query_row(
                "SELECT id, name FROM tags WHERE name = ?1",
                params![name.trim()],
                |row| {
                    Ok(Tag {
                        id: get_uuid(row, 0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| db_err("Get tag", e))
    }

    /// Tags of a service; dangling links are not reported.
    pub fn service_tags(&self, service_id: Uuid) -> Result<Vec<Tag>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT t.id, t.name FROM services_tags st JOIN tags t ON t.id = st.tag_id
                 WHERE st.service_id = ?1 ORDER BY t.name",
            )
            .map_err(|e| db_err("List service tags", e))?;
        let rows = stmt
            .query_map(params![service_id.to_string()], |row| {
                Ok(Tag {
                    id: get_uuid(row, 0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| db_err("List service tags", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List service tags", e))
    }

    // ── Services ────────────────────────────────────────────

    pub fn insert_service(&self, service: &Service) -> Result<()> {
        service.validate()?;
        self.conn()?
            .execute(
                "INSERT INTO services (id, member_id, name, description, match_all, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    service.id.to_string(),
                    service.member_id.map(|m| m.to_string()),
                    service.name,
                    service.description,
                    service.match_all as i32,
                    ts(service.created_at),
                ],
            )
            .map_err(|e| db_err("Insert service", e))?;
        Ok(())
    }

    pub fn service(&self, id: Uuid) -> Result<Service> {
        self.conn()?
            .query_row(
                "SELECT id, member_id, name, description, match_all, created_at FROM services WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let member: Option<String> = row.get(1)?;
                    Ok(Service {
                        id: get_uuid(row, 0)?,
                        member_id: member.and_then(|m| Uuid::parse_str(&m).ok()),
                        name: row.get(2)?,
                        description: row.get(3)?,
                        match_all: row.get::<_, i32>(4)? != 0,
                        created_at: parse_ts(row.get(5)?).unwrap_or_else(Utc::now),
                    })
                },
            )
            .optional()
            .map_err(|e| db_err("Get service", e))?
            .ok_or_else(|| HcuError::NotFound(format!("service {id}")))
    }

    // ── Incidents ───────────────────────────────────────────

    /// Existing id for (provider, original_id), or a fresh one.
    pub fn resolve_incident_id(&self, provider: &str, original_id: &str) -> Result<Uuid> {
        let existing: Option<String> = self
            .conn()?
            .query_row(
                "SELECT id FROM incidents WHERE provider = ?1 AND original_id = ?2",
                params![provider, original_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| db_err("Resolve incident", e))?;
        Ok(existing
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::new_v4))
    }

    /// Create or update an incident keyed on (provider, original_id).
    ///
    /// Returns the id of the stored row, which differs from `i.id` when a
    /// concurrent pass stored the same incident first.
    pub fn upsert_incident(&self, i: &Incident) -> Result<Uuid> {
        i.validate()?;
        let now = ts(Utc::now());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO incidents
             (id, provider, kind, original_id, group_id, user_id, title, content, category,
              issued_by, is_open, issued_at, modified_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(provider, original_id) DO UPDATE SET
                kind=excluded.kind, group_id=excluded.group_id, user_id=excluded.user_id,
                title=excluded.title, content=excluded.content, category=excluded.category,
                issued_by=excluded.issued_by, is_open=excluded.is_open,
                issued_at=excluded.issued_at, modified_at=excluded.modified_at,
                updated_at=excluded.updated_at",
            params![
                i.id.to_string(),
                i.provider,
                i.kind,
                i.original_id,
                i.group_id,
                i.user_id,
                i.title,
                i.content,
                i.category,
                i.issued_by,
                i.is_open as i32,
                i.issued_at.map(ts),
                i.modified_at.map(ts),
                now,
            ],
        )
        .map_err(|e| db_err("Upsert incident", e))?;
        conn.query_row(
            "SELECT id FROM incidents WHERE provider = ?1 AND original_id = ?2",
            params![i.provider, i.original_id],
            |row| get_uuid(row, 0),
        )
        .map_err(|e| db_err("Upsert incident", e))
    }

    pub fn incident(&self, id: Uuid) -> Result<Incident> {
        self.conn()?
            .query_row(
                &format!("{INCIDENT_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_incident,
            )
            .optional()
            .map_err(|e| db_err("Get incident", e))?
            .ok_or_else(|| HcuError::NotFound(format!("incident {id}")))
    }

    pub fn incident_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM incidents", [], |r| r.get(0))
            .map_err(|e| db_err("Count incidents", e))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn resource(db: &Db, original_id: &str, external: Option<Uuid>) -> Resource {
        let id = db
            .resolve_resource_id("softlayer", original_id, external)
            .unwrap();
        Resource {
            id,
            provider: "softlayer".into(),
            kind: "vm".into(),
            original_id: original_id.into(),
            uuid: external,
            name: format!("vm-{original_id}"),
            notes: String::new(),
            group_id: "g1".into(),
            resource_created_at: None,
            resource_modified_at: None,
            ip_address: "10.0.0.1".into(),
            location: "seo01".into(),
            is_conn: true,
            is_on: true,
        }
    }

    pub(crate) fn incident(db: &Db, original_id: &str) -> Incident {
        Incident {
            id: db.resolve_incident_id("softlayer", original_id).unwrap(),
            provider: "softlayer".into(),
            kind: "event".into(),
            original_id: original_id.into(),
            group_id: "g1".into(),
            user_id: "u1".into(),
            title: format!("maintenance {original_id}"),
            content: "planned".into(),
            category: "maintenance".into(),
            issued_by: "noc".into(),
            is_open: true,
            issued_at: Some(Utc::now()),
            modified_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_external_uuid_becomes_id() {
        let db = Db::open_in_memory().unwrap();
        let ext = Uuid::new_v4();
        let r = resource(&db, "1001", Some(ext));
        assert_eq!(r.id, ext);
        db.upsert_resource(&r).unwrap();
        assert_eq!(db.resource(ext).unwrap().uuid, Some(ext));
    }

    #[test]
    fn test_second_upsert_updates() {
        let db = Db::open_in_memory().unwrap();
        let ext = Uuid::new_v4();
        db.upsert_resource(&resource(&db, "1001", Some(ext))).unwrap();

        let mut again = resource(&db, "1001", Some(ext));
        again.name = "renamed".into();
        again.is_on = false;
        db.upsert_resource(&again).unwrap();

        assert_eq!(db.resource_count().unwrap(), 1);
        let stored = db.resource(ext).unwrap();
        assert_eq!(stored.name, "renamed");
        assert!(!stored.is_on);
    }

    #[test]
    fn test_uuid_less_resource_keeps_identity() {
        let db = Db::open_in_memory().unwrap();
        let first = resource(&db, "2002", None);
        db.upsert_resource(&first).unwrap();
        let second = resource(&db, "2002", None);
        assert_eq!(first.id, second.id);
        db.upsert_resource(&second).unwrap();
        assert_eq!(db.resource_count().unwrap(), 1);
    }

    #[test]
    fn test_racing_resolutions_converge_on_one_row() {
        let db = Db::open_in_memory().unwrap();
        // Both passes resolve before either one writes
        let first = resource(&db, "2002", None);
        let second = resource(&db, "2002", None);
        assert_ne!(first.id, second.id);

        let a = db.upsert_resource(&first).unwrap();
        let b = db.upsert_resource(&second).unwrap();
        assert_eq!(a, first.id);
        assert_eq!(a, b);
        assert_eq!(db.resource_count().unwrap(), 1);
    }

    #[test]
    fn test_unique_key_rejects_duplicate_uuid_less_rows() {
        let db = Db::open_in_memory().unwrap();
        db.upsert_resource(&resource(&db, "2002", None)).unwrap();
        let dup = db.conn().unwrap().execute(
            "INSERT INTO resources (id, provider, kind, original_id, name, created_at, updated_at)
             VALUES (?1, 'softlayer', 'server', '2002', 'dup', '', '')",
            params![Uuid::new_v4().to_string()],
        );
        assert!(dup.is_err());
        assert_eq!(db.resource_count().unwrap(), 1);
    }

    #[test]
    fn test_invalid_resource_rejected() {
        let db = Db::open_in_memory().unwrap();
        let mut r = resource(&db, "3003", None);
        r.kind = String::new();
        let err = db.upsert_resource(&r).unwrap_err();
        assert!(matches!(err, HcuError::Validation(_)));
        assert_eq!(db.resource_count().unwrap(), 0);
    }

    #[test]
    fn test_attribute_upsert_overwrites() {
        let db = Db::open_in_memory().unwrap();
        let r = resource(&db, "1001", None);
        db.upsert_resource(&r).unwrap();
        for value in ["ubuntu", "debian"] {
            db.upsert_attribute(&Attribute {
                resource_id: r.id,
                name: "os".into(),
                value: value.into(),
            })
            .unwrap();
        }
        let attrs = db.attributes(r.id).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].value, "debian");
    }

    #[test]
    fn test_incident_upsert_is_idempotent() {
        let db = Db::open_in_memory().unwrap();
        let first = db.upsert_incident(&incident(&db, "n-1")).unwrap();
        let mut again = incident(&db, "n-1");
        again.is_open = false;
        let second = db.upsert_incident(&again).unwrap();
        assert_eq!(first, second);
        assert_eq!(db.incident_count().unwrap(), 1);
        assert!(!db.incident(first).unwrap().is_open);
    }

    #[test]
    fn test_member_is_get_or_create() {
        let db = Db::open_in_memory().unwrap();
        let a = db.insert_member("ops@example.com").unwrap();
        let b = db.insert_member("ops@example.com").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_missing_provider_is_not_found() {
        let db = Db::open_in_memory().unwrap();
        assert!(matches!(
            db.provider(Uuid::new_v4()),
            Err(HcuError::NotFound(_))
        ));
    }

    #[test]
    fn test_original_id_resolution() {
        let db = Db::open_in_memory().unwrap();
        let r = resource(&db, "1001", None);
        db.upsert_resource(&r).unwrap();
        let (found, missing) = db
            .resource_ids_by_original_ids(&["1001".into(), "9999".into()])
            .unwrap();
        assert_eq!(found, vec![r.id]);
        assert_eq!(missing, vec!["9999".to_string()]);
    }
}
