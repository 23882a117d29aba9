//! Tag matching engine. Derives service membership from tag overlap.
//!
//! Nothing here is persisted: every call recomputes membership from the
//! current junction rows. All entry points share [`MATCHING_RESOURCES`], so
//! `has_resource` and `tagged_resources` can never disagree.

use hcu_core::error::Result;
use hcu_core::types::{Incident, Resource, Service};
use rusqlite::params;
use uuid::Uuid;

use crate::db::{Db, db_err};
use crate::entities::{INCIDENT_SELECT, RESOURCE_SELECT, row_to_incident, row_to_resource};

/// Membership policy of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Resource shares at least one tag with the service.
    Any,
    /// Resource carries every tag of the service.
    All,
}

impl MatchPolicy {
    pub fn of(service: &Service) -> Self {
        if service.match_all { Self::All } else { Self::Any }
    }

    fn as_sql(self) -> i32 {
        match self {
            Self::Any => 0,
            Self::All => 1,
        }
    }
}

/// Ids of resources matching service `?1` under policy `?2` (1 = ALL).
///
/// Only resolvable tags count on both sides; the HAVING clause compares the
/// distinct matching tag count with the service's tag count.
const MATCHING_RESOURCES: &str = "
    SELECT rt.resource_id
      FROM resources_tags rt
      JOIN services_tags st ON st.tag_id = rt.tag_id AND st.service_id = ?1
      JOIN tags t ON t.id = rt.tag_id
     GROUP BY rt.resource_id
    HAVING ?2 = 0
        OR COUNT(DISTINCT rt.tag_id) = (
            SELECT COUNT(DISTINCT st2.tag_id)
              FROM services_tags st2
              JOIN tags t2 ON t2.id = st2.tag_id
             WHERE st2.service_id = ?1)";

impl Db {
    /// Number of resolvable tags on a service.
    fn service_tag_count(&self, service_id: Uuid) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row(
                "SELECT COUNT(DISTINCT st.tag_id) FROM services_tags st JOIN tags t ON t.id = st.tag_id
                 WHERE st.service_id = ?1",
                params![service_id.to_string()],
                |r| r.get(0),
            )
            .map_err(|e| db_err("Count service tags", e))?;
        Ok(n as usize)
    }

    /// Resources belonging to `service`. A service without tags matches
    /// nothing under either policy.
    pub fn tagged_resources(&self, service: &Service) -> Result<Vec<Resource>> {
        if self.service_tag_count(service.id)? == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{RESOURCE_SELECT} WHERE id IN ({MATCHING_RESOURCES}) ORDER BY name, id"
            ))
            .map_err(|e| db_err("Tagged resources", e))?;
        let rows = stmt
            .query_map(
                params![service.id.to_string(), MatchPolicy::of(service).as_sql()],
                row_to_resource,
            )
            .map_err(|e| db_err("Tagged resources", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("Tagged resources", e))
    }

    /// Whether `resource_id` is one of [`Db::tagged_resources`].
    pub fn has_resource(&self, service: &Service, resource_id: Uuid) -> Result<bool> {
        if self.service_tag_count(service.id)? == 0 {
            return Ok(false);
        }
        self.conn()?
            .query_row(
                &format!(
                    "SELECT EXISTS (SELECT 1 FROM resources WHERE id = ?3 AND id IN ({MATCHING_RESOURCES}))"
                ),
                params![
                    service.id.to_string(),
                    MatchPolicy::of(service).as_sql(),
                    resource_id.to_string()
                ],
                |r| r.get::<_, i32>(0),
            )
            .map(|found| found != 0)
            .map_err(|e| db_err("Has resource", e))
    }

    /// Incidents linked to at least one resource of `service`.
    pub fn service_incidents(&self, service: &Service) -> Result<Vec<Incident>> {
        if self.service_tag_count(service.id)? == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "{INCIDENT_SELECT} WHERE id IN (
                    SELECT ir.incident_id FROM incidents_resources ir
                      JOIN resources r ON r.id = ir.resource_id
                     WHERE ir.resource_id IN ({MATCHING_RESOURCES}))
                 ORDER BY issued_at DESC, id"
            ))
            .map_err(|e| db_err("Service incidents", e))?;
        let rows = stmt
            .query_map(
                params![service.id.to_string(), MatchPolicy::of(service).as_sql()],
                row_to_incident,
            )
            .map_err(|e| db_err("Service incidents", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("Service incidents", e))
    }
}
