//! Normalized wire shapes returned by provider plugins.
//!
//! Plugins hand back opaque JSON items; each item is decoded on its own so a
//! malformed one can be skipped without losing the batch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hcu_core::error::{HcuError, Result};
use hcu_core::types::{Incident, Resource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A resource as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResource {
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub original_id: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub resource_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resource_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_conn: bool,
    #[serde(default)]
    pub is_on: bool,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub integer_attributes: HashMap<String, i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl RawResource {
    pub fn decode(item: &serde_json::Value) -> Result<Self> {
        Self::deserialize(item).map_err(|e| HcuError::Decode(format!("resource: {e}")))
    }

    /// External UUID, ignoring the nil value some providers send.
    pub fn external_id(&self) -> Option<Uuid> {
        self.uuid.filter(|u| !u.is_nil())
    }

    /// Relational row for this item under the resolved local `id`.
    pub fn to_resource(&self, id: Uuid) -> Resource {
        Resource {
            id,
            provider: self.provider.clone(),
            kind: self.kind.clone(),
            original_id: self.original_id.clone(),
            uuid: self.external_id(),
            name: self.name.clone(),
            notes: self.notes.clone(),
            group_id: self.group_id.clone(),
            resource_created_at: self.resource_created_at,
            resource_modified_at: self.resource_modified_at,
            ip_address: self.ip_address.clone(),
            location: self.location.clone(),
            is_conn: self.is_conn,
            is_on: self.is_on,
        }
    }
}

/// A notification (incident) as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNotification {
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub original_id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub issued_by: String,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// Provider-side original ids of the affected resources.
    #[serde(default)]
    pub resource_ids: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

impl RawNotification {
    pub fn decode(item: &serde_json::Value) -> Result<Self> {
        Self::deserialize(item).map_err(|e| HcuError::Decode(format!("notification: {e}")))
    }

    pub fn to_incident(&self, id: Uuid) -> Incident {
        Incident {
            id,
            provider: self.provider.clone(),
            kind: self.kind.clone(),
            original_id: self.original_id.clone(),
            group_id: self.group_id.clone(),
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            category: self.category.clone(),
            issued_by: self.issued_by.clone(),
            is_open: self.is_open,
            issued_at: self.issued_at,
            modified_at: self.modified_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_resource() {
        let item = json!({
            "provider": "softlayer",
            "type": "vm",
            "original_id": "1001",
            "uuid": "6c1f2b4e-6f0a-4c1e-9d6b-2f4e8a9b1c3d",
            "name": "web-01",
            "resource_created_at": "2018-03-01T10:00:00Z",
            "is_on": true,
            "attributes": {"os": "ubuntu"},
            "integer_attributes": {"cpu": 4},
            "tags": ["web", "prod"],
            "user_ids": ["u1"],
            "raw": {"hostname": "web-01"}
        });
        let raw = RawResource::decode(&item).unwrap();
        assert_eq!(raw.tags, vec!["web", "prod"]);
        assert_eq!(raw.integer_attributes["cpu"], 4);
        assert!(raw.external_id().is_some());

        let id = Uuid::new_v4();
        let resource = raw.to_resource(id);
        assert_eq!(resource.id, id);
        assert_eq!(resource.kind, "vm");
        assert!(resource.resource_created_at.is_some());
    }

    #[test]
    fn test_nil_uuid_is_no_uuid() {
        let item = json!({
            "provider": "softlayer", "type": "vm", "name": "web-01",
            "uuid": "00000000-0000-0000-0000-000000000000"
        });
        assert_eq!(RawResource::decode(&item).unwrap().external_id(), None);
    }

    #[test]
    fn test_decode_failures() {
        // Missing name
        let missing = json!({"provider": "softlayer", "type": "vm"});
        assert!(matches!(RawResource::decode(&missing), Err(HcuError::Decode(_))));
        // Wrong shape
        let wrong = json!({"provider": "softlayer", "type": "vm", "name": "x", "tags": "web"});
        assert!(matches!(RawResource::decode(&wrong), Err(HcuError::Decode(_))));
        assert!(matches!(RawNotification::decode(&json!([1, 2])), Err(HcuError::Decode(_))));
    }

    #[test]
    fn test_decode_notification() {
        let item = json!({
            "provider": "softlayer",
            "type": "event",
            "original_id": "n-77",
            "group_id": "g1",
            "user_id": "u1",
            "title": "Planned maintenance",
            "content": "Host reboot",
            "category": "maintenance",
            "issued_by": "noc",
            "is_open": true,
            "issued_at": "2018-03-01T10:00:00Z",
            "modified_at": "2018-03-02T08:30:00Z",
            "resource_ids": ["1001", "1002"]
        });
        let note = RawNotification::decode(&item).unwrap();
        assert_eq!(note.resource_ids.len(), 2);
        let incident = note.to_incident(Uuid::new_v4());
        assert_eq!(incident.title, "Planned maintenance");
        assert!(incident.validate().is_ok());
    }

    #[test]
    fn test_sparse_notification_decodes_but_fails_validation() {
        let item = json!({
            "provider": "softlayer",
            "type": "event",
            "original_id": "n-78",
            "title": "Planned maintenance"
        });
        let incident = RawNotification::decode(&item)
            .unwrap()
            .to_incident(Uuid::new_v4());
        assert!(incident.validate().is_err());
    }
}
