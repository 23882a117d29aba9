//! Relational domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{HcuError, Result};

/// Portal member owning providers and services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Credential binding between a member and an external account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub member_id: Uuid,
    /// Provider-type name, used to resolve the plugin.
    pub provider: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub pass: String,
    pub group_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl Provider {
    pub fn validate(&self) -> Result<()> {
        HcuError::require(&self.provider, "Provider")?;
        HcuError::require(&self.user, "User")?;
        HcuError::require(&self.pass, "Pass")?;
        HcuError::require(&self.group_id, "GroupID")?;
        HcuError::require(&self.user_id, "UserID")
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.user)
    }
}

/// External-system-backed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub original_id: String,
    /// Externally issued UUID; becomes `id` when present.
    pub uuid: Option<Uuid>,
    pub name: String,
    pub notes: String,
    pub group_id: String,
    pub resource_created_at: Option<DateTime<Utc>>,
    pub resource_modified_at: Option<DateTime<Utc>>,
    pub ip_address: String,
    pub location: String,
    pub is_conn: bool,
    pub is_on: bool,
}

impl Resource {
    pub fn validate(&self) -> Result<()> {
        HcuError::require(&self.provider, "Provider")?;
        HcuError::require(&self.kind, "Type")?;
        HcuError::require(&self.name, "Name")
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.provider)
    }
}

/// Loose key/value attribute of a resource, stored as a child row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub resource_id: Uuid,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn validate(&self) -> Result<()> {
        HcuError::require(&self.name, "Name")?;
        HcuError::require(&self.value, "Value")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// User-defined aggregate whose membership is derived from tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub member_id: Option<Uuid>,
    pub name: String,
    pub description: String,
    /// ALL policy when true, ANY otherwise.
    pub match_all: bool,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn validate(&self) -> Result<()> {
        HcuError::require(&self.name, "Name")
    }
}

/// Event record sourced from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub original_id: String,
    pub group_id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub issued_by: String,
    pub is_open: bool,
    pub issued_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// Every descriptive field and both timestamps are mandatory.
    pub fn validate(&self) -> Result<()> {
        HcuError::require(&self.provider, "Provider")?;
        HcuError::require(&self.kind, "Type")?;
        HcuError::require(&self.original_id, "OriginalID")?;
        HcuError::require(&self.group_id, "GroupID")?;
        HcuError::require(&self.user_id, "UserID")?;
        HcuError::require(&self.title, "Title")?;
        HcuError::require(&self.content, "Content")?;
        HcuError::require(&self.category, "Category")?;
        HcuError::require(&self.issued_by, "IssuedBy")?;
        if self.issued_at.is_none() {
            return Err(HcuError::Validation("IssuedAt must be set".into()));
        }
        if self.modified_at.is_none() {
            return Err(HcuError::Validation("ModifiedAt must be set".into()));
        }
        Ok(())
    }
}
