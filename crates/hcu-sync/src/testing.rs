//! In-process fake provider plugin and fixtures for orchestrator tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hcu_core::error::{HcuError, Result};
use hcu_core::traits::{AccountInfo, ProviderPlugin};
use hcu_core::types::Provider;
use hcu_db::Db;
use serde_json::{Value, json};
use uuid::Uuid;

pub struct FakePlugin {
    name: String,
    pub resources: Mutex<Vec<Value>>,
    pub notifications: Mutex<Vec<Value>>,
    pub fail_fetch: bool,
    pub since: Mutex<Option<DateTime<Utc>>>,
}

impl FakePlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            resources: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            fail_fetch: false,
            since: Mutex::new(None),
        }
    }

    pub fn with_resources(self, items: Vec<Value>) -> Self {
        *self.resources.lock().unwrap() = items;
        self
    }

    pub fn with_notifications(self, items: Vec<Value>) -> Self {
        *self.notifications.lock().unwrap() = items;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_fetch = true;
        self
    }
}

#[async_trait]
impl ProviderPlugin for FakePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn check_account(&self, user: &str, pass: &str) -> Result<AccountInfo> {
        if pass != "secret" {
            return Err(HcuError::Plugin("invalid credential".into()));
        }
        Ok(AccountInfo {
            subject_id: format!("subject-{user}"),
            group_id: "group-1".into(),
        })
    }

    async fn get_resources(&self, _user: &str, _pass: &str) -> Result<Vec<Value>> {
        if self.fail_fetch {
            return Err(HcuError::Plugin("upstream timeout".into()));
        }
        Ok(self.resources.lock().unwrap().clone())
    }

    async fn get_notifications(
        &self,
        _user: &str,
        _pass: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        *self.since.lock().unwrap() = Some(since);
        if self.fail_fetch {
            return Err(HcuError::Plugin("upstream timeout".into()));
        }
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn get_statuses(&self, _user: &str, _pass: &str) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

/// A stored provider of type `plugin`.
pub fn provider(db: &Db, plugin: &str) -> Provider {
    let member = db.insert_member("ops@example.com").unwrap();
    let provider = Provider {
        id: Uuid::new_v4(),
        member_id: member.id,
        provider: plugin.into(),
        user: "api-user".into(),
        pass: "secret".into(),
        group_id: "group-1".into(),
        user_id: "subject-api-user".into(),
        created_at: Utc::now(),
    };
    db.insert_provider(&provider).unwrap();
    provider
}

pub fn resource_item(original_id: &str, tags: &[&str]) -> Value {
    json!({
        "provider": "fake",
        "type": "vm",
        "original_id": original_id,
        "name": format!("vm-{original_id}"),
        "is_on": true,
        "attributes": {"os": "ubuntu"},
        "integer_attributes": {"cpu": 2},
        "tags": tags,
        "user_ids": ["u1"],
    })
}

pub fn notification_item(original_id: &str, resource_ids: &[&str]) -> Value {
    json!({
        "provider": "fake",
        "type": "event",
        "original_id": original_id,
        "group_id": "group-1",
        "user_id": "subject-api-user",
        "title": format!("maintenance {original_id}"),
        "content": "Scheduled host maintenance",
        "category": "maintenance",
        "issued_by": "noc",
        "is_open": true,
        "issued_at": "2018-03-01T10:00:00Z",
        "modified_at": "2018-03-01T12:00:00Z",
        "resource_ids": resource_ids,
        "user_ids": ["u1"],
    })
}
