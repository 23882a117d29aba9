//! Connection handling and schema migrations.

use chrono::{DateTime, Utc};
use hcu_core::error::{HcuError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Relational store shared by the scheduler jobs and the read path.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("DB open", e))?;

        // WAL lets the read path run while a sync pass is writing
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| db_err("DB pragma", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS members (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                member_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                username TEXT NOT NULL,
                pass TEXT NOT NULL,
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                kind TEXT NOT NULL,
                original_id TEXT NOT NULL DEFAULT '',
                uuid TEXT,
                name TEXT NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                group_id TEXT NOT NULL DEFAULT '',
                resource_created_at TEXT,
                resource_modified_at TEXT,
                ip_address TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                is_conn INTEGER NOT NULL DEFAULT 0,
                is_on INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            DROP INDEX IF EXISTS idx_resources_original;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_resources_original_key
                ON resources (provider, original_id) WHERE uuid IS NULL;

            CREATE TABLE IF NOT EXISTS attributes (
                resource_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (resource_id, name)
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                member_id TEXT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                match_all INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                kind TEXT NOT NULL,
                original_id TEXT NOT NULL,
                group_id TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL DEFAULT '',
                issued_by TEXT NOT NULL DEFAULT '',
                is_open INTEGER NOT NULL DEFAULT 0,
                issued_at TEXT,
                modified_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (provider, original_id)
            );

            -- Junctions: one row per (owner, target)
            CREATE TABLE IF NOT EXISTS resources_tags (
                resource_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (resource_id, tag_id)
            );
            CREATE INDEX IF NOT EXISTS idx_resources_tags_tag ON resources_tags (tag_id);

            CREATE TABLE IF NOT EXISTS resources_users (
                resource_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (resource_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS providers_resources (
                provider_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (provider_id, resource_id)
            );

            CREATE TABLE IF NOT EXISTS services_tags (
                service_id TEXT NOT NULL,
                tag_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (service_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS incidents_resources (
                incident_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (incident_id, resource_id)
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_resources_resource
                ON incidents_resources (resource_id);

            CREATE TABLE IF NOT EXISTS incidents_users (
                incident_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (incident_id, user_id)
            );
        ",
            )
            .map_err(|e| db_err("Migration", e))?;
        Ok(())
    }

    /// Lock the connection. Every public operation holds it for its own
    /// statements only, never across a plugin call.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HcuError::Database(format!("connection lock poisoned: {e}")))
    }
}

pub(crate) fn db_err(context: &str, e: rusqlite::Error) -> HcuError {
    HcuError::Database(format!("{context}: {e}"))
}

pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub(crate) fn parse_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Read a TEXT column holding a UUID.
pub(crate) fn get_uuid(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_and_migrate() {
        let db = Db::open_in_memory().unwrap();
        // Migrations are idempotent
        db.migrate().unwrap();
        let count: i64 = db
            .conn()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 13);
    }

    #[test]
    fn test_open_file() {
        let dir = std::env::temp_dir().join(format!("hcu-db-test-{}", Uuid::new_v4()));
        let db = Db::open(&dir.join("hcu.db")).unwrap();
        drop(db);
        assert!(dir.join("hcu.db").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
