//! SQLite-backed local persistence.
//!
//! The database lives at `~/.fieldops/fieldops.db` unless the config points
//! elsewhere. It is the durable layer for the operations ledger, the pending
//! write queue and the cached site mirror used for offline start-up.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::error::FieldOpsError;
use crate::persistence::LocalPersistence;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Migration v{version} failed: {source}")]
    Migration {
        version: i32,
        source: rusqlite::Error,
    },

    #[error("Database schema v{found} is newer than this build supports (v{supported})")]
    SchemaTooNew { found: i32, supported: i32 },

    #[error("Stored value for {scope}/{key} is not valid JSON: {source}")]
    Corrupt {
        scope: String,
        key: String,
        source: serde_json::Error,
    },
}

/// SQLite connection wrapper implementing [`LocalPersistence`].
///
/// The connection sits behind a mutex so the store can be shared across
/// tasks; every statement is short and never held across an `.await`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the default path and apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn)?;

        log::debug!("Opened local store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database with the full schema.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        crate::migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Resolve the default database path: `~/.fieldops/fieldops.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".fieldops").join("fieldops.db"))
    }

    /// Open at a configured override, or the default path.
    pub fn open_configured(path: Option<&str>) -> Result<Self, DbError> {
        match path {
            Some(p) if !p.trim().is_empty() => Self::open_at(Path::new(p).to_path_buf()),
            _ => Self::open(),
        }
    }

    fn get_raw(&self, scope: &str, key: &str) -> Result<Option<serde_json::Value>, DbError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value_json FROM kv_store WHERE scope = ?1 AND key = ?2",
                params![scope, key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| DbError::Corrupt {
                    scope: scope.to_string(),
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn set_raw(&self, scope: &str, key: &str, value: &serde_json::Value) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv_store (scope, key, value_json, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope, key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            params![scope, key, value.to_string()],
        )?;
        Ok(())
    }
}

impl LocalPersistence for SqliteStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<serde_json::Value>, FieldOpsError> {
        Ok(self.get_raw(scope, key)?)
    }

    fn set(&self, scope: &str, key: &str, value: &serde_json::Value) -> Result<(), FieldOpsError> {
        Ok(self.set_raw(scope, key, value)?)
    }

    fn remove(&self, scope: &str, key: &str) -> Result<(), FieldOpsError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM kv_store WHERE scope = ?1 AND key = ?2",
            params![scope, key],
        )
        .map_err(DbError::from)?;
        Ok(())
    }

    fn scopes_with(&self, key: &str) -> Result<Vec<String>, FieldOpsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT scope FROM kv_store WHERE key = ?1 ORDER BY scope")
            .map_err(DbError::from)?;
        let scopes = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(DbError::from)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(DbError::from)?;
        Ok(scopes)
    }
}
