//! Local key → JSON persistence, scoped by site id.
//!
//! Used for the operations ledger and for pending-write durability across
//! restarts. [`crate::db::SqliteStore`] is the on-disk implementation;
//! [`MemoryStore`] backs tests and ephemeral sessions.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FieldOpsError;

/// Scope reserved for engine-wide state that is not tied to a single site.
pub const SYNC_SCOPE: &str = "_sync";

pub trait LocalPersistence: Send + Sync {
    fn get(&self, scope: &str, key: &str) -> Result<Option<serde_json::Value>, FieldOpsError>;
    fn set(&self, scope: &str, key: &str, value: &serde_json::Value) -> Result<(), FieldOpsError>;
    fn remove(&self, scope: &str, key: &str) -> Result<(), FieldOpsError>;
    /// Every scope that holds `key`.
    fn scopes_with(&self, key: &str) -> Result<Vec<String>, FieldOpsError>;
}

/// Typed read through any [`LocalPersistence`].
pub fn load_json<T: DeserializeOwned>(
    store: &dyn LocalPersistence,
    scope: &str,
    key: &str,
) -> Result<Option<T>, FieldOpsError> {
    match store.get(scope, key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write through any [`LocalPersistence`].
pub fn save_json<T: Serialize>(
    store: &dyn LocalPersistence,
    scope: &str,
    key: &str,
    value: &T,
) -> Result<(), FieldOpsError> {
    let value = serde_json::to_value(value)?;
    store.set(scope, key, &value)
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalPersistence for MemoryStore {
    fn get(&self, scope: &str, key: &str) -> Result<Option<serde_json::Value>, FieldOpsError> {
        Ok(self
            .entries
            .lock()
            .get(&(scope.to_string(), key.to_string()))
            .cloned())
    }

    fn set(&self, scope: &str, key: &str, value: &serde_json::Value) -> Result<(), FieldOpsError> {
        self.entries
            .lock()
            .insert((scope.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    fn remove(&self, scope: &str, key: &str) -> Result<(), FieldOpsError> {
        self.entries
            .lock()
            .remove(&(scope.to_string(), key.to_string()));
        Ok(())
    }

    fn scopes_with(&self, key: &str) -> Result<Vec<String>, FieldOpsError> {
        let mut scopes: Vec<String> = self
            .entries
            .lock()
            .keys()
            .filter(|(_, k)| k == key)
            .map(|(s, _)| s.clone())
            .collect();
        scopes.sort();
        Ok(scopes)
    }
}
