//! Remote document store collaborator.
//!
//! The engine only needs two calls: a live subscription to a collection and
//! a field-merge write to one document. [`InMemoryRemote`] implements both
//! in-process; it backs the CLI, demos and tests. Built with
//! [`InMemoryRemote::persistent`] it keeps accepted writes in local
//! persistence so they outlive the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::FieldOpsError;
use crate::persistence::{load_json, save_json, LocalPersistence};

/// Scope holding the collection of a persistent [`InMemoryRemote`].
pub const REMOTE_SCOPE: &str = "_remote";
const DOCUMENTS_KEY: &str = "documents";

/// Capacity of a snapshot channel before the store applies backpressure.
const SNAPSHOT_BUFFER: usize = 64;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("offline: {0}")]
    Offline(String),
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<RemoteError> for FieldOpsError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Offline(msg) => FieldOpsError::Offline(msg),
            RemoteError::Rejected(msg) => FieldOpsError::Rejected(msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub id: String,
    pub data: Value,
}

/// Full state of the subscribed collection at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub documents: Vec<RemoteDocument>,
    /// Served from the store's local cache rather than the server.
    pub from_cache: bool,
}

/// Ordered snapshot feed. An `Err` item means the transport dropped; the
/// stream ends after it.
pub type SnapshotStream = mpsc::Receiver<Result<RemoteSnapshot, RemoteError>>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a live subscription. `filter` restricts documents by district code.
    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<&str>,
    ) -> Result<SnapshotStream, RemoteError>;

    /// Merge `patch` (canonical field names) into document `id`.
    async fn write_patch(&self, collection: &str, id: &str, patch: &Value)
        -> Result<(), RemoteError>;
}

struct Subscriber {
    filter: Option<String>,
    tx: mpsc::Sender<Result<RemoteSnapshot, RemoteError>>,
}

/// In-process [`RemoteStore`] holding one collection.
pub struct InMemoryRemote {
    documents: Mutex<BTreeMap<String, Value>>,
    subscribers: Mutex<Vec<Subscriber>>,
    rejections: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, Value)>>,
    online: AtomicBool,
    silent: AtomicBool,
    backing: Option<Arc<dyn LocalPersistence>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            rejections: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            online: AtomicBool::new(true),
            silent: AtomicBool::new(false),
            backing: None,
        }
    }

    pub fn with_documents(documents: impl IntoIterator<Item = (String, Value)>) -> Self {
        let remote = Self::new();
        remote.documents.lock().extend(documents);
        remote
    }

    /// Collection stored in `persistence`. `seed` is used only when nothing
    /// has been stored yet; every accepted change is written back.
    pub fn persistent(
        persistence: Arc<dyn LocalPersistence>,
        seed: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<Self, FieldOpsError> {
        let stored: Option<BTreeMap<String, Value>> =
            load_json(persistence.as_ref(), REMOTE_SCOPE, DOCUMENTS_KEY)?;
        let documents = match stored {
            Some(documents) => documents,
            None => {
                let documents: BTreeMap<String, Value> = seed.into_iter().collect();
                save_json(persistence.as_ref(), REMOTE_SCOPE, DOCUMENTS_KEY, &documents)?;
                documents
            }
        };
        log::debug!("Local remote store holds {} documents", documents.len());

        let mut remote = Self::new();
        remote.documents = Mutex::new(documents);
        remote.backing = Some(persistence);
        Ok(remote)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Going offline drops every live subscription with a transport error.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if !online {
            let subscribers = std::mem::take(&mut *self.subscribers.lock());
            for sub in subscribers {
                let _ = sub
                    .tx
                    .try_send(Err(RemoteError::Offline("connection lost".to_string())));
            }
        }
    }

    /// Accept subscriptions without ever delivering a snapshot.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Refuse every write to `id` with `reason`.
    pub fn reject_writes_for(&self, id: &str, reason: &str) {
        self.rejections
            .lock()
            .insert(id.to_string(), reason.to_string());
    }

    pub fn document(&self, id: &str) -> Option<Value> {
        self.documents.lock().get(id).cloned()
    }

    /// Accepted writes, in arrival order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Change a document the way another client would, and notify subscribers.
    pub async fn put_fields(&self, id: &str, fields: &Value) {
        if let Err(e) = self.merge(id, fields) {
            log::warn!("Failed to store document {}: {}", id, e);
        }
        self.broadcast().await;
    }

    fn merge(&self, id: &str, fields: &Value) -> Result<(), FieldOpsError> {
        let stored = {
            let mut documents = self.documents.lock();
            let doc = documents
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            if let (Some(target), Some(source)) = (doc.as_object_mut(), fields.as_object()) {
                for (key, value) in source {
                    target.insert(key.clone(), value.clone());
                }
            }
            self.backing.as_ref().map(|_| (*documents).clone())
        };

        match (&self.backing, stored) {
            (Some(persistence), Some(documents)) => {
                save_json(persistence.as_ref(), REMOTE_SCOPE, DOCUMENTS_KEY, &documents)
            }
            _ => Ok(()),
        }
    }

    fn snapshot(&self, filter: Option<&str>) -> RemoteSnapshot {
        let documents = self
            .documents
            .lock()
            .iter()
            .filter(|(_, data)| match filter {
                Some(code) => ["district", "okres"]
                    .iter()
                    .find_map(|k| data.get(*k).and_then(Value::as_str))
                    .map(|d| d.eq_ignore_ascii_case(code))
                    .unwrap_or(false),
                None => true,
            })
            .map(|(id, data)| RemoteDocument {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();
        RemoteSnapshot {
            documents,
            from_cache: false,
        }
    }

    /// Push the current collection to every subscriber.
    pub async fn broadcast(&self) {
        if self.silent.load(Ordering::SeqCst) {
            return;
        }
        let targets: Vec<(Option<String>, mpsc::Sender<_>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.filter.clone(), s.tx.clone()))
            .collect();

        for (filter, tx) in targets {
            let snapshot = self.snapshot(filter.as_deref());
            if tx.send(Ok(snapshot)).await.is_err() {
                log::debug!("Dropping closed snapshot subscriber");
            }
        }
        self.subscribers.lock().retain(|s| !s.tx.is_closed());
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn subscribe(
        &self,
        _collection: &str,
        filter: Option<&str>,
    ) -> Result<SnapshotStream, RemoteError> {
        if !self.is_online() {
            return Err(RemoteError::Offline("network unreachable".to_string()));
        }

        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        if !self.silent.load(Ordering::SeqCst) {
            let _ = tx.try_send(Ok(self.snapshot(filter)));
        }
        self.subscribers.lock().push(Subscriber {
            filter: filter.map(str::to_string),
            tx,
        });
        Ok(rx)
    }

    async fn write_patch(
        &self,
        _collection: &str,
        id: &str,
        patch: &Value,
    ) -> Result<(), RemoteError> {
        if !self.is_online() {
            return Err(RemoteError::Offline("network unreachable".to_string()));
        }
        let rejection = self.rejections.lock().get(id).cloned();
        if let Some(reason) = rejection {
            return Err(RemoteError::Rejected(reason));
        }

        self.merge(id, patch)
            .map_err(|e| RemoteError::Offline(format!("store unavailable: {}", e)))?;
        self.writes.lock().push((id.to_string(), patch.clone()));
        self.broadcast().await;
        Ok(())
    }
}
