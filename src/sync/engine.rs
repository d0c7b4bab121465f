//! Offline-first synchronization against the remote site collection.
//!
//! Connection: disconnected → connecting → subscribed
//!                  ↑______________________________↓ (transport error, watchdog, network lost)
//!
//! The engine owns the local mirror of every site and the queue of local
//! edits not yet confirmed remotely. Local edits are applied to the mirror
//! immediately and dispatched in per-site FIFO order while subscribed.
//! Remote snapshots are merged field by field: fields covered by a live
//! pending write keep their local value, every other field takes the
//! remote value.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::queue::{FailureReason, PendingQueue, PendingWrite};
use super::remote::{RemoteError, RemoteSnapshot, RemoteStore, SnapshotStream};
use super::schema;
use crate::error::{FieldOpsError, SyncErrorPayload};
use crate::events::{EventBus, Subscription};
use crate::persistence::{load_json, save_json, LocalPersistence, SYNC_SCOPE};
use crate::types::{Site, SiteField, SitePatch, SyncConfig};

const MIRROR_KEY: &str = "mirror";
const QUEUE_KEY: &str = "pending_writes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// Result of a local edit that was not refused outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote store accepted the write.
    Confirmed,
    /// Queued; it will be sent once connected.
    Pending,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    ConnectionChanged(ConnectionState),
    /// Another client changed fields of a site.
    ExternalChange {
        site_id: String,
        fields: Vec<SiteField>,
    },
    WriteConfirmed {
        write_id: String,
        site_id: String,
    },
    WriteFailed(PendingWrite),
    Error(SyncErrorPayload),
}

/// Reconnect delay after `failures` consecutive failed attempts.
pub fn backoff_delay(config: &SyncConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(20);
    let delay = config
        .backoff_base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.backoff_max_ms);
    Duration::from_millis(delay)
}

struct EngineState {
    mirror: BTreeMap<String, Site>,
    /// Last state of each site as the remote store holds it.
    remote_base: BTreeMap<String, Site>,
    queue: PendingQueue,
    connection: ConnectionState,
    /// Someone asked for live data and has not released it.
    wanted: bool,
    network_available: bool,
    closed: bool,
    /// Bumped whenever a connection is torn down so stale pumps stop.
    generation: u64,
    reconnect_failures: u32,
    pump_cancel: Option<Arc<Notify>>,
}

impl EngineState {
    fn sites(&self) -> Vec<Site> {
        self.mirror.values().cloned().collect()
    }

    fn cancel_pump(&mut self) {
        if let Some(cancel) = self.pump_cancel.take() {
            cancel.notify_one();
        }
    }
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    persistence: Arc<dyn LocalPersistence>,
    config: SyncConfig,
    state: Mutex<EngineState>,
    updates: EventBus<Vec<Site>>,
    events: EventBus<SyncEvent>,
    wake: Notify,
    shutdown: Notify,
}

/// Cheap-to-clone handle to the sync engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        persistence: Arc<dyn LocalPersistence>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                persistence,
                config,
                state: Mutex::new(EngineState {
                    mirror: BTreeMap::new(),
                    remote_base: BTreeMap::new(),
                    queue: PendingQueue::new(),
                    connection: ConnectionState::Disconnected,
                    wanted: false,
                    network_available: true,
                    closed: false,
                    generation: 0,
                    reconnect_failures: 0,
                    pump_cancel: None,
                }),
                updates: EventBus::new(),
                events: EventBus::new(),
                wake: Notify::new(),
                shutdown: Notify::new(),
            }),
        }
    }

    // =========================================================================
    // Local state
    // =========================================================================

    /// Restore the cached mirror and pending writes from local persistence.
    ///
    /// Returns the number of live pending writes restored.
    pub fn load(&self) -> Result<usize, FieldOpsError> {
        let persistence = self.inner.persistence.as_ref();
        let mirror: Option<Vec<Site>> = load_json(persistence, SYNC_SCOPE, MIRROR_KEY)?;
        let writes: Option<Vec<PendingWrite>> = load_json(persistence, SYNC_SCOPE, QUEUE_KEY)?;

        let mut st = self.inner.state.lock();
        for site in mirror.unwrap_or_default() {
            st.mirror.insert(site.id.clone(), site);
        }
        st.queue = writes.map(PendingQueue::restore).unwrap_or_default();
        let pending = st.queue.pending().len();
        log::info!(
            "Sync engine restored {} sites and {} pending writes",
            st.mirror.len(),
            pending
        );
        Ok(pending)
    }

    /// Insert sites the mirror does not know yet. Known sites are left alone.
    pub fn seed(&self, sites: Vec<Site>) -> usize {
        let (inserted, snapshot) = {
            let mut st = self.inner.state.lock();
            let mut inserted = 0;
            for site in sites {
                if !st.mirror.contains_key(&site.id) {
                    st.mirror.insert(site.id.clone(), site);
                    inserted += 1;
                }
            }
            (inserted, st.sites())
        };

        if inserted > 0 {
            log::info!("Seeded {} sites into the mirror", inserted);
            self.persist_mirror(&snapshot);
            self.inner.updates.emit(&snapshot);
        }
        inserted
    }

    pub fn sites(&self) -> Vec<Site> {
        self.inner.state.lock().sites()
    }

    pub fn site(&self, site_id: &str) -> Option<Site> {
        self.inner.state.lock().mirror.get(site_id).cloned()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock().connection
    }

    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.inner.state.lock().queue.pending()
    }

    pub fn failed_writes(&self) -> Vec<PendingWrite> {
        self.inner.state.lock().queue.failed()
    }

    /// Whether the site shows local edits the remote store has not accepted,
    /// including refused ones still awaiting retry or discard.
    pub fn is_unconfirmed(&self, site_id: &str) -> bool {
        self.inner.state.lock().queue.has_unconfirmed(site_id)
    }

    /// Whether a local edit of the site failed and will not be sent again
    /// unless retried.
    pub fn has_unsaved_change(&self, site_id: &str) -> bool {
        self.inner.state.lock().queue.has_failed(site_id)
    }

    pub fn on_event(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.events.subscribe(listener)
    }

    // =========================================================================
    // Subscription lifecycle
    // =========================================================================

    /// Register for mirror updates and make sure a remote subscription exists.
    ///
    /// `on_update` is called right away with the current mirror (possibly the
    /// cached or seeded copy) and again after every change.
    pub async fn subscribe(
        &self,
        on_update: impl Fn(&Vec<Site>) + Send + Sync + 'static,
    ) -> Subscription {
        on_update(&self.sites());
        let handle = self.inner.updates.subscribe(on_update);

        self.inner.state.lock().wanted = true;
        self.inner.wake.notify_one();

        if let Err(e) = self.connect().await {
            log::warn!("Initial subscription failed, staying offline: {}", e);
        }
        handle
    }

    /// Release every subscription. Safe to call repeatedly.
    pub fn unsubscribe_all(&self) {
        let changed = {
            let mut st = self.inner.state.lock();
            let changed = st.connection != ConnectionState::Disconnected;
            st.wanted = false;
            st.generation += 1;
            st.connection = ConnectionState::Disconnected;
            st.cancel_pump();
            changed
        };

        self.inner.updates.clear();
        if changed {
            log::info!("Released remote subscription");
            self.emit(SyncEvent::ConnectionChanged(ConnectionState::Disconnected));
        }
        self.inner.wake.notify_one();
    }

    /// The device reports loss of connectivity.
    pub fn network_lost(&self) {
        let changed = {
            let mut st = self.inner.state.lock();
            st.network_available = false;
            if st.connection == ConnectionState::Disconnected {
                false
            } else {
                st.generation += 1;
                st.connection = ConnectionState::Disconnected;
                st.cancel_pump();
                true
            }
        };

        if changed {
            log::info!("Network lost, sync paused");
            self.emit(SyncEvent::ConnectionChanged(ConnectionState::Disconnected));
            let err = FieldOpsError::Offline("network lost".to_string());
            self.emit(SyncEvent::Error(SyncErrorPayload::from(&err)));
        }
    }

    /// The device reports connectivity again. Reconnects unless every
    /// subscription has been released.
    pub async fn network_restored(&self) -> Result<(), FieldOpsError> {
        {
            let mut st = self.inner.state.lock();
            st.network_available = true;
            st.reconnect_failures = 0;
        }
        log::info!("Network restored");
        self.inner.wake.notify_one();
        self.connect().await
    }

    /// Stop for good: releases subscriptions and ends the retry timer.
    pub fn close(&self) {
        self.unsubscribe_all();
        self.inner.state.lock().closed = true;
        self.inner.shutdown.notify_one();
    }

    async fn connect(&self) -> Result<(), FieldOpsError> {
        let (generation, cancel) = {
            let mut st = self.inner.state.lock();
            if !st.wanted || st.closed || st.connection != ConnectionState::Disconnected {
                return Ok(());
            }
            st.generation += 1;
            st.connection = ConnectionState::Connecting;
            let cancel = Arc::new(Notify::new());
            st.pump_cancel = Some(cancel.clone());
            (st.generation, cancel)
        };
        self.emit(SyncEvent::ConnectionChanged(ConnectionState::Connecting));
        log::info!("Subscribing to '{}'", self.inner.config.collection);

        match self
            .inner
            .remote
            .subscribe(&self.inner.config.collection, None)
            .await
        {
            Ok(stream) => {
                tokio::spawn(self.clone().pump(stream, generation, cancel));
                Ok(())
            }
            Err(e) => {
                let err = FieldOpsError::from(e);
                self.connection_lost(generation, err.clone());
                Err(err)
            }
        }
    }

    /// Reads one subscription's snapshots in delivery order.
    async fn pump(self, mut stream: SnapshotStream, generation: u64, cancel: Arc<Notify>) {
        let watchdog_secs = self.inner.config.watchdog_secs;
        let first = tokio::select! {
            _ = cancel.notified() => return,
            first = tokio::time::timeout(Duration::from_secs(watchdog_secs), stream.recv()) => first,
        };

        match first {
            Ok(Some(Ok(snapshot))) => {
                if !self.mark_subscribed(generation) {
                    return;
                }
                self.apply_snapshot(snapshot);

                let engine = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.flush().await {
                        log::debug!("Flush after subscribe skipped: {}", e);
                    }
                });
            }
            Ok(Some(Err(e))) => {
                self.connection_lost(generation, e.into());
                return;
            }
            Ok(None) => {
                self.connection_lost(
                    generation,
                    FieldOpsError::Offline("snapshot stream closed".to_string()),
                );
                return;
            }
            Err(_) => {
                log::warn!("No initial snapshot within {}s", watchdog_secs);
                self.connection_lost(generation, FieldOpsError::Timeout(watchdog_secs));
                return;
            }
        }

        loop {
            tokio::select! {
                _ = cancel.notified() => break,
                next = stream.recv() => match next {
                    Some(Ok(snapshot)) => {
                        if !self.is_current(generation) {
                            break;
                        }
                        self.apply_snapshot(snapshot);
                    }
                    Some(Err(e)) => {
                        self.connection_lost(generation, e.into());
                        break;
                    }
                    None => {
                        self.connection_lost(
                            generation,
                            FieldOpsError::Offline("snapshot stream closed".to_string()),
                        );
                        break;
                    }
                },
            }
        }
        log::debug!("Snapshot pump {} stopped", generation);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.state.lock().generation == generation
    }

    fn mark_subscribed(&self, generation: u64) -> bool {
        {
            let mut st = self.inner.state.lock();
            if st.generation != generation || st.connection != ConnectionState::Connecting {
                return false;
            }
            st.connection = ConnectionState::Subscribed;
            st.reconnect_failures = 0;
        }
        log::info!("Subscribed to '{}'", self.inner.config.collection);
        self.emit(SyncEvent::ConnectionChanged(ConnectionState::Subscribed));
        true
    }

    /// Tear down the connection identified by `generation`. Stale generations are ignored.
    fn connection_lost(&self, generation: u64, err: FieldOpsError) {
        {
            let mut st = self.inner.state.lock();
            if st.generation != generation || st.connection == ConnectionState::Disconnected {
                return;
            }
            st.connection = ConnectionState::Disconnected;
            st.reconnect_failures += 1;
            st.cancel_pump();
        }
        log::warn!("Sync connection lost: {}", err);
        self.emit(SyncEvent::ConnectionChanged(ConnectionState::Disconnected));
        self.emit(SyncEvent::Error(SyncErrorPayload::from(&err)));
        self.inner.wake.notify_one();
    }

    fn drop_current_connection(&self, err: FieldOpsError) {
        let generation = self.inner.state.lock().generation;
        self.connection_lost(generation, err);
    }

    // =========================================================================
    // Remote → local
    // =========================================================================

    fn apply_snapshot(&self, snapshot: RemoteSnapshot) {
        let mut events = Vec::new();
        let mut invalid = Vec::new();

        let (sites, queue_changed) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let mut queue_changed = false;

            for doc in &snapshot.documents {
                let remote = match schema::normalize_document(&doc.id, &doc.data) {
                    Ok(site) => site,
                    Err(e) => {
                        invalid.push((doc.id.clone(), e));
                        continue;
                    }
                };

                // Echo of our own dispatched write.
                let echo = st
                    .queue
                    .head_for(&remote.id)
                    .filter(|w| w.attempt >= 1 && w.patch.matches(&remote))
                    .map(|w| w.id.clone());
                if let Some(write_id) = echo {
                    st.queue.remove(&write_id);
                    queue_changed = true;
                    log::debug!("Write {} confirmed by echo", write_id);
                    events.push(SyncEvent::WriteConfirmed {
                        write_id,
                        site_id: remote.id.clone(),
                    });
                }

                st.remote_base.insert(remote.id.clone(), remote.clone());

                let covered = st.queue.covered_fields(&remote.id);
                if let Some(local) = st.mirror.get_mut(&remote.id) {
                    let changed: Vec<SiteField> = SiteField::ALL
                        .iter()
                        .copied()
                        .filter(|f| !covered.contains(f) && f.differs(&remote, local))
                        .collect();
                    for field in &changed {
                        field.copy(&remote, local);
                    }
                    if !changed.is_empty() {
                        events.push(SyncEvent::ExternalChange {
                            site_id: remote.id.clone(),
                            fields: changed,
                        });
                    }
                } else {
                    let mut site = remote;
                    let site_id = site.id.clone();
                    for write in st
                        .queue
                        .all()
                        .iter()
                        .filter(|w| w.target_id == site_id && !w.is_failed())
                    {
                        write.patch.apply_to(&mut site);
                    }
                    st.mirror.insert(site.id.clone(), site);
                }
            }

            (st.sites(), queue_changed)
        };

        log::debug!(
            "Applied snapshot of {} documents{}",
            snapshot.documents.len(),
            if snapshot.from_cache { " (cached)" } else { "" }
        );

        self.persist_mirror(&sites);
        if queue_changed {
            self.persist_queue();
        }
        for (id, err) in invalid {
            log::warn!("Skipping remote document {}: {}", id, err);
            self.emit(SyncEvent::Error(SyncErrorPayload::for_site(&err, Some(&id))));
        }
        for event in events {
            self.emit(event);
        }
        self.inner.updates.emit(&sites);
    }

    // =========================================================================
    // Local → remote
    // =========================================================================

    /// Apply an edit optimistically and queue it for the remote store.
    pub async fn apply_local_edit(
        &self,
        site_id: &str,
        patch: SitePatch,
    ) -> Result<WriteOutcome, FieldOpsError> {
        patch
            .validate()
            .map_err(|reason| FieldOpsError::InvalidDocument {
                id: site_id.to_string(),
                reason,
            })?;

        let (write_id, sites, subscribed) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let site = st
                .mirror
                .get_mut(site_id)
                .ok_or_else(|| FieldOpsError::NotFound(site_id.to_string()))?;
            if patch.is_empty() {
                return Ok(WriteOutcome::Confirmed);
            }
            patch.apply_to(site);
            let write_id = st.queue.push(site_id, patch, Utc::now());
            (
                write_id,
                st.sites(),
                st.connection == ConnectionState::Subscribed,
            )
        };

        self.persist_mirror(&sites);
        self.persist_queue();
        self.inner.updates.emit(&sites);

        if !subscribed {
            log::info!("Queued write {} for {} until reconnected", write_id, site_id);
            return Ok(WriteOutcome::Pending);
        }

        self.dispatch_site(site_id).await;
        self.outcome(&write_id)
    }

    fn outcome(&self, write_id: &str) -> Result<WriteOutcome, FieldOpsError> {
        let st = self.inner.state.lock();
        match st.queue.get(write_id) {
            None => Ok(WriteOutcome::Confirmed),
            Some(write) => match write.failure() {
                Some(err) => Err(err),
                None => Ok(WriteOutcome::Pending),
            },
        }
    }

    /// Send every site's queued head write. Returns the number confirmed.
    pub async fn flush(&self) -> Result<usize, FieldOpsError> {
        let sites = {
            let st = self.inner.state.lock();
            if st.connection != ConnectionState::Subscribed {
                return Err(FieldOpsError::Offline("not subscribed".to_string()));
            }
            st.queue.dispatchable_sites()
        };

        let mut confirmed = 0;
        for site_id in sites {
            confirmed += self.dispatch_site(&site_id).await;
        }
        if confirmed > 0 {
            log::info!("Flushed {} pending writes", confirmed);
        }
        Ok(confirmed)
    }

    /// Dispatch a site's writes head first until its queue drains, a write
    /// is already in flight, or the connection drops.
    async fn dispatch_site(&self, site_id: &str) -> usize {
        let mut confirmed = 0;
        loop {
            let claimed = {
                let mut st = self.inner.state.lock();
                if st.connection == ConnectionState::Subscribed {
                    st.queue.claim_head(site_id)
                } else {
                    None
                }
            };
            let Some(write) = claimed else {
                break;
            };
            self.persist_queue();

            let body = match schema::encode_patch(&write.patch) {
                Ok(body) => body,
                Err(e) => {
                    self.fail_write(&write, FailureReason::Rejected(e.to_string()));
                    continue;
                }
            };

            log::debug!(
                "Dispatching write {} for {} (attempt {})",
                write.id,
                write.target_id,
                write.attempt
            );
            let result = self
                .inner
                .remote
                .write_patch(&self.inner.config.collection, &write.target_id, &body)
                .await;

            match result {
                Ok(()) => {
                    self.confirm_write(&write);
                    confirmed += 1;
                }
                Err(RemoteError::Rejected(reason)) => {
                    self.fail_write(&write, FailureReason::Rejected(reason));
                }
                Err(RemoteError::Offline(reason)) => {
                    self.write_offline(&write, reason);
                    break;
                }
            }
        }
        confirmed
    }

    fn confirm_write(&self, write: &PendingWrite) {
        // The echo may have cleared it already.
        let removed = {
            let mut st = self.inner.state.lock();
            if let Some(base) = st.remote_base.get_mut(&write.target_id) {
                write.patch.apply_to(base);
            }
            st.queue.remove(&write.id).is_some()
        };
        if removed {
            self.persist_queue();
            log::info!("Write {} for {} confirmed", write.id, write.target_id);
            self.emit(SyncEvent::WriteConfirmed {
                write_id: write.id.clone(),
                site_id: write.target_id.clone(),
            });
        }
    }

    fn fail_write(&self, write: &PendingWrite, reason: FailureReason) {
        let failed = self.inner.state.lock().queue.fail(&write.id, reason);
        self.persist_queue();

        if let Some(failed) = failed {
            if let Some(err) = failed.failure() {
                log::warn!("Write {} for {} failed: {}", failed.id, failed.target_id, err);
                self.emit(SyncEvent::Error(SyncErrorPayload::for_site(
                    &err,
                    Some(&failed.target_id),
                )));
            }
            self.emit(SyncEvent::WriteFailed(failed));
        }
    }

    fn write_offline(&self, write: &PendingWrite, reason: String) {
        self.inner.state.lock().queue.requeue(&write.id);
        if write.attempt >= self.inner.config.max_attempts {
            self.fail_write(write, FailureReason::RetriesExhausted);
        } else {
            self.persist_queue();
        }
        self.drop_current_connection(FieldOpsError::Offline(reason));
    }

    /// Re-arm a failed write. It is re-applied locally and queued behind the
    /// site's newer writes.
    pub async fn retry_failed(&self, write_id: &str) -> Result<WriteOutcome, FieldOpsError> {
        let (write, sites, subscribed) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let write = st
                .queue
                .retry(write_id)
                .ok_or_else(|| FieldOpsError::NotFound(write_id.to_string()))?;
            if let Some(site) = st.mirror.get_mut(&write.target_id) {
                write.patch.apply_to(site);
            }
            (
                write,
                st.sites(),
                st.connection == ConnectionState::Subscribed,
            )
        };

        log::info!("Retrying write {} for {}", write.id, write.target_id);
        self.persist_mirror(&sites);
        self.persist_queue();
        self.inner.updates.emit(&sites);

        if !subscribed {
            return Ok(WriteOutcome::Pending);
        }
        self.dispatch_site(&write.target_id).await;
        self.outcome(&write.id)
    }

    /// Drop a failed write and put the remote value back into the mirror
    /// for every field no live write still covers. Without a known remote
    /// state the next snapshot restores it.
    pub fn discard_failed(&self, write_id: &str) -> Result<PendingWrite, FieldOpsError> {
        let (removed, reverted) = {
            let mut guard = self.inner.state.lock();
            let st = &mut *guard;
            let removed = match st.queue.get(write_id) {
                Some(write) if write.is_failed() => st.queue.remove(write_id),
                _ => None,
            };

            let mut reverted = None;
            if let Some(write) = &removed {
                let covered = st.queue.covered_fields(&write.target_id);
                let base = st.remote_base.get(&write.target_id);
                if let (Some(base), Some(local)) = (base, st.mirror.get_mut(&write.target_id)) {
                    for field in write.patch.fields() {
                        if !covered.contains(&field) {
                            field.copy(base, local);
                        }
                    }
                    reverted = Some(st.sites());
                }
            }
            (removed, reverted)
        };
        let write = removed.ok_or_else(|| FieldOpsError::NotFound(write_id.to_string()))?;
        self.persist_queue();
        if let Some(sites) = reverted {
            self.persist_mirror(&sites);
            self.inner.updates.emit(&sites);
        }
        log::info!("Discarded failed write {} for {}", write.id, write.target_id);
        Ok(write)
    }

    // =========================================================================
    // Retry timer
    // =========================================================================

    /// Reconnect with exponential backoff while a subscription is wanted and
    /// the network is available. Runs until [`SyncEngine::close`].
    pub async fn run_retry_timer(self) {
        log::info!("Sync retry timer started");
        loop {
            let next = {
                let st = self.inner.state.lock();
                if st.closed {
                    break;
                }
                if st.wanted && st.network_available && st.connection == ConnectionState::Disconnected
                {
                    Some(backoff_delay(&self.inner.config, st.reconnect_failures.max(1)))
                } else {
                    None
                }
            };

            match next {
                Some(delay) => {
                    log::debug!("Reconnecting in {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            if let Err(e) = self.connect().await {
                                log::debug!("Reconnect attempt failed: {}", e);
                            }
                        }
                        _ = self.inner.shutdown.notified() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.inner.wake.notified() => {}
                        _ = self.inner.shutdown.notified() => {}
                    }
                }
            }
        }
        log::info!("Sync retry timer stopped");
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn emit(&self, event: SyncEvent) {
        self.inner.events.emit(&event);
    }

    fn persist_mirror(&self, sites: &[Site]) {
        if let Err(e) = save_json(self.inner.persistence.as_ref(), SYNC_SCOPE, MIRROR_KEY, &sites)
        {
            log::warn!("Failed to persist site mirror: {}", e);
        }
    }

    fn persist_queue(&self) {
        let writes = self.inner.state.lock().queue.all().to_vec();
        if let Err(e) = save_json(self.inner.persistence.as_ref(), SYNC_SCOPE, QUEUE_KEY, &writes)
        {
            log::warn!("Failed to persist pending writes: {}", e);
        }
    }
}
