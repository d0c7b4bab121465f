//! Composition root.
//!
//! Every component is constructed here with its collaborators passed in
//! explicitly. `initialize()` restores local state, seeds an empty mirror and
//! opens the remote subscription; `shutdown()` releases everything.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::error::{FieldOpsError, SyncErrorPayload};
use crate::events::{EventBus, Subscription};
use crate::ledger::OperationsLedger;
use crate::navigation::{NavigationUpdate, PositionProvider};
use crate::persistence::LocalPersistence;
use crate::route::RoutePlanner;
use crate::sync::{RemoteStore, SyncEngine, SyncEvent};
use crate::types::{Config, Site};

/// What `initialize()` found and did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitReport {
    pub restored_writes: usize,
    pub ledger_entries: usize,
    pub seeded_sites: usize,
}

pub struct AppState {
    pub config: Config,
    pub sync: SyncEngine,
    pub ledger: Arc<OperationsLedger>,
    pub planner: RoutePlanner,
    pub position: Arc<dyn PositionProvider>,
    pub(crate) sites_changed: Arc<EventBus<Vec<Site>>>,
    pub(crate) sync_errors: Arc<EventBus<SyncErrorPayload>>,
    pub(crate) navigation_updates: Arc<EventBus<NavigationUpdate>>,
    wiring: Mutex<Vec<Subscription>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteStore>,
        persistence: Arc<dyn LocalPersistence>,
        position: Arc<dyn PositionProvider>,
    ) -> Self {
        let sync = SyncEngine::new(remote, persistence.clone(), config.sync.clone());
        let ledger = Arc::new(OperationsLedger::new(persistence));
        let planner = RoutePlanner::new(config.route);

        Self {
            config,
            sync,
            ledger,
            planner,
            position,
            sites_changed: Arc::new(EventBus::new()),
            sync_errors: Arc::new(EventBus::new()),
            navigation_updates: Arc::new(EventBus::new()),
            wiring: Mutex::new(Vec::new()),
            retry_task: Mutex::new(None),
        }
    }

    /// Restore local state, seed an empty mirror, then go live.
    ///
    /// Never fails on connectivity: without a network the app starts from
    /// the cached or seeded mirror and reconnects in the background.
    pub async fn initialize(&self) -> Result<InitReport, FieldOpsError> {
        let restored_writes = self.sync.load()?;
        let ledger_entries = self.ledger.load_all()?;

        let seeded_sites = if self.sync.sites().is_empty() {
            self.sync.seed(crate::seed::seed_sites()?)
        } else {
            0
        };

        let errors = self.sync_errors.clone();
        let error_wiring = self.sync.on_event(move |event| {
            if let SyncEvent::Error(payload) = event {
                errors.emit(payload);
            }
        });

        let sites_changed = self.sites_changed.clone();
        let ledger = self.ledger.clone();
        let update_wiring = self
            .sync
            .subscribe(move |sites| {
                let merged = crate::services::sites::with_ledger_status(sites, &ledger);
                sites_changed.emit(&merged);
            })
            .await;

        {
            let mut wiring = self.wiring.lock();
            wiring.push(error_wiring);
            wiring.push(update_wiring);
        }

        let timer = tokio::spawn(self.sync.clone().run_retry_timer());
        if let Some(previous) = self.retry_task.lock().replace(timer) {
            previous.abort();
        }

        let report = InitReport {
            restored_writes,
            ledger_entries,
            seeded_sites,
        };
        log::info!(
            "Initialized: {} sites, {} restored writes, {} ledger entries",
            self.sync.sites().len(),
            report.restored_writes,
            report.ledger_entries
        );
        Ok(report)
    }

    /// Release subscriptions and stop background work. Idempotent.
    pub fn shutdown(&self) {
        self.sync.close();
        self.wiring.lock().clear();
        // The timer exits on its own once the engine is closed.
        drop(self.retry_task.lock().take());
        self.sites_changed.clear();
        self.sync_errors.clear();
        self.navigation_updates.clear();
        log::info!("Shut down");
    }

    pub fn on_sites_changed(
        &self,
        listener: impl Fn(&Vec<Site>) + Send + Sync + 'static,
    ) -> Subscription {
        self.sites_changed.subscribe(listener)
    }

    pub fn on_sync_error(
        &self,
        listener: impl Fn(&SyncErrorPayload) + Send + Sync + 'static,
    ) -> Subscription {
        self.sync_errors.subscribe(listener)
    }

    pub fn on_navigation_update(
        &self,
        listener: impl Fn(&NavigationUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.navigation_updates.subscribe(listener)
    }
}

/// Path of the configuration file: `~/.fieldops/config.json`.
pub fn config_path() -> Result<PathBuf, FieldOpsError> {
    let home = dirs::home_dir()
        .ok_or_else(|| FieldOpsError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".fieldops").join("config.json"))
}

/// Load the configuration. A missing file yields the defaults.
pub fn load_config() -> Result<Config, FieldOpsError> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config, FieldOpsError> {
    if !path.exists() {
        log::debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| FieldOpsError::Config(format!("Failed to read config: {}", e)))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| FieldOpsError::Config(format!("Failed to parse config: {}", e)))?;

    if config.route.average_speed_kmh <= 0.0 || config.route.throughput_sqm_per_hour <= 0.0 {
        return Err(FieldOpsError::Config(
            "route speed and throughput must be positive".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::testing::ScriptedProvider;
    use crate::persistence::MemoryStore;
    use crate::sync::{ConnectionState, InMemoryRemote};
    use std::time::Duration;

    fn app(remote: Arc<InMemoryRemote>) -> AppState {
        AppState::new(
            Config::default(),
            remote,
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedProvider::default()),
        )
    }

    #[tokio::test]
    async fn test_initialize_offline_starts_from_seed() {
        let remote = Arc::new(InMemoryRemote::new());
        remote.set_online(false);
        let state = app(remote);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _errors = state.on_sync_error(move |p| sink.lock().push(p.clone()));

        let report = state.initialize().await.unwrap();
        assert_eq!(report.seeded_sites, 13);
        assert_eq!(state.sync.sites().len(), 13);
        assert_eq!(state.sync.connection_state(), ConnectionState::Disconnected);
        assert!(!errors.lock().is_empty());

        state.shutdown();
        state.shutdown();
    }

    #[tokio::test]
    async fn test_initialize_online_goes_live() {
        let docs = crate::seed::seed_documents().unwrap();
        let remote = Arc::new(InMemoryRemote::with_documents(docs));
        let state = app(remote);

        let changes = Arc::new(Mutex::new(0usize));
        let sink = changes.clone();
        let _changes = state.on_sites_changed(move |_| *sink.lock() += 1);

        state.initialize().await.unwrap();
        for _ in 0..200 {
            if state.sync.connection_state() == ConnectionState::Subscribed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(state.sync.connection_state(), ConnectionState::Subscribed);
        assert!(*changes.lock() >= 1);
        state.shutdown();
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.sync.max_attempts, 5);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(FieldOpsError::Config(_))));

        fs::write(&path, r#"{"route":{"averageSpeedKmh":0}}"#).unwrap();
        assert!(matches!(load_config_from(&path), Err(FieldOpsError::Config(_))));
    }
}
