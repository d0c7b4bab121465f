//! End-to-end behaviour of the app over a real SQLite store: offline edits,
//! restarts and maintenance recording.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use fieldops::db::SqliteStore;
use fieldops::navigation::{FixedPosition, PositionError};
use fieldops::persistence::LocalPersistence;
use fieldops::seed::seed_documents;
use fieldops::services::sites::{self, SiteFilter};
use fieldops::state::AppState;
use fieldops::sync::{ConnectionState, InMemoryRemote, WriteOutcome};
use fieldops::types::Config;

const PLAV: &str = "cb-uv-plav";

fn seeded_remote() -> Arc<InMemoryRemote> {
    Arc::new(InMemoryRemote::with_documents(seed_documents().unwrap()))
}

fn app(remote: &Arc<InMemoryRemote>, db_path: &Path) -> AppState {
    let store = SqliteStore::open_at(db_path.to_path_buf()).unwrap();
    AppState::new(
        Config::default(),
        remote.clone(),
        Arc::new(store),
        Arc::new(FixedPosition(Err(PositionError::Denied))),
    )
}

async fn settle(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn test_offline_edit_survives_restart_and_syncs_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldops.db");
    let remote = seeded_remote();
    remote.set_online(false);

    {
        let state = app(&remote, &db_path);
        let report = state.initialize().await.unwrap();
        assert_eq!(report.seeded_sites, 13);
        assert_eq!(state.sync.connection_state(), ConnectionState::Disconnected);

        let outcome = sites::toggle_completion(&state, PLAV).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Pending);
        assert!(state.sync.site(PLAV).unwrap().is_completed);
        state.shutdown();
    }
    assert_eq!(remote.write_count(), 0);

    remote.set_online(true);
    let state = app(&remote, &db_path);
    let report = state.initialize().await.unwrap();
    assert_eq!(report.restored_writes, 1);
    assert_eq!(report.seeded_sites, 0);
    assert!(state.sync.site(PLAV).unwrap().is_completed);

    assert!(settle(|| state.sync.pending_writes().is_empty()).await);
    assert_eq!(remote.write_count(), 1);
    assert_eq!(remote.document(PLAV).unwrap()["is_completed"], json!(true));
    assert!(!state.sync.is_unconfirmed(PLAV));
    state.shutdown();
}

#[tokio::test]
async fn test_maintenance_lowers_risk_and_is_kept_in_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldops.db");
    let remote = seeded_remote();

    let state = app(&remote, &db_path);
    state.initialize().await.unwrap();
    assert!(settle(|| state.sync.connection_state() == ConnectionState::Subscribed).await);

    let score_of = |state: &AppState| {
        sites::current_sites(state, &SiteFilter::default(), Utc::now())
            .into_iter()
            .find(|v| v.site.id == PLAV)
            .map(|v| v.risk.score)
            .unwrap()
    };
    let before = score_of(&state);

    let (entry, _outcome) = sites::record_maintenance(&state, PLAV, "Novák", Some("sečení"))
        .await
        .unwrap();
    assert_eq!(entry.site_id, PLAV);

    let site = state.sync.site(PLAV).unwrap();
    assert!(site.is_completed);
    assert!(site.last_maintenance_at.is_some());
    assert!(score_of(&state) < before);
    assert_eq!(state.ledger.stats(Utc::now()).total_entries, 1);
    state.shutdown();

    let restarted = app(&remote, &db_path);
    let report = restarted.initialize().await.unwrap();
    assert_eq!(report.ledger_entries, 1);
    assert_eq!(restarted.ledger.entries_for(PLAV)[0].worker, "Novák");
    restarted.shutdown();
}

#[tokio::test]
async fn test_remote_change_reaches_site_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let remote = seeded_remote();
    let state = app(&remote, &dir.path().join("fieldops.db"));

    let names = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = names.clone();
    let _sub = state.on_sites_changed(move |sites| {
        if let Some(site) = sites.iter().find(|s| s.id == PLAV) {
            sink.lock().push(site.name.clone());
        }
    });

    state.initialize().await.unwrap();
    assert!(settle(|| state.sync.connection_state() == ConnectionState::Subscribed).await);

    remote.put_fields(PLAV, &json!({"name": "ÚV Plav (nová)"})).await;
    assert!(settle(|| state.sync.site(PLAV).unwrap().name == "ÚV Plav (nová)").await);
    assert!(names.lock().iter().any(|n| n == "ÚV Plav (nová)"));
    state.shutdown();
}

/// Wires the app the way the `fieldops` binary does: one SQLite file backs
/// both local state and the stand-in remote collection.
async fn cli_like_app(db_path: &Path) -> AppState {
    let store: Arc<dyn LocalPersistence> =
        Arc::new(SqliteStore::open_at(db_path.to_path_buf()).unwrap());
    let remote = Arc::new(
        InMemoryRemote::persistent(store.clone(), seed_documents().unwrap()).unwrap(),
    );
    let state = AppState::new(
        Config::default(),
        remote,
        store,
        Arc::new(FixedPosition(Err(PositionError::Denied))),
    );
    state.initialize().await.unwrap();
    assert!(settle(|| state.sync.connection_state() == ConnectionState::Subscribed).await);
    state
}

#[tokio::test]
async fn test_confirmed_edit_survives_restart_of_local_remote() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldops.db");

    {
        let state = cli_like_app(&db_path).await;
        let outcome = sites::toggle_completion(&state, PLAV).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Confirmed);
        assert!(state.sync.site(PLAV).unwrap().is_completed);
        state.shutdown();
    }

    let state = cli_like_app(&db_path).await;
    assert!(state.sync.site(PLAV).unwrap().is_completed);
    assert!(!state.sync.is_unconfirmed(PLAV));
    state.shutdown();
}
