// Routes service: plan editing against the current site mirror.
// Plans carry ids only, so every call recomputes statistics from the
// sites as they are now.

use chrono::{DateTime, Utc};

use crate::error::FieldOpsError;
use crate::route::RoutePlan;
use crate::services::sites::{prioritized_sites, SiteFilter};
use crate::state::AppState;

pub fn build_route(state: &AppState, site_ids: &[String]) -> Result<RoutePlan, FieldOpsError> {
    state.planner.build(site_ids, &state.sync.sites())
}

pub fn optimize_route(state: &AppState, plan: &RoutePlan) -> Result<RoutePlan, FieldOpsError> {
    state.planner.optimize(plan, &state.sync.sites())
}

pub fn reorder_route(
    state: &AppState,
    plan: &RoutePlan,
    from: usize,
    to: usize,
) -> Result<RoutePlan, FieldOpsError> {
    state.planner.reorder(plan, from, to, &state.sync.sites())
}

pub fn add_stop(
    state: &AppState,
    plan: &RoutePlan,
    site_id: &str,
) -> Result<RoutePlan, FieldOpsError> {
    state.planner.add_stop(plan, site_id, &state.sync.sites())
}

pub fn remove_stop(
    state: &AppState,
    plan: &RoutePlan,
    index: usize,
) -> Result<RoutePlan, FieldOpsError> {
    state.planner.remove_stop(plan, index, &state.sync.sites())
}

/// Recompute a plan's statistics after sites changed underneath it.
pub fn refresh_route(state: &AppState, plan: &RoutePlan) -> Result<RoutePlan, FieldOpsError> {
    state
        .planner
        .recompute(plan.stops.clone(), &state.sync.sites())
}

/// Draft a day's route: the `limit` most urgent open sites matching `filter`,
/// optimized from the most urgent one.
pub fn suggest_route(
    state: &AppState,
    filter: &SiteFilter,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<RoutePlan, FieldOpsError> {
    let open = SiteFilter {
        completed: Some(false),
        ..filter.clone()
    };
    let ids: Vec<String> = prioritized_sites(state, &open, now)
        .into_iter()
        .take(limit)
        .map(|view| view.site.id)
        .collect();

    let draft = build_route(state, &ids)?;
    log::debug!("Suggested route over {} sites", draft.len());
    optimize_route(state, &draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::testing::ScriptedProvider;
    use crate::persistence::MemoryStore;
    use crate::sync::InMemoryRemote;
    use crate::types::{Config, SitePatch};
    use std::sync::Arc;

    fn state() -> AppState {
        let state = AppState::new(
            Config::default(),
            Arc::new(InMemoryRemote::new()),
            Arc::new(MemoryStore::new()),
            Arc::new(ScriptedProvider::default()),
        );
        state.sync.seed(crate::seed::seed_sites().unwrap());
        state
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_two_stop_route_costs() {
        let state = state();
        let plan = build_route(&state, &ids(&["pi-amerika-ii", "st-drahonice"])).unwrap();

        let stats = &plan.stats;
        assert!((stats.total_distance_km - 13.6).abs() < 0.5);
        // 13.6 km / 8 km/h + (3303 + 5953) m² / 4000 m²/h
        assert!((stats.total_time_hours - 4.01).abs() < 0.1, "{}", stats.total_time_hours);
        assert!((stats.fuel_liters - 14.05).abs() < 0.3, "{}", stats.fuel_liters);
    }

    #[test]
    fn test_reorder_and_remove() {
        let state = state();
        let plan = build_route(
            &state,
            &ids(&["cb-uv-plav", "pi-amerika-ii", "st-drahonice"]),
        )
        .unwrap();

        let moved = reorder_route(&state, &plan, 2, 0).unwrap();
        assert_eq!(moved.stops, ids(&["st-drahonice", "cb-uv-plav", "pi-amerika-ii"]));
        assert!(matches!(
            reorder_route(&state, &plan, 3, 0),
            Err(FieldOpsError::OutOfRange { index: 3, len: 3 })
        ));

        let shorter = remove_stop(&state, &moved, 1).unwrap();
        assert_eq!(shorter.stops, ids(&["st-drahonice", "pi-amerika-ii"]));
        let longer = add_stop(&state, &shorter, "cb-uv-plav").unwrap();
        assert_eq!(longer.len(), 3);
    }

    #[test]
    fn test_unknown_site_is_not_found() {
        let state = state();
        assert_eq!(
            build_route(&state, &ids(&["nope"])).unwrap_err(),
            FieldOpsError::NotFound("nope".into())
        );
    }

    #[tokio::test]
    async fn test_refresh_follows_site_edits() {
        let state = state();
        let plan = build_route(&state, &ids(&["pi-amerika-ii"])).unwrap();
        state
            .sync
            .apply_local_edit(
                "pi-amerika-ii",
                SitePatch {
                    area_sqm: Some(8000.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let refreshed = refresh_route(&state, &plan).unwrap();
        assert!((refreshed.stats.work_hours - 2.0).abs() < 1e-9);
        assert!(refreshed.stats.work_hours > plan.stats.work_hours);
    }

    #[test]
    fn test_suggest_route_takes_open_urgent_sites() {
        let state = state();
        let plan = suggest_route(&state, &SiteFilter::default(), 4, Utc::now()).unwrap();
        assert_eq!(plan.len(), 4);
        let sites = state.sync.sites();
        for stop in &plan.stops {
            let site = sites.iter().find(|s| &s.id == stop).unwrap();
            assert!(!site.is_completed);
        }
    }
}
