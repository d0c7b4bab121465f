// Navigation service: wires the position provider to the navigation feed.

use std::time::Duration;

use crate::error::{FieldOpsError, SyncErrorPayload};
use crate::navigation::{project, read_position, PositionFix, WatchHandle};
use crate::state::AppState;

/// A live navigation towards one site. Dropping it stops the GPS watch.
pub struct NavigationSession {
    pub target_id: String,
    watch: WatchHandle,
}

impl NavigationSession {
    pub fn stop(self) {
        log::debug!("Navigation to {} stopped", self.target_id);
        self.watch.cancel();
    }
}

/// Start projecting every fix onto `target_id`; updates go to
/// `on_navigation_update`, provider errors to `on_sync_error`.
pub fn start_navigation(
    state: &AppState,
    target_id: &str,
) -> Result<NavigationSession, FieldOpsError> {
    let target = state
        .sync
        .site(target_id)
        .ok_or_else(|| FieldOpsError::NotFound(target_id.to_string()))?;
    let radius = state.config.navigation.arrival_radius_m;

    let updates = state.navigation_updates.clone();
    let errors = state.sync_errors.clone();
    let error_site = target.id.clone();

    let watch = state.position.watch(
        Box::new(move |fix| {
            let update = project(&fix, &target, radius);
            if update.arrived {
                log::info!("Arrived at {}", update.target_id);
            }
            updates.emit(&update);
        }),
        Box::new(move |err| {
            let err = FieldOpsError::from(err);
            log::warn!("Position error while navigating to {}: {}", error_site, err);
            errors.emit(&SyncErrorPayload::for_site(&err, Some(&error_site)));
        }),
    );

    log::info!("Navigating to {}", target_id);
    Ok(NavigationSession {
        target_id: target_id.to_string(),
        watch,
    })
}

/// One position read bounded by the configured timeout.
pub async fn locate(state: &AppState) -> Result<PositionFix, FieldOpsError> {
    let timeout = Duration::from_secs(state.config.navigation.position_timeout_secs);
    read_position(state.position.as_ref(), timeout).await
}
