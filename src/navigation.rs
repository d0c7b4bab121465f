//! Live navigation towards a target site.
//!
//! Read-only projection: every GPS fix produces a fresh [`NavigationUpdate`]
//! (distance, bearing, ETA). Nothing here touches route or site state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::FieldOpsError;
use crate::geo;
use crate::types::{Position, Site};

/// One reading from the device's geolocation source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    /// Accuracy radius, metres.
    pub accuracy: f64,
    pub heading: Option<f64>,
    /// Ground speed, m/s.
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }
}

/// Errors reported by a [`PositionProvider`].
#[derive(Debug, Clone, PartialEq)]
pub enum PositionError {
    Denied,
    Unavailable(String),
    /// The provider gave up after this many seconds.
    Timeout(u64),
}

impl From<PositionError> for FieldOpsError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::Denied => FieldOpsError::PositionDenied,
            PositionError::Unavailable(msg) => FieldOpsError::PositionUnavailable(msg),
            PositionError::Timeout(secs) => FieldOpsError::Timeout(secs),
        }
    }
}

pub type FixCallback = Box<dyn Fn(PositionFix) + Send + Sync>;
pub type PositionErrorCallback = Box<dyn Fn(PositionError) + Send + Sync>;

/// Revocable handle for a position watch. Dropping it stops the watch.
pub struct WatchHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Geolocation collaborator (device GPS, browser geolocation, replay file).
pub trait PositionProvider: Send + Sync {
    fn watch(&self, on_fix: FixCallback, on_error: PositionErrorCallback) -> WatchHandle;
}

/// Provider that answers every watch immediately with a fixed result:
/// coordinates typed in by hand, or a recorded error.
pub struct FixedPosition(pub Result<PositionFix, PositionError>);

impl FixedPosition {
    pub fn at(lat: f64, lng: f64, speed: Option<f64>) -> Self {
        Self(Ok(PositionFix {
            lat,
            lng,
            accuracy: 0.0,
            heading: None,
            speed,
            timestamp: Utc::now(),
        }))
    }
}

impl PositionProvider for FixedPosition {
    fn watch(&self, on_fix: FixCallback, on_error: PositionErrorCallback) -> WatchHandle {
        match &self.0 {
            Ok(fix) => on_fix(fix.clone()),
            Err(err) => on_error(err.clone()),
        }
        WatchHandle::new(|| {})
    }
}

/// Read a single fix, giving up after `timeout`.
pub async fn read_position(
    provider: &dyn PositionProvider,
    timeout: Duration,
) -> Result<PositionFix, FieldOpsError> {
    let (tx, rx) = oneshot::channel::<Result<PositionFix, PositionError>>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    let fix_tx = tx.clone();
    let err_tx = tx;
    let handle = provider.watch(
        Box::new(move |fix| {
            if let Some(tx) = fix_tx.lock().take() {
                let _ = tx.send(Ok(fix));
            }
        }),
        Box::new(move |err| {
            if let Some(tx) = err_tx.lock().take() {
                let _ = tx.send(Err(err));
            }
        }),
    );

    let result = tokio::time::timeout(timeout, rx).await;
    handle.cancel();

    match result {
        Ok(Ok(Ok(fix))) => Ok(fix),
        Ok(Ok(Err(err))) => Err(err.into()),
        Ok(Err(_)) => Err(FieldOpsError::PositionUnavailable(
            "position provider closed without a fix".into(),
        )),
        Err(_) => {
            log::warn!("Position read timed out after {:?}", timeout);
            Err(FieldOpsError::Timeout(timeout.as_secs()))
        }
    }
}

/// Projection of the crew's position onto a target site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationUpdate {
    pub target_id: String,
    pub distance_km: f64,
    pub bearing_degrees: f64,
    pub eta_minutes: Option<i64>,
    pub arrived: bool,
    pub fix: PositionFix,
}

/// Compute distance, bearing and ETA from `fix` to `target`.
pub fn project(fix: &PositionFix, target: &Site, arrival_radius_m: f64) -> NavigationUpdate {
    let here = fix.position();
    let distance_km = geo::distance_km(here, target.position);
    let distance_m = distance_km * 1000.0;

    NavigationUpdate {
        target_id: target.id.clone(),
        distance_km,
        bearing_degrees: geo::bearing_degrees(here, target.position),
        eta_minutes: geo::eta_minutes(distance_m, fix.speed),
        arrived: distance_m <= arrival_radius_m,
        fix: fix.clone(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Provider that hands fixes to whoever is watching when `emit` is called.
    #[derive(Default)]
    pub struct ScriptedProvider {
        watchers: Arc<Mutex<Vec<(u64, FixCallback, PositionErrorCallback)>>>,
        next_id: Mutex<u64>,
    }

    impl ScriptedProvider {
        pub fn emit(&self, fix: PositionFix) {
            for (_, on_fix, _) in self.watchers.lock().iter() {
                on_fix(fix.clone());
            }
        }

        pub fn fail(&self, err: PositionError) {
            for (_, _, on_error) in self.watchers.lock().iter() {
                on_error(err.clone());
            }
        }

        pub fn watcher_count(&self) -> usize {
            self.watchers.lock().len()
        }
    }

    impl PositionProvider for ScriptedProvider {
        fn watch(&self, on_fix: FixCallback, on_error: PositionErrorCallback) -> WatchHandle {
            let id = {
                let mut next = self.next_id.lock();
                *next += 1;
                *next
            };
            self.watchers.lock().push((id, on_fix, on_error));
            let watchers = self.watchers.clone();
            WatchHandle::new(move || watchers.lock().retain(|(w, _, _)| *w != id))
        }
    }

    pub fn fix(lat: f64, lng: f64, speed: Option<f64>) -> PositionFix {
        PositionFix {
            lat,
            lng,
            accuracy: 5.0,
            heading: None,
            speed,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::fixtures::site;

    #[test]
    fn test_project_towards_site() {
        let target = site("st-drahonice", 49.202902, 14.063713);
        let update = project(&fix(49.305131, 14.166126, Some(10.0)), &target, 50.0);
        assert!((update.distance_km - 13.6).abs() < 0.5);
        assert!((0.0..360.0).contains(&update.bearing_degrees));
        // ~13 600 m at 10 m/s ≈ 23 min
        let eta = update.eta_minutes.unwrap();
        assert!((20..=25).contains(&eta), "eta {}", eta);
        assert!(!update.arrived);
    }

    #[test]
    fn test_project_without_speed_has_no_eta() {
        let target = site("a", 49.0, 14.0);
        assert_eq!(project(&fix(49.1, 14.0, None), &target, 50.0).eta_minutes, None);
        assert_eq!(
            project(&fix(49.1, 14.0, Some(0.0)), &target, 50.0).eta_minutes,
            None
        );
    }

    #[test]
    fn test_project_arrival() {
        let target = site("a", 49.0, 14.0);
        let update = project(&fix(49.0002, 14.0, Some(1.0)), &target, 50.0);
        assert!(update.arrived);
    }

    #[tokio::test]
    async fn test_read_position_returns_first_fix() {
        let provider = FixedPosition::at(49.0, 14.0, None);
        let got = read_position(&provider, Duration::from_secs(1)).await.unwrap();
        assert_eq!(got.lat, 49.0);
    }

    #[tokio::test]
    async fn test_read_position_maps_denied() {
        let provider = FixedPosition(Err(PositionError::Denied));
        let err = read_position(&provider, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, FieldOpsError::PositionDenied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_position_times_out_and_releases_watch() {
        let provider = ScriptedProvider::default();
        let err = read_position(&provider, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err, FieldOpsError::Timeout(10));
        assert_eq!(provider.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_timeout_maps_like_read_timeout() {
        let provider = FixedPosition(Err(PositionError::Timeout(5)));
        let err = read_position(&provider, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err, FieldOpsError::Timeout(5));
        assert_eq!(FieldOpsError::from(PositionError::Timeout(5)), err);
        assert!(err.is_retryable());
    }
}
