//! Crew route planning: visiting order and cost estimate for a set of sites.
//!
//! A [`RoutePlan`] only holds site ids. Positions and areas are resolved from
//! the current site list every time the plan is recomputed, so a plan can
//! never drift from the sites it references.

use serde::Serialize;

use crate::error::FieldOpsError;
use crate::geo;
use crate::types::{Position, RouteTuning, Site};

/// Derived cost of executing a route.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStats {
    pub total_distance_km: f64,
    pub driving_hours: f64,
    pub work_hours: f64,
    pub total_time_hours: f64,
    pub fuel_liters: f64,
    /// Distance of each consecutive leg, km (N-1 entries).
    pub legs: Vec<f64>,
}

/// Ordered visiting sequence plus its cost. Transient, per user session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub stops: Vec<String>,
    pub stats: RouteStats,
}

impl RoutePlan {
    pub fn len(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

/// Visiting order over `points` by nearest neighbour, as indices into `points`.
///
/// Starts from the first point as given. Ties go to the earliest point in
/// input order.
pub fn nearest_neighbor_order(points: &[Position]) -> Vec<usize> {
    if points.len() <= 1 {
        return (0..points.len()).collect();
    }

    let mut order = Vec::with_capacity(points.len());
    let mut visited = vec![false; points.len()];
    order.push(0);
    visited[0] = true;

    while order.len() < points.len() {
        let current = points[order[order.len() - 1]];
        let mut best: Option<(usize, f64)> = None;
        for (idx, &candidate) in points.iter().enumerate() {
            if visited[idx] {
                continue;
            }
            let d = geo::distance_km(current, candidate);
            // Strict less-than keeps the first candidate on ties.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((idx, d));
            }
        }
        match best {
            Some((idx, _)) => {
                visited[idx] = true;
                order.push(idx);
            }
            None => break,
        }
    }

    order
}

/// Reorder sites into a nearest-neighbour visiting sequence.
pub fn optimize<'a>(sites: &[&'a Site]) -> Vec<&'a Site> {
    let points: Vec<Position> = sites.iter().map(|s| s.position).collect();
    nearest_neighbor_order(&points)
        .into_iter()
        .map(|i| sites[i])
        .collect()
}

/// Sum of consecutive-pair distances over an ordered sequence.
pub fn path_distance_km(points: &[Position]) -> f64 {
    points
        .windows(2)
        .map(|pair| geo::distance_km(pair[0], pair[1]))
        .sum()
}

/// Cost of visiting `ordered` in the given order.
pub fn stats(ordered: &[&Site], tuning: &RouteTuning) -> RouteStats {
    let legs: Vec<f64> = ordered
        .windows(2)
        .map(|pair| geo::distance_km(pair[0].position, pair[1].position))
        .collect();
    let total_distance_km: f64 = legs.iter().sum();

    let driving_hours = if tuning.average_speed_kmh > 0.0 {
        total_distance_km / tuning.average_speed_kmh
    } else {
        0.0
    };
    let work_hours = if tuning.throughput_sqm_per_hour > 0.0 {
        ordered.iter().map(|s| s.area_sqm.max(0.0)).sum::<f64>() / tuning.throughput_sqm_per_hour
    } else {
        0.0
    };
    let total_time_hours = driving_hours + work_hours;

    RouteStats {
        total_distance_km,
        driving_hours,
        work_hours,
        total_time_hours,
        fuel_liters: total_time_hours * tuning.fuel_liters_per_hour,
        legs,
    }
}

/// Move the element at `from` to `to`, keeping every other relative order.
pub fn move_index<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), FieldOpsError> {
    let len = items.len();
    if from >= len {
        return Err(FieldOpsError::OutOfRange { index: from, len });
    }
    if to >= len {
        return Err(FieldOpsError::OutOfRange { index: to, len });
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

/// Plan operations bound to a set of tuning constants.
#[derive(Debug, Clone, Default)]
pub struct RoutePlanner {
    tuning: RouteTuning,
}

impl RoutePlanner {
    pub fn new(tuning: RouteTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &RouteTuning {
        &self.tuning
    }

    /// Build a plan over `site_ids` in the given order. Duplicate ids are dropped.
    pub fn build(&self, site_ids: &[String], sites: &[Site]) -> Result<RoutePlan, FieldOpsError> {
        let mut stops: Vec<String> = Vec::with_capacity(site_ids.len());
        for id in site_ids {
            if !stops.contains(id) {
                stops.push(id.clone());
            }
        }
        self.recompute(stops, sites)
    }

    /// Re-order the plan by nearest neighbour from its current first stop.
    pub fn optimize(&self, plan: &RoutePlan, sites: &[Site]) -> Result<RoutePlan, FieldOpsError> {
        let resolved = resolve(&plan.stops, sites)?;
        let ordered = optimize(&resolved);
        let stops = ordered.iter().map(|s| s.id.clone()).collect();
        log::debug!(
            "Route optimized: {} stops, {:.2} km -> {:.2} km",
            plan.len(),
            plan.stats.total_distance_km,
            stats(&ordered, &self.tuning).total_distance_km
        );
        self.recompute(stops, sites)
    }

    /// Manual override: move one stop to a new position.
    pub fn reorder(
        &self,
        plan: &RoutePlan,
        from: usize,
        to: usize,
        sites: &[Site],
    ) -> Result<RoutePlan, FieldOpsError> {
        let mut stops = plan.stops.clone();
        move_index(&mut stops, from, to)?;
        self.recompute(stops, sites)
    }

    /// Append a stop. Adding a site already in the plan is a no-op.
    pub fn add_stop(
        &self,
        plan: &RoutePlan,
        site_id: &str,
        sites: &[Site],
    ) -> Result<RoutePlan, FieldOpsError> {
        let mut stops = plan.stops.clone();
        if !stops.iter().any(|s| s == site_id) {
            stops.push(site_id.to_string());
        }
        self.recompute(stops, sites)
    }

    pub fn remove_stop(
        &self,
        plan: &RoutePlan,
        index: usize,
        sites: &[Site],
    ) -> Result<RoutePlan, FieldOpsError> {
        if index >= plan.len() {
            return Err(FieldOpsError::OutOfRange {
                index,
                len: plan.len(),
            });
        }
        let mut stops = plan.stops.clone();
        stops.remove(index);
        self.recompute(stops, sites)
    }

    /// Recompute statistics for `stops` against the current site list.
    pub fn recompute(&self, stops: Vec<String>, sites: &[Site]) -> Result<RoutePlan, FieldOpsError> {
        let resolved = resolve(&stops, sites)?;
        let stats = stats(&resolved, &self.tuning);
        Ok(RoutePlan { stops, stats })
    }
}

/// Look up every stop id, failing on the first unknown one.
fn resolve<'a>(stops: &[String], sites: &'a [Site]) -> Result<Vec<&'a Site>, FieldOpsError> {
    stops
        .iter()
        .map(|id| {
            sites
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| FieldOpsError::NotFound(id.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::site;

    fn ids(sites: &[&Site]) -> Vec<String> {
        sites.iter().map(|s| s.id.clone()).collect()
    }

    fn stop_ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_optimize_empty_and_single() {
        let empty: Vec<&Site> = Vec::new();
        assert!(optimize(&empty).is_empty());

        let x = site("x", 49.0, 14.0);
        let single = optimize(&[&x]);
        assert_eq!(ids(&single), vec!["x"]);
    }

    #[test]
    fn test_optimize_starts_from_first_input() {
        let a = site("a", 49.00, 14.00);
        let b = site("b", 49.30, 14.00);
        let c = site("c", 49.10, 14.00);
        let d = site("d", 49.20, 14.00);
        let ordered = optimize(&[&a, &b, &c, &d]);
        assert_eq!(ids(&ordered), vec!["a", "c", "d", "b"]);
    }

    #[test]
    fn test_optimize_ties_go_to_input_order() {
        // Offsets of exactly half a degree give bit-identical distances.
        let origin = site("o", 49.0, 14.0);
        let north = site("n", 49.5, 14.0);
        let south = site("s", 48.5, 14.0);
        let ordered = optimize(&[&origin, &north, &south]);
        assert_eq!(ids(&ordered), vec!["o", "n", "s"]);

        let ordered = optimize(&[&origin, &south, &north]);
        assert_eq!(ids(&ordered), vec!["o", "s", "n"]);
    }

    #[test]
    fn test_optimize_does_not_lengthen_clustered_route() {
        // Zig-zag order across a small cluster near Písek.
        let sites = vec![
            site("1", 49.30, 14.15),
            site("2", 49.36, 14.22),
            site("3", 49.31, 14.16),
            site("4", 49.35, 14.21),
            site("5", 49.32, 14.17),
            site("6", 49.34, 14.20),
        ];
        let refs: Vec<&Site> = sites.iter().collect();
        let original: Vec<Position> = refs.iter().map(|s| s.position).collect();
        let optimized: Vec<Position> = optimize(&refs).iter().map(|s| s.position).collect();
        assert!(path_distance_km(&optimized) <= path_distance_km(&original));
    }

    #[test]
    fn test_stats_is_sum_of_legs() {
        let sites = [
            site("a", 49.0, 14.0),
            site("b", 49.1, 14.0),
            site("c", 49.1, 14.1),
            site("d", 49.0, 14.1),
        ];
        let refs: Vec<&Site> = sites.iter().collect();
        let s = stats(&refs, &RouteTuning::default());

        let expected = geo::distance_km(sites[0].position, sites[1].position)
            + geo::distance_km(sites[1].position, sites[2].position)
            + geo::distance_km(sites[2].position, sites[3].position);
        assert_eq!(s.legs.len(), 3);
        assert!((s.total_distance_km - expected).abs() < 1e-9);
        assert!((s.legs.iter().sum::<f64>() - s.total_distance_km).abs() < 1e-9);
    }

    #[test]
    fn test_stats_for_trivial_routes() {
        let tuning = RouteTuning::default();
        let empty = stats(&[], &tuning);
        assert_eq!(empty.total_distance_km, 0.0);
        assert_eq!(empty.fuel_liters, 0.0);

        let mut a = site("a", 49.0, 14.0);
        a.area_sqm = 4000.0;
        let one = stats(&[&a], &tuning);
        assert_eq!(one.total_distance_km, 0.0);
        assert!((one.work_hours - 1.0).abs() < 1e-9);
        assert!((one.fuel_liters - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_two_stop_cost_estimate() {
        let mut amerika = site("pi-amerika-ii", 49.305131, 14.166126);
        amerika.area_sqm = 3303.0;
        let mut drahonice = site("st-drahonice", 49.202902, 14.063713);
        drahonice.area_sqm = 5953.0;

        let s = stats(&[&amerika, &drahonice], &RouteTuning::default());
        assert!((s.work_hours - 9256.0 / 4000.0).abs() < 1e-9);
        assert!((s.driving_hours - s.total_distance_km / 8.0).abs() < 1e-9);
        assert!((s.total_time_hours - 4.03).abs() < 0.1, "{}", s.total_time_hours);
        assert!((s.fuel_liters - 14.1).abs() < 0.3, "{}", s.fuel_liters);
        assert!((s.fuel_liters - s.total_time_hours * 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_custom_tuning() {
        let tuning = RouteTuning {
            average_speed_kmh: 40.0,
            throughput_sqm_per_hour: 2000.0,
            fuel_liters_per_hour: 2.0,
        };
        let mut a = site("a", 49.0, 14.0);
        a.area_sqm = 2000.0;
        let s = stats(&[&a], &tuning);
        assert!((s.total_time_hours - 1.0).abs() < 1e-9);
        assert!((s.fuel_liters - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reorder_moves_one_stop() {
        let sites = vec![
            site("a", 49.0, 14.0),
            site("b", 49.1, 14.0),
            site("c", 49.2, 14.0),
            site("d", 49.3, 14.0),
        ];
        let planner = RoutePlanner::default();
        let plan = planner
            .build(&stop_ids(&["a", "b", "c", "d"]), &sites)
            .unwrap();

        let moved = planner.reorder(&plan, 0, 2, &sites).unwrap();
        assert_eq!(moved.stops, stop_ids(&["b", "c", "a", "d"]));

        let moved = planner.reorder(&plan, 3, 0, &sites).unwrap();
        assert_eq!(moved.stops, stop_ids(&["d", "a", "b", "c"]));
        assert!(moved.stats.total_distance_km > plan.stats.total_distance_km);
    }

    #[test]
    fn test_reorder_rejects_out_of_range() {
        let sites = vec![site("a", 49.0, 14.0), site("b", 49.1, 14.0)];
        let planner = RoutePlanner::default();
        let plan = planner.build(&stop_ids(&["a", "b"]), &sites).unwrap();

        assert_eq!(
            planner.reorder(&plan, 2, 0, &sites),
            Err(FieldOpsError::OutOfRange { index: 2, len: 2 })
        );
        assert_eq!(
            planner.reorder(&plan, 0, 5, &sites),
            Err(FieldOpsError::OutOfRange { index: 5, len: 2 })
        );
    }

    #[test]
    fn test_build_unknown_site_is_not_found() {
        let sites = vec![site("a", 49.0, 14.0)];
        let planner = RoutePlanner::default();
        let err = planner
            .build(&stop_ids(&["a", "missing"]), &sites)
            .unwrap_err();
        assert_eq!(err, FieldOpsError::NotFound("missing".into()));
    }

    #[test]
    fn test_build_drops_duplicates_and_edit_stops() {
        let sites = vec![
            site("a", 49.0, 14.0),
            site("b", 49.1, 14.0),
            site("c", 49.2, 14.0),
        ];
        let planner = RoutePlanner::default();
        let plan = planner.build(&stop_ids(&["a", "b", "a"]), &sites).unwrap();
        assert_eq!(plan.stops, stop_ids(&["a", "b"]));

        let plan = planner.add_stop(&plan, "c", &sites).unwrap();
        assert_eq!(plan.len(), 3);
        let plan = planner.remove_stop(&plan, 1, &sites).unwrap();
        assert_eq!(plan.stops, stop_ids(&["a", "c"]));
        assert!(planner.remove_stop(&plan, 2, &sites).is_err());
    }

    #[test]
    fn test_optimize_plan_keeps_first_stop() {
        let sites = vec![
            site("a", 49.0, 14.0),
            site("far", 49.5, 14.0),
            site("near", 49.05, 14.0),
        ];
        let planner = RoutePlanner::default();
        let plan = planner
            .build(&stop_ids(&["a", "far", "near"]), &sites)
            .unwrap();
        let optimized = planner.optimize(&plan, &sites).unwrap();
        assert_eq!(optimized.stops, stop_ids(&["a", "near", "far"]));
        assert!(optimized.stats.total_distance_km < plan.stats.total_distance_km);
    }
}
