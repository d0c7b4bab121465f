//! Distance, bearing and ETA on WGS84 coordinates (pure math, no I/O).
//!
//! Public functions take and return degrees; radians stay internal.

use crate::types::Position;

/// Mean Earth radius, km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points using the haversine formula.
pub fn distance_km(a: Position, b: Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_KM * c
}

/// Initial compass heading from `a` towards `b`, in [0, 360).
pub fn bearing_degrees(a: Position, b: Position) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs.
    if bearing >= 360.0 {
        0.0
    } else {
        bearing
    }
}

/// Minutes to cover `distance_m` at `speed_mps`, rounded to the nearest minute.
///
/// Returns `None` when the speed is unknown, zero, negative or not finite.
pub fn eta_minutes(distance_m: f64, speed_mps: Option<f64>) -> Option<i64> {
    let speed = speed_mps?;
    if !speed.is_finite() || speed <= 0.0 || !distance_m.is_finite() {
        return None;
    }
    Some((distance_m.max(0.0) / speed / 60.0).round() as i64)
}

/// Human-readable compass point for a bearing ("N", "NE", ...).
pub fn compass_point(bearing: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let idx = ((bearing.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    POINTS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    const AMERIKA_II: Position = Position {
        lat: 49.305131,
        lng: 14.166126,
    };
    const DRAHONICE: Position = Position {
        lat: 49.202902,
        lng: 14.063713,
    };

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance_km(AMERIKA_II, AMERIKA_II), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let ab = distance_km(AMERIKA_II, DRAHONICE);
        let ba = distance_km(DRAHONICE, AMERIKA_II);
        assert!((ab - ba).abs() < 1e-9, "{} vs {}", ab, ba);
    }

    #[test]
    fn test_known_site_distance() {
        let d = distance_km(AMERIKA_II, DRAHONICE);
        assert!((d - 13.7).abs() <= 0.5, "expected ~13.7 km, got {}", d);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance_km(Position::new(0.0, 0.0), Position::new(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.05, "got {}", d);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = Position::new(49.0, 14.0);
        let north = bearing_degrees(origin, Position::new(50.0, 14.0));
        let east = bearing_degrees(Position::new(0.0, 0.0), Position::new(0.0, 1.0));
        let south = bearing_degrees(origin, Position::new(48.0, 14.0));
        let west = bearing_degrees(Position::new(0.0, 1.0), Position::new(0.0, 0.0));
        assert!(north.abs() < 1e-6, "north {}", north);
        assert!((east - 90.0).abs() < 1e-6, "east {}", east);
        assert!((south - 180.0).abs() < 1e-6, "south {}", south);
        assert!((west - 270.0).abs() < 1e-6, "west {}", west);
    }

    #[test]
    fn test_bearing_range() {
        let b = bearing_degrees(AMERIKA_II, DRAHONICE);
        assert!((0.0..360.0).contains(&b));
        // Drahonice lies south-west of Amerika II.
        assert_eq!(compass_point(b), "SW");
    }

    #[test]
    fn test_eta_without_speed_is_none() {
        assert_eq!(eta_minutes(1000.0, None), None);
        assert_eq!(eta_minutes(1000.0, Some(0.0)), None);
        assert_eq!(eta_minutes(1000.0, Some(-2.0)), None);
        assert_eq!(eta_minutes(1000.0, Some(f64::NAN)), None);
    }

    #[test]
    fn test_eta_rounds_to_nearest_minute() {
        // 1000 m at 10 m/s = 100 s = 1.67 min
        assert_eq!(eta_minutes(1000.0, Some(10.0)), Some(2));
        // 1200 m at 20 m/s = 60 s
        assert_eq!(eta_minutes(1200.0, Some(20.0)), Some(1));
        assert_eq!(eta_minutes(0.0, Some(5.0)), Some(0));
    }
}
