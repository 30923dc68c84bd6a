//! Geodesy primitives: great-circle distance, forward azimuth and the
//! web-mercator tile projection. All functions are pure; angles are radians,
//! distances kilometers.

use std::f64::consts::PI;

/// Mean Earth radius in kilometers (spherical approximation).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two lat/lon pairs (degrees), in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Initial (forward-azimuth) bearing of the segment from point 1 to point 2,
/// in radians. 0 is north, positive clockwise toward east.
pub fn initial_bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x)
}

/// Absolute angle between two bearings, normalized into [0, π].
pub fn turn_angle(b1: f64, b2: f64) -> f64 {
    let diff = (b2 - b1 + PI).rem_euclid(2.0 * PI) - PI;
    diff.abs()
}

/// Project lat/lon (degrees) into fractional tile coordinates at `zoom`.
///
/// The integer parts address a tile in the standard web-map scheme; the
/// fractional parts locate the point inside that tile. Multiply by the tile
/// pixel size to get world pixel coordinates.
pub fn tile_coords(lat: f64, lon: f64, zoom: u32) -> (f64, f64) {
    let lat_rad = lat.to_radians();
    let n = f64::from(2u32).powi(zoom as i32);
    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_one_degree_latitude() {
        // One degree of latitude on the spherical model: pi * R / 180.
        let d = haversine_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - PI * EARTH_RADIUS_KM / 180.0).abs() < 1e-9, "{d}");
    }

    #[test]
    fn haversine_is_symmetric_and_zero_on_identity() {
        let d1 = haversine_km(48.8584, 2.2945, 51.5007, -0.1246);
        let d2 = haversine_km(51.5007, -0.1246, 48.8584, 2.2945);
        assert!((d1 - d2).abs() < 1e-12);
        // Paris -> London on the spherical model is ~340.5 km.
        assert!((d1 - 340.5).abs() < 1.0, "{d1}");
        assert_eq!(haversine_km(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let north = initial_bearing(0.0, 0.0, 1.0, 0.0);
        assert!(north.abs() < 1e-9);
        let east = initial_bearing(0.0, 0.0, 0.0, 1.0);
        assert!((east - PI / 2.0).abs() < 1e-9);
        let south = initial_bearing(1.0, 0.0, 0.0, 0.0);
        assert!((south.abs() - PI).abs() < 1e-9);
    }

    #[test]
    fn turn_angle_wraps_around() {
        // 350 deg -> 10 deg is a 20 deg turn, not 340.
        let b1 = 350.0_f64.to_radians();
        let b2 = 10.0_f64.to_radians();
        assert!((turn_angle(b1, b2) - 20.0_f64.to_radians()).abs() < 1e-9);
        assert!((turn_angle(0.0, PI) - PI).abs() < 1e-9);
    }

    #[test]
    fn tile_coords_at_origin() {
        // Lat/lon 0,0 sits at the center of the tile grid at every zoom.
        let (x, y) = tile_coords(0.0, 0.0, 1);
        assert!((x - 1.0).abs() < 1e-12);
        assert!((y - 1.0).abs() < 1e-12);

        let (x, y) = tile_coords(0.0, 0.0, 15);
        assert!((x - 16384.0).abs() < 1e-9);
        assert!((y - 16384.0).abs() < 1e-9);
    }

    #[test]
    fn tile_coords_monotonic_in_lon_and_lat() {
        let (x1, y1) = tile_coords(10.0, 10.0, 12);
        let (x2, y2) = tile_coords(11.0, 11.0, 12);
        assert!(x2 > x1);
        // Higher latitude means smaller y in the web-map scheme.
        assert!(y2 < y1);
    }
}
