//! Geographic primitives shared by every stage of the pipeline: WGS84
//! point/bounds types, web-mercator tile addressing for the raster tile
//! services, and the meter-per-degree approximations used to size fetch
//! windows.

use serde::{Deserialize, Serialize};

/// Edge length of a slippy-map tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Web-mercator latitude clamp.
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Meters spanned by one degree of latitude.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Axis-aligned geographic window. `north > south` and `east > west`;
/// windows crossing the antimeridian are not representable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn contains(&self, p: LatLng) -> bool {
        p.lat <= self.north && p.lat >= self.south && p.lng <= self.east && p.lng >= self.west
    }

    pub fn center(&self) -> LatLng {
        LatLng {
            lat: (self.north + self.south) / 2.0,
            lng: (self.east + self.west) / 2.0,
        }
    }

    /// Approximate window spanning `width_m` x `height_m` meters around a
    /// center point. Only used to size tile fetches; the authoritative grid
    /// bounds come from the local projection.
    pub fn around(center: LatLng, width_m: f64, height_m: f64) -> Self {
        let lat_span = height_m / METERS_PER_DEGREE_LAT;
        let lng_span = width_m / meters_per_degree_lng(center.lat);
        Self {
            north: center.lat + lat_span / 2.0,
            south: center.lat - lat_span / 2.0,
            east: center.lng + lng_span / 2.0,
            west: center.lng - lng_span / 2.0,
        }
    }
}

pub fn meters_per_degree_lng(lat_deg: f64) -> f64 {
    METERS_PER_DEGREE_LAT * lat_deg.to_radians().cos()
}

/// Project a geographic point into web-mercator pixel space at a zoom level.
pub fn project(lat: f64, lng: f64, zoom: u8) -> (f64, f64) {
    let clamped = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let sin = clamped.to_radians().sin();
    let z = f64::from(TILE_SIZE) * 2_f64.powi(i32::from(zoom));
    let x = z * (lng + 180.0) / 360.0;
    let y = z * (0.5 - 0.25 * ((1.0 + sin) / (1.0 - sin)).ln() / std::f64::consts::PI);
    (x, y)
}

/// Great-circle distance in meters.
pub fn haversine_m(a: LatLng, b: LatLng) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn project_is_monotonic_in_lng() {
        let (x0, _) = project(0.0, -1.0, 15);
        let (x1, _) = project(0.0, 1.0, 15);
        assert!(x1 > x0);
    }

    #[test]
    fn project_greenwich_equator_is_center() {
        let (x, y) = project(0.0, 0.0, 1);
        assert_relative_eq!(x, 256.0);
        assert_relative_eq!(y, 256.0);
    }

    #[test]
    fn bounds_around_is_centered() {
        let center = LatLng::new(40.0, -100.0);
        let b = GeoBounds::around(center, 512.0, 512.0);
        assert_relative_eq!(b.center().lat, center.lat, epsilon = 1e-12);
        assert_relative_eq!(b.center().lng, center.lng, epsilon = 1e-12);
        assert!(b.north > b.south && b.east > b.west);
    }

    #[test]
    fn haversine_one_degree_lat() {
        let d = haversine_m(LatLng::new(0.0, 0.0), LatLng::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0);
    }
}
