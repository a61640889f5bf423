//! Coordinate projections.
//!
//! The whole pipeline measures in a single local tangent-plane projection: a
//! transverse Mercator centered on the requested point, 1 unit = 1 meter.
//! Terrain resampling, feature placement, and texture rasterization all go
//! through the same [`LocalProjection`] so their outputs line up exactly.
//!
//! GeoTIFF tiles arrive in whatever CRS their producer chose; definitions for
//! those are resolved by EPSG code through [`ProjRegistry`], fetched from a
//! projection-definition service on first use and cached for the process
//! lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::geo::LatLng;

pub const WGS84_DEF: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Local transverse-Mercator plane centered on a geographic point.
/// `forward` yields meters east/north of the center; `inverse` goes back.
pub struct LocalProjection {
    wgs84: Proj,
    local: Proj,
    center: LatLng,
}

impl LocalProjection {
    pub fn new(center: LatLng) -> Result<Self> {
        let def = format!(
            "+proj=tmerc +lat_0={} +lon_0={} +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs",
            center.lat, center.lng
        );
        Ok(Self {
            wgs84: Proj::from_proj_string(WGS84_DEF)?,
            local: Proj::from_proj_string(&def)?,
            center,
        })
    }

    pub fn center(&self) -> LatLng {
        self.center
    }

    /// Geographic point to local meters (x east, y north).
    pub fn forward(&self, p: LatLng) -> Result<(f64, f64)> {
        let mut pt = (p.lng.to_radians(), p.lat.to_radians(), 0.0);
        transform(&self.wgs84, &self.local, &mut pt)?;
        Ok((pt.0, pt.1))
    }

    /// Local meters back to a geographic point.
    pub fn inverse(&self, x: f64, y: f64) -> Result<LatLng> {
        let mut pt = (x, y, 0.0);
        transform(&self.local, &self.wgs84, &mut pt)?;
        Ok(LatLng {
            lat: pt.1.to_degrees(),
            lng: pt.0.to_degrees(),
        })
    }
}

/// Process-lifetime cache of EPSG code -> parsed projection definition.
#[derive(Default)]
pub struct ProjRegistry {
    defs: Mutex<HashMap<u32, Arc<Proj>>>,
}

impl ProjRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a projection, fetching `{base}/{code}.proj4` on a cache miss.
    pub async fn resolve(
        &self,
        code: u32,
        client: &reqwest::Client,
        base: &str,
    ) -> Result<Arc<Proj>> {
        {
            let defs = self.defs.lock().await;
            if let Some(proj) = defs.get(&code) {
                return Ok(proj.clone());
            }
        }

        debug!("fetching proj4 definition for EPSG:{code}");
        let url = format!("{base}/{code}.proj4");
        let response = client.get(&url).send().await?;
        if !response.status().is_success() {
            warn!("failed to fetch projection definition for EPSG:{code}");
            return Err(Error::ProjDefinition(code));
        }
        let def = response.text().await?;
        let proj = Arc::new(Proj::from_proj_string(def.trim())?);
        self.defs.lock().await.insert(code, proj.clone());
        Ok(proj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoBounds;
    use approx::assert_relative_eq;

    #[test]
    fn forward_at_center_is_origin() {
        let center = LatLng::new(47.3769, 8.5417);
        let proj = LocalProjection::new(center).unwrap();
        let (x, y) = proj.forward(center).unwrap();
        assert_relative_eq!(x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn corner_round_trip() {
        let bounds = GeoBounds {
            north: 40.01,
            south: 39.99,
            east: -99.98,
            west: -100.02,
        };
        let proj = LocalProjection::new(bounds.center()).unwrap();
        let corners = [
            LatLng::new(bounds.north, bounds.west),
            LatLng::new(bounds.north, bounds.east),
            LatLng::new(bounds.south, bounds.west),
            LatLng::new(bounds.south, bounds.east),
        ];
        for corner in corners {
            let (x, y) = proj.forward(corner).unwrap();
            let back = proj.inverse(x, y).unwrap();
            assert_relative_eq!(back.lat, corner.lat, epsilon = 1e-9);
            assert_relative_eq!(back.lng, corner.lng, epsilon = 1e-9);
        }
    }

    #[test]
    fn one_meter_north_is_one_meter() {
        let center = LatLng::new(40.0, -100.0);
        let proj = LocalProjection::new(center).unwrap();
        let north = proj.inverse(0.0, 1.0).unwrap();
        let d = crate::geo::haversine_m(center, north);
        assert!((d - 1.0).abs() < 0.01, "expected ~1m, got {d}");
    }
}
