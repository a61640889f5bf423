//! GeoTIFF elevation tiles.
//!
//! Parses a downloaded GeoTIFF into an [`ElevationTile`]: the first raster
//! band widened to `f32`, the affine pixel grid from the ModelTiepoint and
//! ModelPixelScale tags, and a CRS converter resolved from the embedded
//! geo-keys. Sampling is bilinear and refuses to interpolate across no-data
//! cells.

use std::io::Cursor;
use std::sync::Arc;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::LatLng;
use crate::grid::NO_DATA;
use crate::proj::{ProjRegistry, WGS84_DEF};

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_GEOGRAPHIC_TYPE: u32 = 2048;
const KEY_PROJECTED_CS_TYPE: u32 = 3072;
const EPSG_WGS84: u32 = 4326;

/// Geographic -> tile-CRS converter.
pub enum CrsTransform {
    /// Tile coordinates are plain WGS84 degrees (lng, lat).
    Geographic,
    /// Tile coordinates live in a projected CRS.
    Projected { wgs84: Proj, projected: Arc<Proj> },
}

impl CrsTransform {
    fn forward(&self, p: LatLng) -> Option<(f64, f64)> {
        match self {
            CrsTransform::Geographic => Some((p.lng, p.lat)),
            CrsTransform::Projected { wgs84, projected } => {
                let mut pt = (p.lng.to_radians(), p.lat.to_radians(), 0.0);
                transform(wgs84, projected, &mut pt).ok()?;
                Some((pt.0, pt.1))
            }
        }
    }
}

/// A decoded elevation raster with geographic point sampling.
pub struct ElevationTile {
    pub raster: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub res_x: f64,
    pub res_y: f64,
    pub no_data: f32,
    pub crs: CrsTransform,
}

impl ElevationTile {
    /// Sample the tile at a geographic point. `None` when the point is
    /// outside the tile or any interpolation neighbor is no-data.
    pub fn sample(&self, p: LatLng) -> Option<f32> {
        let (tx, ty) = self.crs.forward(p)?;
        let px = (tx - self.origin_x) / self.res_x;
        let py = (ty - self.origin_y) / self.res_y;
        if px < 0.0
            || px >= (self.width - 1) as f64
            || py < 0.0
            || py >= (self.height - 1) as f64
        {
            return None;
        }
        self.bilinear(px, py)
    }

    fn bilinear(&self, x: f64, y: f64) -> Option<f32> {
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let dx = (x - x0 as f64) as f32;
        let dy = (y - y0 as f64) as f32;

        let i00 = y0 * self.width + x0;
        let i10 = i00 + 1;
        let i01 = i00 + self.width;
        let i11 = i01 + 1;
        if i11 >= self.raster.len() {
            return None;
        }

        let h00 = self.raster[i00];
        let h10 = self.raster[i10];
        let h01 = self.raster[i01];
        let h11 = self.raster[i11];
        if h00 == self.no_data || h10 == self.no_data || h01 == self.no_data || h11 == self.no_data
        {
            return None;
        }

        Some((1.0 - dy) * ((1.0 - dx) * h00 + dx * h10) + dy * ((1.0 - dx) * h01 + dx * h11))
    }
}

/// Parse a GeoTIFF byte buffer, resolving its CRS through the registry.
pub async fn parse_elevation_tile(
    bytes: &[u8],
    registry: &ProjRegistry,
    client: &reqwest::Client,
    proj_def_base: &str,
) -> Result<ElevationTile> {
    use tiff::decoder::{Decoder, DecodingResult};
    use tiff::tags::Tag;

    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let scale = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(TAG_MODEL_TIEPOINT))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(crate::error::Error::Geotiff("truncated georeferencing tags"));
    }
    let (origin_x, origin_y) = (tiepoint[3], tiepoint[4]);
    // Row direction is top-down, so the Y resolution is negative.
    let (res_x, res_y) = (scale[0], -scale[1]);

    let no_data = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f32>().ok())
        .unwrap_or(NO_DATA);

    let epsg = decoder
        .get_tag_u32_vec(Tag::Unknown(TAG_GEO_KEY_DIRECTORY))
        .ok()
        .and_then(|dir| epsg_from_geo_keys(&dir));

    let crs = match epsg {
        None => {
            // Common in web-served GeoTIFFs; assume geographic WGS84.
            warn!("no EPSG code in GeoTIFF geo-keys, assuming WGS84 lat/lon");
            CrsTransform::Geographic
        }
        Some(EPSG_WGS84) => CrsTransform::Geographic,
        Some(code) => {
            debug!("resolving GeoTIFF CRS EPSG:{code}");
            let projected = registry.resolve(code, client, proj_def_base).await?;
            CrsTransform::Projected {
                wgs84: Proj::from_proj_string(WGS84_DEF)?,
                projected,
            }
        }
    };

    let raster: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|s| s as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|s| s as f32).collect(),
    };

    Ok(ElevationTile {
        raster,
        width,
        height,
        origin_x,
        origin_y,
        res_x,
        res_y,
        no_data,
        crs,
    })
}

/// Pull an EPSG code out of a GeoKeyDirectory array. Entries are quads of
/// `(key, location, count, value)`; a location of 0 stores the value inline.
/// The projected CS key wins over the geographic one when both are present.
fn epsg_from_geo_keys(directory: &[u32]) -> Option<u32> {
    let mut geographic = None;
    let mut projected = None;
    for entry in directory[4..].chunks_exact(4) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 {
            continue;
        }
        match key {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value),
            KEY_PROJECTED_CS_TYPE => projected = Some(value),
            _ => {}
        }
    }
    projected.or(geographic)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn degree_tile(raster: Vec<f32>, width: usize, height: usize, no_data: f32) -> ElevationTile {
        // One-degree tile anchored at (50N, 4E), north-up.
        ElevationTile {
            raster,
            width,
            height,
            origin_x: 4.0,
            origin_y: 51.0,
            res_x: 1.0 / width as f64,
            res_y: -1.0 / height as f64,
            no_data,
            crs: CrsTransform::Geographic,
        }
    }

    #[test]
    fn sample_outside_tile_is_none() {
        let tile = degree_tile(vec![1.0; 16], 4, 4, NO_DATA);
        assert!(tile.sample(LatLng::new(10.0, 10.0)).is_none());
    }

    #[test]
    fn sample_inside_tile() {
        let tile = degree_tile(vec![7.5; 16], 4, 4, NO_DATA);
        let v = tile.sample(LatLng::new(50.5, 4.5)).unwrap();
        assert_eq!(v, 7.5);
    }

    #[test]
    fn no_data_neighbor_rejects_interpolation() {
        let mut raster = vec![5.0; 16];
        raster[2 * 4 + 2] = -1.0;
        let tile = degree_tile(raster, 4, 4, -1.0);
        // A query whose 2x2 neighborhood touches the poisoned cell.
        let p = LatLng::new(51.0 - 1.6 / 4.0, 4.0 + 1.6 / 4.0);
        assert!(tile.sample(p).is_none());
    }

    #[test]
    fn geo_key_directory_prefers_projected() {
        let dir = [
            1, 1, 0, 3, // header
            KEY_GEOGRAPHIC_TYPE, 0, 1, 4326,
            KEY_PROJECTED_CS_TYPE, 0, 1, 26915,
            3076, 0, 1, 9001,
        ];
        assert_eq!(epsg_from_geo_keys(&dir), Some(26915));
    }

    #[test]
    fn geo_key_directory_geographic_fallback() {
        let dir = [1, 1, 0, 1, KEY_GEOGRAPHIC_TYPE, 0, 1, 4326];
        assert_eq!(epsg_from_geo_keys(&dir), Some(4326));
    }
}
