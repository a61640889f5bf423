//! Pipeline orchestration: one terrain request in, one [`TerrainData`] out.
//!
//! The stages run in a fixed order: source selection and raster fetch,
//! metric resampling, feature fetch, then texture synthesis. Every optional
//! sub-source degrades to a fallback instead of failing the request; the
//! global elevation tiles are always fetched, so elevation can never be
//! entirely absent.

use tracing::{info, warn};

use crate::error::Result;
use crate::geo::{GeoBounds, LatLng};
use crate::grid::{ColorGrid, HeightGrid};
use crate::osm::{self, OsmFeature};
use crate::proj::{LocalProjection, ProjRegistry};
use crate::resample;
use crate::sources::{self, SourceConfig};
use crate::texture;

/// A single terrain request. `resolution` is both the output grid size in
/// cells and the extent in meters (1 cell = 1 meter).
#[derive(Debug, Clone)]
pub struct TerrainRequest {
    pub center: LatLng,
    pub resolution: usize,
    pub include_features: bool,
    pub use_usgs: bool,
    pub use_gpxz: bool,
    pub gpxz_api_key: Option<String>,
}

impl TerrainRequest {
    pub fn new(center: LatLng, resolution: usize) -> Self {
        Self {
            center,
            resolution,
            include_features: false,
            use_usgs: false,
            use_gpxz: false,
            gpxz_api_key: None,
        }
    }
}

/// The long-lived aggregate produced by a pipeline run. Everything the
/// geometry builder and texture synthesizer need, owned in one place.
#[derive(Debug, Clone)]
pub struct TerrainData {
    pub height_map: HeightGrid,
    pub bounds: GeoBounds,
    pub min_height: f32,
    pub max_height: f32,
    /// JPEG-encoded satellite resample.
    pub satellite_texture: Option<Vec<u8>>,
    pub features: Vec<OsmFeature>,
    /// PNG-encoded vector-style texture.
    pub vector_texture: Option<Vec<u8>>,
    /// PNG-encoded satellite/vector hybrid texture.
    pub hybrid_texture: Option<Vec<u8>>,
    /// Set when USGS data was requested and applicable but unavailable.
    pub usgs_fallback: bool,
}

pub struct Pipeline {
    client: reqwest::Client,
    config: SourceConfig,
    registry: ProjRegistry,
}

impl Pipeline {
    pub fn new(config: SourceConfig) -> Result<Self> {
        Ok(Self {
            client: sources::http_client()?,
            config,
            registry: ProjRegistry::new(),
        })
    }

    /// Probe the USGS catalog for availability.
    pub async fn check_usgs_status(&self) -> bool {
        sources::check_usgs_status(&self.client, &self.config).await
    }

    /// Run the full acquisition-and-synthesis pipeline. The progress
    /// callback is advisory and fire-and-forget.
    pub async fn fetch_terrain(
        &self,
        request: &TerrainRequest,
        progress: impl Fn(&str),
    ) -> Result<TerrainData> {
        let width = request.resolution;
        let height = request.resolution;

        progress("Calculating metric bounds...");
        let fetch_bounds =
            GeoBounds::around(request.center, width as f64, height as f64);

        // High-resolution sources, first success wins.
        let mut raw_tiles = Vec::new();
        let mut usgs_fallback = false;

        if request.use_gpxz
            && let Some(key) = request.gpxz_api_key.as_deref()
            && !key.is_empty()
        {
            progress("Fetching high-res GPXZ elevation data...");
            if let Some(tiles) =
                sources::fetch_gpxz(&self.client, &self.config, &fetch_bounds, key, &self.registry)
                    .await
            {
                raw_tiles = tiles;
            }
        }

        if raw_tiles.is_empty() && request.use_usgs && sources::usgs_coverage(&fetch_bounds) {
            progress("Fetching USGS 1m DEM data...");
            match sources::fetch_usgs(&self.client, &self.config, &fetch_bounds, &self.registry)
                .await
            {
                Some(tiles) => raw_tiles = tiles,
                None => {
                    usgs_fallback = true;
                    warn!("USGS fetch failed, falling back to global tiles");
                }
            }
        }

        // Global tiles always: satellite texture, plus elevation gap fill.
        progress("Fetching global tiles...");
        let (terrain_mosaic, satellite_mosaic) = tokio::join!(
            sources::fetch_terrain_mosaic(&self.client, &self.config, &fetch_bounds),
            sources::fetch_satellite_mosaic(&self.client, &self.config, &fetch_bounds),
        );

        let projection = LocalProjection::new(request.center)?;

        progress("Resampling heightmap to 1m/px...");
        let fallback = |p: LatLng| terrain_mosaic.height_at(p);
        let (height_map, bounds) =
            resample::resample_heights(&projection, &raw_tiles, Some(&fallback), width, height)?;

        progress("Resampling satellite texture...");
        let color_sampler = |p: LatLng| satellite_mosaic.color_at(p);
        let colors = resample::resample_colors(&projection, &color_sampler, width, height)?;

        let (min_height, max_height) = height_map.min_max();

        let features = if request.include_features {
            progress("Fetching vector map features...");
            osm::fetch_features(&self.client, &self.config.overpass_base, &bounds).await
        } else {
            Vec::new()
        };
        info!(
            "terrain grid ready: {width}x{height}, {} features, height range {min_height}..{max_height}",
            features.len()
        );

        let mut data = TerrainData {
            height_map,
            bounds,
            min_height,
            max_height,
            satellite_texture: Some(encode_satellite_jpeg(&colors)?),
            features,
            vector_texture: None,
            hybrid_texture: None,
            usgs_fallback,
        };

        if !data.features.is_empty() {
            progress("Generating vector texture...");
            data.vector_texture = Some(texture::render_vector_texture(&data)?);
            progress("Generating hybrid texture...");
            data.hybrid_texture = Some(texture::render_hybrid_texture(&data)?);
        }

        Ok(data)
    }
}

fn encode_satellite_jpeg(colors: &ColorGrid) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90);
    encoder.encode(
        &colors.to_rgb(),
        colors.width as u32,
        colors.height as u32,
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::NO_DATA;

    #[test]
    fn offline_grid_assembly_end_to_end() {
        // A 512x512 request with a constant fallback sampler and no vector
        // features, assembled without any network source.
        let center = LatLng::new(40.0, -100.0);
        let projection = LocalProjection::new(center).unwrap();
        let sampler = |_: LatLng| 5.0_f32;
        let (height_map, bounds) =
            resample::resample_heights(&projection, &[], Some(&sampler), 512, 512).unwrap();

        assert_eq!(height_map.width, 512);
        assert_eq!(height_map.height, 512);
        assert_eq!(height_map.data.len(), 262_144);
        assert!(height_map.data.iter().all(|&h| h != NO_DATA));

        let (min_height, max_height) = height_map.min_max();
        let data = TerrainData {
            height_map,
            bounds,
            min_height,
            max_height,
            satellite_texture: None,
            features: Vec::new(),
            vector_texture: None,
            hybrid_texture: None,
            usgs_fallback: false,
        };
        assert_eq!(data.min_height, 5.0);
        assert_eq!(data.max_height, 5.0);
        assert!(data.features.is_empty());
        assert!(data.bounds.north > data.bounds.south);
        assert!(data.bounds.east > data.bounds.west);
    }

    #[test]
    fn satellite_jpeg_round_trip() {
        let colors = ColorGrid::filled(16, 16, [120, 80, 40, 255]);
        let jpeg = encode_satellite_jpeg(&colors).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 16));
    }
}
