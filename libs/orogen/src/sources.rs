//! Remote raster sources.
//!
//! Elevation comes from an ordered fallback chain: the GPXZ high-resolution
//! raster (when an API key is configured), the USGS 1 m DEM catalog (CONUS,
//! Alaska and Hawaii only), and finally the always-fetched global terrarium
//! tiles, which double as a gap filler for holes in the high-resolution
//! sources. Satellite imagery is stitched from a world-imagery tile service.
//!
//! Tile downloads run through a bounded worker pool; a tile that fails to
//! download is painted as a solid fallback block rather than failing the
//! whole mosaic.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::geo::{GeoBounds, LatLng, TILE_SIZE, project};
use crate::geotiff::{ElevationTile, parse_elevation_tile};
use crate::proj::ProjRegistry;

/// Fixed zoom for terrarium elevation tiles.
pub const TERRAIN_ZOOM: u8 = 15;
/// Fixed zoom for satellite imagery (~1.2 m/px).
pub const SATELLITE_ZOOM: u8 = 17;

const USGS_DATASET: &str = "Digital Elevation Model (DEM) 1 meter";
const USGS_MAX_RETRIES: u32 = 3;
const USGS_QUERY_TIMEOUT: Duration = Duration::from_secs(15);
const USGS_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoints and limits for every remote source. `Default` points at the
/// public services; tests aim the fields at local servers.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub terrain_tile_base: String,
    pub satellite_tile_base: String,
    pub gpxz_base: String,
    pub usgs_product_base: String,
    pub proj_def_base: String,
    pub overpass_base: String,
    pub tile_concurrency: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            terrain_tile_base: "https://s3.amazonaws.com/elevation-tiles-prod/terrarium"
                .to_string(),
            satellite_tile_base:
                "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile"
                    .to_string(),
            gpxz_base: "https://api.gpxz.io/v1/elevation/hires-raster".to_string(),
            usgs_product_base: "https://tnmaccess.nationalmap.gov/api/v1/products".to_string(),
            proj_def_base: "https://epsg.io".to_string(),
            overpass_base: "https://overpass-api.de/api/interpreter".to_string(),
            tile_concurrency: 20,
        }
    }
}

/// Decode a terrarium-encoded pixel to meters.
pub fn decode_terrarium(r: u8, g: u8, b: u8) -> f32 {
    f32::from(r) * 256.0 + f32::from(g) + f32::from(b) / 256.0 - 32768.0
}

#[derive(Clone, Copy)]
enum MosaicKind {
    Terrain,
    Satellite,
}

impl MosaicKind {
    fn zoom(self) -> u8 {
        match self {
            MosaicKind::Terrain => TERRAIN_ZOOM,
            MosaicKind::Satellite => SATELLITE_ZOOM,
        }
    }

    fn fallback_color(self) -> [u8; 4] {
        match self {
            MosaicKind::Terrain => [0, 0, 0, 255],
            MosaicKind::Satellite => [0x1a, 0x1a, 0x1a, 255],
        }
    }

    fn tile_url(self, cfg: &SourceConfig, tx: i64, ty: i64) -> String {
        match self {
            MosaicKind::Terrain => {
                format!("{}/{}/{}/{}.png", cfg.terrain_tile_base, TERRAIN_ZOOM, tx, ty)
            }
            // The imagery service addresses tiles row-first.
            MosaicKind::Satellite => {
                format!("{}/{}/{}/{}", cfg.satellite_tile_base, SATELLITE_ZOOM, ty, tx)
            }
        }
    }
}

/// A stitched block of web-mercator tiles with samplers in geographic
/// coordinates.
pub struct TileMosaic {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
    min_tile_x: i64,
    min_tile_y: i64,
    zoom: u8,
}

impl TileMosaic {
    fn pixel_clamped(&self, x: i64, y: i64) -> [u8; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let i = (y * self.width + x) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }

    fn local_px(&self, p: LatLng) -> (f64, f64) {
        let (x, y) = project(p.lat, p.lng, self.zoom);
        (
            x - (self.min_tile_x * i64::from(TILE_SIZE)) as f64,
            y - (self.min_tile_y * i64::from(TILE_SIZE)) as f64,
        )
    }

    /// Bilinear terrarium height at a geographic point. Pixel reads clamp to
    /// the mosaic edge, so this always yields a value.
    pub fn height_at(&self, p: LatLng) -> f32 {
        let (lx, ly) = self.local_px(p);
        let x0 = lx.floor();
        let y0 = ly.floor();
        let dx = (lx - x0) as f32;
        let dy = (ly - y0) as f32;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let h = |x: i64, y: i64| {
            let [r, g, b, _] = self.pixel_clamped(x, y);
            decode_terrarium(r, g, b)
        };
        let top = (1.0 - dx) * h(x0, y0) + dx * h(x0 + 1, y0);
        let bottom = (1.0 - dx) * h(x0, y0 + 1) + dx * h(x0 + 1, y0 + 1);
        (1.0 - dy) * top + dy * bottom
    }

    /// Nearest-pixel color at a geographic point; opaque black outside the
    /// mosaic.
    pub fn color_at(&self, p: LatLng) -> [u8; 4] {
        let (lx, ly) = self.local_px(p);
        let (x, y) = (lx.floor() as i64, ly.floor() as i64);
        if x < 0 || x >= self.width as i64 || y < 0 || y >= self.height as i64 {
            return [0, 0, 0, 255];
        }
        self.pixel_clamped(x, y)
    }
}

fn tile_range(bounds: &GeoBounds, zoom: u8) -> (i64, i64, i64, i64) {
    let (nw_x, nw_y) = project(bounds.north, bounds.west, zoom);
    let (se_x, se_y) = project(bounds.south, bounds.east, zoom);
    let tile = f64::from(TILE_SIZE);
    (
        (nw_x / tile).floor() as i64,
        (nw_y / tile).floor() as i64,
        (se_x / tile).floor() as i64,
        (se_y / tile).floor() as i64,
    )
}

async fn fetch_tile_image(client: &reqwest::Client, url: String) -> Option<image::RgbaImage> {
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("tile request failed: {url}: {err}");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!("tile request failed: {url}: HTTP {}", response.status());
        return None;
    }
    let bytes = response.bytes().await.ok()?;
    match image::load_from_memory(&bytes) {
        Ok(img) => Some(img.to_rgba8()),
        Err(err) => {
            warn!("tile decode failed: {url}: {err}");
            None
        }
    }
}

async fn fetch_mosaic(
    client: &reqwest::Client,
    cfg: &SourceConfig,
    bounds: &GeoBounds,
    kind: MosaicKind,
) -> TileMosaic {
    let zoom = kind.zoom();
    let (min_tx, min_ty, max_tx, max_ty) = tile_range(bounds, zoom);
    let tile = TILE_SIZE as usize;
    let width = (max_tx - min_tx + 1) as usize * tile;
    let height = (max_ty - min_ty + 1) as usize * tile;

    let mut coords = Vec::new();
    for tx in min_tx..=max_tx {
        for ty in min_ty..=max_ty {
            coords.push((tx, ty));
        }
    }
    debug!("fetching {} tiles at z{zoom}", coords.len());

    let fetched: Vec<(i64, i64, Option<image::RgbaImage>)> = stream::iter(coords)
        .map(|(tx, ty)| {
            let url = kind.tile_url(cfg, tx, ty);
            async move { (tx, ty, fetch_tile_image(client, url).await) }
        })
        .buffer_unordered(cfg.tile_concurrency.max(1))
        .collect()
        .await;

    let mut mosaic = TileMosaic {
        pixels: vec![0; width * height * 4],
        width,
        height,
        min_tile_x: min_tx,
        min_tile_y: min_ty,
        zoom,
    };

    for (tx, ty, img) in fetched {
        let dest_x = (tx - min_tx) as usize * tile;
        let dest_y = (ty - min_ty) as usize * tile;
        match img {
            Some(img) => {
                let copy_w = (img.width() as usize).min(tile);
                let copy_h = (img.height() as usize).min(tile);
                for row in 0..copy_h {
                    for col in 0..copy_w {
                        let px = img.get_pixel(col as u32, row as u32).0;
                        let i = ((dest_y + row) * width + dest_x + col) * 4;
                        mosaic.pixels[i..i + 4].copy_from_slice(&px);
                    }
                }
            }
            None => {
                let fill = kind.fallback_color();
                for row in 0..tile {
                    for col in 0..tile {
                        let i = ((dest_y + row) * width + dest_x + col) * 4;
                        mosaic.pixels[i..i + 4].copy_from_slice(&fill);
                    }
                }
            }
        }
    }

    mosaic
}

/// Stitch the global terrarium elevation mosaic covering `bounds`.
pub async fn fetch_terrain_mosaic(
    client: &reqwest::Client,
    cfg: &SourceConfig,
    bounds: &GeoBounds,
) -> TileMosaic {
    fetch_mosaic(client, cfg, bounds, MosaicKind::Terrain).await
}

/// Stitch the satellite imagery mosaic covering `bounds`.
pub async fn fetch_satellite_mosaic(
    client: &reqwest::Client,
    cfg: &SourceConfig,
    bounds: &GeoBounds,
) -> TileMosaic {
    fetch_mosaic(client, cfg, bounds, MosaicKind::Satellite).await
}

/// Fetch the GPXZ high-resolution raster for `bounds`. Any failure degrades
/// to `None` so the caller can fall through the source chain.
pub async fn fetch_gpxz(
    client: &reqwest::Client,
    cfg: &SourceConfig,
    bounds: &GeoBounds,
    api_key: &str,
    registry: &ProjRegistry,
) -> Option<Vec<ElevationTile>> {
    let url = format!(
        "{}?bbox_top={}&bbox_bottom={}&bbox_left={}&bbox_right={}&res_m=1&projection=latlon",
        cfg.gpxz_base, bounds.north, bounds.south, bounds.west, bounds.east
    );
    debug!("fetching GPXZ raster: {url}");

    let response = match client.get(&url).header("x-api-key", api_key).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("GPXZ request failed: {err}");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!("GPXZ tile error: {}", response.status());
        return None;
    }
    let bytes = response.bytes().await.ok()?;
    match parse_elevation_tile(&bytes, registry, client, &cfg.proj_def_base).await {
        Ok(tile) => Some(vec![tile]),
        Err(err) => {
            warn!("GPXZ GeoTIFF parse failed: {err}");
            None
        }
    }
}

/// True when the window falls inside a coverage envelope of the USGS 1 m DEM
/// program (CONUS, Alaska, Hawaii).
pub fn usgs_coverage(bounds: &GeoBounds) -> bool {
    let conus =
        bounds.north < 50.0 && bounds.south > 24.0 && bounds.west > -125.0 && bounds.east < -66.0;
    let alaska =
        bounds.north < 72.0 && bounds.south > 50.0 && bounds.west > -170.0 && bounds.east < -129.0;
    let hawaii =
        bounds.north < 23.0 && bounds.south > 18.0 && bounds.west > -161.0 && bounds.east < -154.0;
    conus || alaska || hawaii
}

#[derive(serde::Deserialize)]
struct UsgsProductList {
    #[serde(default)]
    items: Vec<UsgsProductItem>,
}

#[derive(serde::Deserialize)]
struct UsgsProductItem {
    #[serde(rename = "downloadURL")]
    download_url: Option<String>,
}

/// Query the USGS product catalog and download each GeoTIFF sequentially.
/// The metadata query retries with linear backoff; individual tile downloads
/// are skipped on failure, never fatal.
pub async fn fetch_usgs(
    client: &reqwest::Client,
    cfg: &SourceConfig,
    bounds: &GeoBounds,
    registry: &ProjRegistry,
) -> Option<Vec<ElevationTile>> {
    let bbox = format!(
        "{:.6},{:.6},{:.6},{:.6}",
        bounds.west, bounds.south, bounds.east, bounds.north
    );
    info!("querying USGS products for bbox {bbox}");

    let mut list: Option<UsgsProductList> = None;
    for attempt in 1..=USGS_MAX_RETRIES {
        let result = client
            .get(&cfg.usgs_product_base)
            .query(&[
                ("datasets", USGS_DATASET),
                ("bbox", &bbox),
                ("prodFormats", "GeoTIFF"),
                ("max", "4"),
            ])
            .timeout(USGS_QUERY_TIMEOUT)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<UsgsProductList>().await {
                    Ok(parsed) => {
                        list = Some(parsed);
                        break;
                    }
                    Err(err) => warn!("USGS response parse failed: {err}"),
                }
            }
            Ok(response) => warn!("USGS query failed: HTTP {}", response.status()),
            Err(err) => warn!("USGS network error: {err}"),
        }
        tokio::time::sleep(Duration::from_millis(u64::from(attempt) * 1000)).await;
    }

    let list = list?;
    if list.items.is_empty() {
        info!("no USGS products found for bounds");
        return None;
    }
    info!(
        "found {} USGS tiles, downloading sequentially",
        list.items.len()
    );

    // Sequential: 1 m tiles are large enough that parallel downloads blow
    // peak memory.
    let mut tiles = Vec::new();
    for item in list.items {
        let Some(url) = item.download_url else {
            continue;
        };
        debug!("downloading USGS GeoTIFF: {url}");
        let bytes = match client.get(&url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("USGS tile read failed: {err}");
                    continue;
                }
            },
            Ok(response) => {
                warn!("USGS tile download failed: HTTP {}", response.status());
                continue;
            }
            Err(err) => {
                warn!("USGS tile download failed: {err}");
                continue;
            }
        };
        match parse_elevation_tile(&bytes, registry, client, &cfg.proj_def_base).await {
            Ok(tile) => tiles.push(tile),
            Err(err) => warn!("USGS tile parse failed ({url}): {err}"),
        }
    }

    if tiles.is_empty() {
        warn!("all USGS tile downloads failed");
        return None;
    }
    Some(tiles)
}

/// Lightweight availability probe against the USGS catalog.
pub async fn check_usgs_status(client: &reqwest::Client, cfg: &SourceConfig) -> bool {
    client
        .get(&cfg.usgs_product_base)
        .query(&[("max", "1")])
        .timeout(USGS_STATUS_TIMEOUT)
        .send()
        .await
        .map(|response| response.status().is_success())
        .unwrap_or(false)
}

/// Shared HTTP client for the pipeline: rustls, bounded total request time.
pub fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terrarium_decode_sea_level() {
        // 32768 encodes as r=128, g=0, b=0.
        assert_eq!(decode_terrarium(128, 0, 0), 0.0);
    }

    #[test]
    fn terrarium_decode_black_is_deep() {
        assert_eq!(decode_terrarium(0, 0, 0), -32768.0);
    }

    #[test]
    fn usgs_envelopes() {
        let kansas = GeoBounds {
            north: 40.01,
            south: 39.99,
            east: -99.98,
            west: -100.02,
        };
        let zurich = GeoBounds {
            north: 47.4,
            south: 47.3,
            east: 8.6,
            west: 8.5,
        };
        let anchorage = GeoBounds {
            north: 61.3,
            south: 61.1,
            east: -149.7,
            west: -150.0,
        };
        assert!(usgs_coverage(&kansas));
        assert!(!usgs_coverage(&zurich));
        assert!(usgs_coverage(&anchorage));
    }

    #[test]
    fn mosaic_color_outside_is_black() {
        let mosaic = TileMosaic {
            pixels: vec![200; 256 * 256 * 4],
            width: 256,
            height: 256,
            min_tile_x: 0,
            min_tile_y: 0,
            zoom: 15,
        };
        // Tile (0,0) at z15 sits far north-west of Kansas.
        assert_eq!(mosaic.color_at(LatLng::new(40.0, -100.0)), [0, 0, 0, 255]);
    }
}
