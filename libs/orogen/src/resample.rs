//! Metric grid resampling.
//!
//! Projects every output cell of a `width x height` meter grid through the
//! local tangent-plane projection and pulls a value out of the available
//! rasters. Tile search is first-match-wins in iteration order; overlapping
//! tiles are not mosaicked by quality.

use crate::error::Result;
use crate::geo::{GeoBounds, LatLng};
use crate::geotiff::ElevationTile;
use crate::grid::{ColorGrid, HeightGrid, NO_DATA};
use crate::proj::LocalProjection;

/// Resample elevation into a metric grid centered on the projection center.
///
/// Per cell: try each GeoTIFF tile in order and accept the first valid
/// bilinear sample; fall back to the generic sampler; otherwise leave the
/// cell as `NO_DATA`. Returns the grid together with its true geographic
/// bounds, computed by inverse-projecting the grid corners (the local plane
/// is square in meters, not in degrees).
pub fn resample_heights(
    projection: &LocalProjection,
    tiles: &[ElevationTile],
    fallback: Option<&dyn Fn(LatLng) -> f32>,
    width: usize,
    height: usize,
) -> Result<(HeightGrid, GeoBounds)> {
    let mut grid = HeightGrid::filled(width, height, NO_DATA);
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;

    for y in 0..height {
        for x in 0..width {
            // Row 0 is the north edge.
            let p = projection.inverse(x as f64 - half_w, half_h - y as f64)?;

            let mut h = NO_DATA;
            for tile in tiles {
                if let Some(v) = tile.sample(p) {
                    h = v;
                    break;
                }
            }
            if h == NO_DATA
                && let Some(sampler) = fallback
            {
                h = sampler(p);
            }
            grid.set(x, y, h);
        }
    }

    let nw = projection.inverse(-half_w, half_h)?;
    let se = projection.inverse(half_w, -half_h)?;
    let bounds = GeoBounds {
        north: nw.lat,
        west: nw.lng,
        south: se.lat,
        east: se.lng,
    };

    Ok((grid, bounds))
}

/// Resample imagery into an RGBA grid through the identical projection and
/// cell loop. A single sampler, always yielding a color.
pub fn resample_colors(
    projection: &LocalProjection,
    sampler: &dyn Fn(LatLng) -> [u8; 4],
    width: usize,
    height: usize,
) -> Result<ColorGrid> {
    let mut grid = ColorGrid::filled(width, height, [0, 0, 0, 255]);
    let half_w = width as f64 / 2.0;
    let half_h = height as f64 / 2.0;

    for y in 0..height {
        for x in 0..width {
            let p = projection.inverse(x as f64 - half_w, half_h - y as f64)?;
            grid.put(x, y, sampler(p));
        }
    }

    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fallback_fills_when_no_tiles() {
        let projection = LocalProjection::new(LatLng::new(40.0, -100.0)).unwrap();
        let sampler = |_: LatLng| 7.0_f32;
        let (grid, bounds) =
            resample_heights(&projection, &[], Some(&sampler), 8, 8).unwrap();
        assert!(grid.data.iter().all(|&h| h == 7.0));
        assert!(bounds.north > bounds.south && bounds.east > bounds.west);
    }

    #[test]
    fn uncovered_cell_stays_no_data() {
        let projection = LocalProjection::new(LatLng::new(40.0, -100.0)).unwrap();
        // Fallback refuses exactly one cell by answering NO_DATA for the
        // north-west corner region.
        let sampler = |p: LatLng| {
            if p.lat > 40.0 && p.lng < -100.0 {
                NO_DATA
            } else {
                3.0
            }
        };
        let (grid, _) = resample_heights(&projection, &[], Some(&sampler), 4, 4).unwrap();
        assert_eq!(grid.get(0, 0), NO_DATA);
        assert_eq!(grid.get(3, 3), 3.0);
    }

    #[test]
    fn no_sources_yields_all_no_data() {
        let projection = LocalProjection::new(LatLng::new(40.0, -100.0)).unwrap();
        let (grid, _) = resample_heights(&projection, &[], None, 4, 4).unwrap();
        assert!(grid.data.iter().all(|&h| h == NO_DATA));
    }

    #[test]
    fn bounds_are_centered_on_request_point() {
        let center = LatLng::new(40.0, -100.0);
        let projection = LocalProjection::new(center).unwrap();
        let sampler = |_: LatLng| 0.0_f32;
        let (_, bounds) = resample_heights(&projection, &[], Some(&sampler), 64, 64).unwrap();
        assert_relative_eq!(bounds.center().lat, center.lat, epsilon = 1e-6);
        assert_relative_eq!(bounds.center().lng, center.lng, epsilon = 1e-6);
    }

    #[test]
    fn color_grid_matches_dimensions() {
        let projection = LocalProjection::new(LatLng::new(40.0, -100.0)).unwrap();
        let sampler = |_: LatLng| [1, 2, 3, 255];
        let grid = resample_colors(&projection, &sampler, 5, 9).unwrap();
        assert_eq!(grid.data.len(), 5 * 9 * 4);
        assert_eq!(grid.get(4, 8), [1, 2, 3, 255]);
    }
}
