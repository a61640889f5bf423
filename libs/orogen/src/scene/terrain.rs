//! Terrain surface mesh.

use glam::{Vec2, Vec3};

use crate::geo::{GeoBounds, meters_per_degree_lng};
use crate::pipeline::TerrainData;

use super::MeshData;

/// The exported scene always spans this many units on a side, regardless of
/// the requested meter extent.
pub const SCENE_SIZE: f32 = 100.0;

/// Neither terrain mesh dimension exceeds this many vertices per side.
pub const MAX_MESH_RESOLUTION: usize = 1024;

/// Width of the grid in real meters, measured at the center latitude so the
/// longitude-degree span shrinks correctly away from the equator.
pub fn real_width_meters(bounds: &GeoBounds) -> f64 {
    let center_lat = (bounds.north + bounds.south) / 2.0;
    (bounds.east - bounds.west) * meters_per_degree_lng(center_lat)
}

/// Scene units per real meter.
pub fn units_per_meter(bounds: &GeoBounds) -> f32 {
    (f64::from(SCENE_SIZE) / real_width_meters(bounds)) as f32
}

/// Build the decimated terrain grid mesh. Vertex heights come from the
/// nearest stride-aligned cell, scaled relative to the grid minimum.
pub fn build_terrain_mesh(data: &TerrainData) -> MeshData {
    let grid = &data.height_map;
    let (w, h) = (grid.width, grid.height);
    let stride = w.max(h).div_ceil(MAX_MESH_RESOLUTION).max(1);
    let segments_x = ((w - 1) / stride).max(1);
    let segments_y = ((h - 1) / stride).max(1);
    let upm = units_per_meter(&data.bounds);

    let mut mesh = MeshData::default();
    for row in 0..=segments_y {
        let v = row as f32 / segments_y as f32;
        let map_row = (row * stride).min(h - 1);
        for col in 0..=segments_x {
            let u = col as f32 / segments_x as f32;
            let map_col = (col * stride).min(w - 1);
            let height = (grid.get(map_col, map_row) - data.min_height) * upm;
            mesh.positions.push(Vec3::new(
                u * SCENE_SIZE - SCENE_SIZE / 2.0,
                height,
                v * SCENE_SIZE - SCENE_SIZE / 2.0,
            ));
            mesh.uvs.push(Vec2::new(u, v));
            mesh.colors.push([1.0, 1.0, 1.0]);
        }
    }

    let columns = (segments_x + 1) as u32;
    for row in 0..segments_y as u32 {
        for col in 0..segments_x as u32 {
            let i00 = row * columns + col;
            let i10 = i00 + 1;
            let i01 = i00 + columns;
            let i11 = i01 + 1;
            mesh.indices.extend_from_slice(&[i00, i01, i10]);
            mesh.indices.extend_from_slice(&[i10, i01, i11]);
        }
    }

    mesh.compute_normals();
    mesh
}
