//! Feature geometry: draped road ribbons, extruded buildings, barrier
//! walls, ground-cover areas, and instanced vegetation.
//!
//! All placement goes through the same local tangent-plane projection as the
//! resampler so geometry lands exactly on the terrain it was sampled from.

use std::collections::HashMap;

use glam::{Vec2, Vec3};
use rand::Rng;

use crate::error::Result;
use crate::geo::{LatLng, haversine_m};
use crate::osm::FeatureKind;
use crate::pipeline::TerrainData;
use crate::proj::LocalProjection;

use super::terrain::{SCENE_SIZE, units_per_meter};
use super::{Category, MeshData, cylinder, srgb_hex_to_linear, uv_sphere};

/// Spacing for re-sampling non-bridge roads so draping follows the terrain.
const ROAD_RESAMPLE_M: f64 = 1.0;
/// Bridge deck clearance above the interpolated span, in meters.
const BRIDGE_CLEARANCE_M: f32 = 0.5;
/// Ground-cover areas float this many scene units above the terrain.
const AREA_OFFSET: f32 = 0.05;
/// Minimum visible extrusion depth in scene units.
const MIN_BUILDING_DEPTH: f32 = 0.1;

type Tags = HashMap<String, String>;

struct ScenePlacer<'a> {
    data: &'a TerrainData,
    proj: LocalProjection,
    upm: f32,
}

impl<'a> ScenePlacer<'a> {
    fn new(data: &'a TerrainData) -> Result<Self> {
        Ok(Self {
            data,
            proj: LocalProjection::new(data.bounds.center())?,
            upm: units_per_meter(&data.bounds),
        })
    }

    /// Fractional grid-pixel position of a geographic point.
    fn grid_pos(&self, p: LatLng) -> Option<(f64, f64)> {
        let (x, y) = self.proj.forward(p).ok()?;
        let half_w = self.data.height_map.width as f64 / 2.0;
        let half_h = self.data.height_map.height as f64 / 2.0;
        Some((x + half_w, half_h - y))
    }

    /// Scene-space position on the ground plane (y = 0).
    fn to_scene(&self, p: LatLng) -> Option<Vec3> {
        let (px, py) = self.grid_pos(p)?;
        let w = (self.data.height_map.width - 1) as f64;
        let h = (self.data.height_map.height - 1) as f64;
        Some(Vec3::new(
            (px / w * f64::from(SCENE_SIZE)) as f32 - SCENE_SIZE / 2.0,
            0.0,
            (py / h * f64::from(SCENE_SIZE)) as f32 - SCENE_SIZE / 2.0,
        ))
    }

    /// Terrain height in scene units at a geographic point; 0 outside the
    /// grid.
    fn terrain_height(&self, p: LatLng) -> f32 {
        let Some((px, py)) = self.grid_pos(p) else {
            return 0.0;
        };
        let grid = &self.data.height_map;
        if px < 0.0
            || px >= (grid.width - 1) as f64
            || py < 0.0
            || py >= (grid.height - 1) as f64
        {
            return 0.0;
        }
        (grid.sample_bilinear(px, py) - self.data.min_height) * self.upm
    }
}

fn scene_ring(placer: &ScenePlacer, ring: &[LatLng]) -> Option<Vec<Vec3>> {
    ring.iter().map(|p| placer.to_scene(*p)).collect()
}

fn draped_points(placer: &ScenePlacer, path: &[LatLng], offset: f32) -> Option<Vec<Vec3>> {
    path.iter()
        .map(|p| {
            placer.to_scene(*p).map(|mut v| {
                v.y = placer.terrain_height(*p) + offset;
                v
            })
        })
        .collect()
}

/// Bridge pose: the deck interpolates linearly between the terrain heights
/// at the two endpoints, ignoring whatever lies underneath.
fn bridge_points(placer: &ScenePlacer, path: &[LatLng], upm: f32) -> Option<Vec<Vec3>> {
    let start_h = placer.terrain_height(path[0]);
    let end_h = placer.terrain_height(path[path.len() - 1]);
    let last = (path.len() - 1) as f32;
    path.iter()
        .enumerate()
        .map(|(i, p)| {
            placer.to_scene(*p).map(|mut v| {
                let t = i as f32 / last;
                v.y = start_h * (1.0 - t) + end_h * t + BRIDGE_CLEARANCE_M * upm;
                v
            })
        })
        .collect()
}

/// Insert intermediate vertices so no segment is longer than `max_len_m`
/// meters of great-circle distance.
fn resample_path(points: &[LatLng], max_len_m: f64) -> Vec<LatLng> {
    if points.len() < 2 {
        return points.to_vec();
    }
    let mut result = vec![points[0]];
    for pair in points.windows(2) {
        let (p1, p2) = (pair[0], pair[1]);
        let d = haversine_m(p1, p2);
        if d > max_len_m {
            let segments = (d / max_len_m).ceil() as usize;
            for j in 1..segments {
                let t = j as f64 / segments as f64;
                result.push(LatLng {
                    lat: p1.lat + (p2.lat - p1.lat) * t,
                    lng: p1.lng + (p2.lng - p1.lng) * t,
                });
            }
        }
        result.push(p2);
    }
    result
}

/// Signed area of a ring in the XZ plane; positive means the up-facing
/// winding.
fn ring_area_signed(ring: &[Vec3]) -> f32 {
    let mut area = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        area += ring[i].x * ring[j].z;
        area -= ring[j].x * ring[i].z;
    }
    area / 2.0
}

fn ring_area(ring: &[Vec3]) -> f32 {
    ring_area_signed(ring).abs()
}

/// Flat ribbon along a path. Each vertex gets a perpendicular offset derived
/// from the forward tangent: the single adjacent segment at the endpoints,
/// the averaged tangent at interior vertices.
fn ribbon_mesh(points: &[Vec3], width: f32) -> Option<MeshData> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let mut mesh = MeshData::default();
    let half = width / 2.0;

    for i in 0..n {
        let forward = if i == 0 {
            points[1] - points[0]
        } else if i == n - 1 {
            points[i] - points[i - 1]
        } else {
            points[i + 1] - points[i - 1]
        }
        .normalize_or_zero();
        let perp = Vec3::new(-forward.z, 0.0, forward.x);

        mesh.positions.push(points[i] + perp * half);
        mesh.positions.push(points[i] - perp * half);
        let u = i as f32 / (n - 1) as f32;
        mesh.uvs.push(Vec2::new(0.0, u));
        mesh.uvs.push(Vec2::new(1.0, u));

        if i < n - 1 {
            let base = (i * 2) as u32;
            mesh.indices
                .extend_from_slice(&[base, base + 2, base + 1]);
            mesh.indices
                .extend_from_slice(&[base + 1, base + 2, base + 3]);
        }
    }

    mesh.pad_attributes();
    mesh.compute_normals();
    Some(mesh)
}

/// Extrude a ribbon centerline into a wall solid: bottom ring, top ring,
/// side quads, and end caps.
fn wall_mesh(points: &[Vec3], width: f32, height: f32) -> Option<MeshData> {
    let ribbon = ribbon_mesh(points, width)?;
    let count = ribbon.positions.len() as u32;

    let mut mesh = MeshData::default();
    mesh.positions.extend_from_slice(&ribbon.positions);
    mesh.positions
        .extend(ribbon.positions.iter().map(|p| *p + Vec3::Y * height));

    for tri in ribbon.indices.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        mesh.indices
            .extend_from_slice(&[a + count, b + count, c + count]);
        mesh.indices.extend_from_slice(&[a, c, b]);
    }

    let n = points.len() as u32;
    for i in 0..n - 1 {
        let base = i * 2;
        let next = base + 2;
        mesh.indices
            .extend_from_slice(&[base, next, next + count]);
        mesh.indices
            .extend_from_slice(&[base, next + count, base + count]);
        mesh.indices
            .extend_from_slice(&[base + 1, base + 1 + count, next + 1 + count]);
        mesh.indices
            .extend_from_slice(&[base + 1, next + 1 + count, next + 1]);
    }

    mesh.indices.extend_from_slice(&[0, 1 + count, 1]);
    mesh.indices.extend_from_slice(&[0, count, 1 + count]);
    let last = (n - 1) * 2;
    mesh.indices
        .extend_from_slice(&[last, last + 1, last + 1 + count]);
    mesh.indices
        .extend_from_slice(&[last, last + 1 + count, last + count]);

    mesh.pad_attributes();
    mesh.compute_normals();
    Some(mesh)
}

fn triangulate(outer: &[Vec3], holes: &[Vec<Vec3>]) -> Vec<usize> {
    let mut flat: Vec<f64> = Vec::new();
    let mut hole_indices = Vec::new();
    for p in outer {
        flat.push(f64::from(p.x));
        flat.push(f64::from(p.z));
    }
    for hole in holes {
        hole_indices.push(flat.len() / 2);
        for p in hole {
            flat.push(f64::from(p.x));
            flat.push(f64::from(p.z));
        }
    }
    earcutr::earcut(&flat, &hole_indices, 2).unwrap_or_default()
}

fn push_oriented(indices: &mut Vec<u32>, positions: &[Vec3], a: u32, b: u32, c: u32, up: bool) {
    let (pa, pb, pc) = (
        positions[a as usize],
        positions[b as usize],
        positions[c as usize],
    );
    let ny = (pb.z - pa.z) * (pc.x - pa.x) - (pb.x - pa.x) * (pc.z - pa.z);
    if (ny > 0.0) == up {
        indices.extend_from_slice(&[a, b, c]);
    } else {
        indices.extend_from_slice(&[a, c, b]);
    }
}

/// Vertical extrusion of a footprint with holes: triangulated roof and
/// floor caps plus side walls around every ring.
fn extrude_footprint(
    outer: &[Vec3],
    holes: &[Vec<Vec3>],
    base_y: f32,
    depth: f32,
) -> Option<MeshData> {
    if outer.len() < 3 || depth <= 0.0 {
        return None;
    }
    let tris = triangulate(outer, holes);
    if tris.is_empty() {
        return None;
    }

    let mut mesh = MeshData::default();
    let ring_points: Vec<Vec3> = outer
        .iter()
        .chain(holes.iter().flatten())
        .copied()
        .collect();
    let vertex_count = ring_points.len() as u32;

    // Roof then floor, sharing the earcut triangulation.
    for p in &ring_points {
        mesh.positions.push(Vec3::new(p.x, base_y + depth, p.z));
    }
    for p in &ring_points {
        mesh.positions.push(Vec3::new(p.x, base_y, p.z));
    }
    for tri in tris.chunks_exact(3) {
        let (a, b, c) = (tri[0] as u32, tri[1] as u32, tri[2] as u32);
        push_oriented(&mut mesh.indices, &mesh.positions, a, b, c, true);
        push_oriented(
            &mut mesh.indices,
            &mesh.positions,
            a + vertex_count,
            b + vertex_count,
            c + vertex_count,
            false,
        );
    }

    let flip = ring_area_signed(outer) < 0.0;
    ring_walls(&mut mesh, outer, base_y, base_y + depth, flip);
    for hole in holes {
        ring_walls(&mut mesh, hole, base_y, base_y + depth, !flip);
    }

    mesh.pad_attributes();
    mesh.compute_normals();
    Some(mesh)
}

fn ring_walls(mesh: &mut MeshData, ring: &[Vec3], base_y: f32, top_y: f32, flip: bool) {
    let n = ring.len();
    for i in 0..n {
        let j = (i + 1) % n;
        let (p0, p1) = (ring[i], ring[j]);
        if (p1 - p0).length_squared() < 1e-10 {
            continue;
        }
        let base = mesh.positions.len() as u32;
        mesh.positions.push(Vec3::new(p0.x, base_y, p0.z));
        mesh.positions.push(Vec3::new(p1.x, base_y, p1.z));
        mesh.positions.push(Vec3::new(p1.x, top_y, p1.z));
        mesh.positions.push(Vec3::new(p0.x, top_y, p0.z));
        if flip {
            mesh.indices
                .extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
        } else {
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
    }
}

/// Flat draped polygon; vertex heights are already set by the caller.
fn area_mesh(ring: &[Vec3]) -> Option<MeshData> {
    if ring.len() < 3 {
        return None;
    }
    let tris = triangulate(ring, &[]);
    if tris.is_empty() {
        return None;
    }
    let mut mesh = MeshData::default();
    mesh.positions.extend_from_slice(ring);
    for tri in tris.chunks_exact(3) {
        push_oriented(
            &mut mesh.indices,
            &mesh.positions,
            tri[0] as u32,
            tri[1] as u32,
            tri[2] as u32,
            true,
        );
    }
    mesh.pad_attributes();
    mesh.compute_normals();
    Some(mesh)
}

struct RoadStyle {
    width_m: f32,
    color: u32,
    offset_m: f32,
    is_bridge: bool,
}

fn road_style(tags: &Tags) -> RoadStyle {
    let highway = tags.get("highway").map(String::as_str);
    let is_bridge =
        tags.contains_key("bridge") || tags.get("man_made").is_some_and(|v| v == "bridge");

    let mut style = RoadStyle {
        width_m: 6.0,
        color: 0x454545,
        offset_m: 0.1,
        is_bridge,
    };
    match highway {
        Some("motorway") | Some("trunk") | Some("primary") => style.width_m = 12.0,
        Some("secondary") | Some("tertiary") => style.width_m = 10.0,
        Some("residential") | Some("unclassified") | Some("living_street") => style.width_m = 8.0,
        Some("service") => style.width_m = 4.0,
        Some("footway") | Some("path") | Some("cycleway") | Some("steps") | Some("pedestrian")
        | Some("track") => {
            style.width_m = 2.0;
            style.color = 0xe0e0e0;
            style.offset_m = 0.15;
        }
        _ => {}
    }
    style
}

struct BarrierStyle {
    height_m: f32,
    width_m: f32,
    color: u32,
}

fn barrier_style(tags: &Tags) -> BarrierStyle {
    let kind = tags.get("barrier").map(String::as_str);
    match kind {
        Some("wall") | Some("city_wall") | Some("retaining_wall") => BarrierStyle {
            height_m: if kind == Some("city_wall") { 4.0 } else { 2.0 },
            width_m: 0.5,
            color: 0xaaaaaa,
        },
        Some("fence") | Some("gate") => BarrierStyle {
            height_m: 1.5,
            width_m: 0.1,
            color: if tags
                .get("material")
                .is_some_and(|m| m == "metal" || m == "chain_link")
            {
                0x555555
            } else {
                0x8b4513
            },
        },
        Some("hedge") => BarrierStyle {
            height_m: 1.2,
            width_m: 0.8,
            color: 0x228b22,
        },
        _ => BarrierStyle {
            height_m: 1.5,
            width_m: 0.2,
            color: 0x888888,
        },
    }
}

/// Ground-cover fill color for flat vegetation areas; `None` means the
/// feature renders as instanced plants instead.
fn area_color(tags: &Tags) -> Option<u32> {
    let natural = tags.get("natural").map(String::as_str);
    let landuse = tags.get("landuse").map(String::as_str);

    if natural == Some("wetland") {
        Some(0x3e4e40)
    } else if matches!(landuse, Some("grass") | Some("meadow") | Some("park"))
        || natural == Some("grassland")
        || natural == Some("heath")
    {
        if natural == Some("heath") {
            Some(0xd2b48c)
        } else {
            Some(0x90ee90)
        }
    } else if natural == Some("sand") || natural == Some("beach") {
        Some(0xf4a460)
    } else if natural == Some("bare_rock") || natural == Some("scree") || landuse == Some("quarry")
    {
        Some(0x808080)
    } else if natural == Some("dirt") {
        Some(0x8b4513)
    } else {
        None
    }
}

fn is_tree_feature(tags: &Tags) -> bool {
    matches!(
        tags.get("natural").map(String::as_str),
        Some("tree") | Some("wood") | Some("tree_row")
    ) || tags.get("landuse").is_some_and(|v| v == "forest")
}

pub(crate) struct BuildingStyle {
    pub height_m: f32,
    pub min_height_m: f32,
    pub color: [f32; 3],
}

/// Building height inference. Explicit tags win; otherwise a per-type table
/// with a little jitter, then an area-band heuristic with amenity bonuses.
pub(crate) fn building_style(tags: &Tags, area_m2: f32, rng: &mut impl Rng) -> BuildingStyle {
    let mut height = if let Some(h) = tags.get("height").and_then(|v| parse_leading_f32(v)) {
        h
    } else if let Some(levels) = tags
        .get("building:levels")
        .and_then(|v| parse_leading_f32(v))
    {
        levels * 3.0
    } else {
        match tags.get("building").map(String::as_str) {
            Some("house") | Some("detached") | Some("bungalow") | Some("residential") => {
                6.0 + rng.gen_range(-1.0..1.0)
            }
            Some("garage") | Some("garages") | Some("shed") | Some("roof") => {
                3.0 + rng.gen_range(-0.5..0.5)
            }
            Some("apartments") | Some("office") | Some("commercial") | Some("hotel") => {
                14.0 + rng.gen_range(-2.0..2.0)
            }
            Some("industrial") | Some("warehouse") | Some("retail") => {
                8.0 + rng.gen_range(-1.0..1.0)
            }
            Some("church") | Some("cathedral") => 20.0 + rng.gen_range(0.0..5.0),
            Some("civic") | Some("public") | Some("hospital") | Some("university") => {
                12.0 + rng.gen_range(0.0..3.0)
            }
            _ => {
                let mut h = if area_m2 > 2000.0 {
                    16.0 + rng.gen_range(0.0..4.0)
                } else if area_m2 > 500.0 {
                    10.0 + rng.gen_range(0.0..3.0)
                } else if area_m2 < 50.0 {
                    3.0 + rng.gen_range(0.0..1.0)
                } else {
                    6.0 + rng.gen_range(0.0..2.0)
                };
                if tags.get("amenity").is_some_and(|v| v == "bank")
                    || tags.get("tourism").is_some_and(|v| v == "hotel")
                {
                    h += 6.0;
                }
                if tags.get("amenity").is_some_and(|v| v == "place_of_worship") {
                    h += 8.0;
                }
                h
            }
        }
    };
    if !height.is_finite() {
        height = 6.0;
    }

    let min_height = tags
        .get("min_height")
        .and_then(|v| parse_leading_f32(v))
        .or_else(|| {
            tags.get("building:min_level")
                .and_then(|v| parse_leading_f32(v))
                .map(|l| l * 3.0)
        })
        .unwrap_or(0.0);

    let color = tags
        .get("building:colour")
        .and_then(|v| parse_hex_color(v))
        .map(srgb_hex_to_linear)
        .unwrap_or(srgb_hex_to_linear(0xe2e8f0));

    BuildingStyle {
        height_m: height,
        min_height_m: if min_height.is_finite() { min_height } else { 0.0 },
        color,
    }
}

/// Parse the leading numeric prefix of a tag value, so "12 m" reads as 12.
fn parse_leading_f32(value: &str) -> Option<f32> {
    let trimmed = value.trim();
    let end = trimmed
        .char_indices()
        .take_while(|&(i, c)| {
            c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+'))
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    trimmed[..end].parse().ok()
}

fn parse_hex_color(value: &str) -> Option<u32> {
    let hex = value.trim().strip_prefix('#')?;
    match hex.len() {
        6 => u32::from_str_radix(hex, 16).ok(),
        3 => {
            let short = u32::from_str_radix(hex, 16).ok()?;
            let (r, g, b) = (short >> 8 & 0xf, short >> 4 & 0xf, short & 0xf);
            Some(r * 0x11 << 16 | g * 0x11 << 8 | b * 0x11)
        }
        _ => None,
    }
}

/// Build one merged mesh per feature category.
pub fn build_feature_meshes(
    data: &TerrainData,
    rng: &mut impl Rng,
) -> Result<Vec<(Category, MeshData)>> {
    if data.features.is_empty() {
        return Ok(Vec::new());
    }
    let placer = ScenePlacer::new(data)?;
    let upm = placer.upm;

    let mut roads = MeshData::default();
    let mut buildings = MeshData::default();
    let mut barriers = MeshData::default();
    let mut areas = MeshData::default();
    let mut tree_points = Vec::new();
    let mut bush_points = Vec::new();

    for feature in &data.features {
        if feature.geometry.is_empty() {
            continue;
        }
        match feature.kind {
            FeatureKind::Road if feature.geometry.len() >= 2 => {
                let style = road_style(&feature.tags);
                let points = if style.is_bridge {
                    bridge_points(&placer, &feature.geometry, upm)
                } else {
                    let resampled = resample_path(&feature.geometry, ROAD_RESAMPLE_M);
                    draped_points(&placer, &resampled, style.offset_m * upm)
                };
                let Some(points) = points else {
                    continue;
                };
                if let Some(mut mesh) = ribbon_mesh(&points, style.width_m * upm) {
                    mesh.fill_color(srgb_hex_to_linear(style.color));
                    roads.merge(&mesh);
                }
            }
            FeatureKind::Building if feature.geometry.len() > 2 => {
                let Some(outer) = scene_ring(&placer, &feature.geometry) else {
                    continue;
                };
                let holes: Vec<Vec<Vec3>> = feature
                    .holes
                    .iter()
                    .filter_map(|hole| scene_ring(&placer, hole))
                    .collect();

                let area_m2 = ring_area(&outer) / (upm * upm);
                let style = building_style(&feature.tags, area_m2, rng);

                let mut avg_height = 0.0;
                for p in &feature.geometry {
                    avg_height += placer.terrain_height(*p);
                }
                avg_height /= feature.geometry.len() as f32;

                let base_y = avg_height + style.min_height_m * upm;
                let depth =
                    ((style.height_m - style.min_height_m) * upm).max(MIN_BUILDING_DEPTH);
                if let Some(mut mesh) = extrude_footprint(&outer, &holes, base_y, depth) {
                    mesh.fill_color(style.color);
                    buildings.merge(&mesh);
                }
            }
            FeatureKind::Barrier if feature.geometry.len() >= 2 => {
                let style = barrier_style(&feature.tags);
                let Some(points) = draped_points(&placer, &feature.geometry, 0.0) else {
                    continue;
                };
                if let Some(mut mesh) =
                    wall_mesh(&points, style.width_m * upm, style.height_m * upm)
                {
                    mesh.fill_color(srgb_hex_to_linear(style.color));
                    barriers.merge(&mesh);
                }
            }
            FeatureKind::Vegetation => {
                if let Some(color) = area_color(&feature.tags)
                    && feature.geometry.len() > 2
                {
                    let Some(ring) = scene_ring(&placer, &feature.geometry) else {
                        continue;
                    };
                    let draped: Vec<Vec3> = ring
                        .iter()
                        .zip(&feature.geometry)
                        .map(|(v, p)| Vec3::new(v.x, placer.terrain_height(*p) + AREA_OFFSET, v.z))
                        .collect();
                    if let Some(mut mesh) = area_mesh(&draped) {
                        mesh.fill_color(srgb_hex_to_linear(color));
                        areas.merge(&mesh);
                    }
                } else {
                    let is_tree = is_tree_feature(&feature.tags);
                    for p in &feature.geometry {
                        let Some(mut v) = placer.to_scene(*p) else {
                            continue;
                        };
                        v.y = placer.terrain_height(*p);
                        if is_tree {
                            tree_points.push(v);
                        } else {
                            bush_points.push(v);
                        }
                    }
                }
            }
            // Water bodies are painted into the textures, not built in 3D.
            _ => {}
        }
    }

    let mut trees = MeshData::default();
    if !tree_points.is_empty() {
        let mut trunk = cylinder(0.5 * upm, 6.0 * upm, 8);
        trunk.fill_color(srgb_hex_to_linear(0x5d4037));
        let mut foliage = uv_sphere(3.5 * upm, 16, 16);
        foliage.fill_color(srgb_hex_to_linear(0x22c55e));
        for pos in tree_points {
            trees.merge(&trunk.clone().translated(pos + Vec3::Y * (3.0 * upm)));
            trees.merge(&foliage.clone().translated(pos + Vec3::Y * (7.0 * upm)));
        }
    }

    let mut bushes = MeshData::default();
    if !bush_points.is_empty() {
        let mut bush = uv_sphere(1.5 * upm, 8, 8);
        bush.fill_color(srgb_hex_to_linear(0x86efac));
        for pos in bush_points {
            bushes.merge(&bush.clone().translated(pos + Vec3::Y * upm));
        }
    }

    let mut categories = Vec::new();
    for (category, mesh) in [
        (Category::Roads, roads),
        (Category::Buildings, buildings),
        (Category::Barriers, barriers),
        (Category::Areas, areas),
        (Category::Trees, trees),
        (Category::Bushes, bushes),
    ] {
        if !mesh.is_empty() {
            categories.push((category, mesh));
        }
    }
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoBounds;
    use crate::grid::HeightGrid;
    use crate::osm::OsmFeature;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tags(entries: &[(&str, &str)]) -> Tags {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn flat_data(features: Vec<OsmFeature>) -> TerrainData {
        let bounds = GeoBounds {
            north: 40.0023,
            south: 39.9977,
            east: -99.997,
            west: -100.003,
        };
        TerrainData {
            height_map: HeightGrid::filled(512, 512, 100.0),
            bounds,
            min_height: 100.0,
            max_height: 100.0,
            satellite_texture: None,
            features,
            vector_texture: None,
            hybrid_texture: None,
            usgs_fallback: false,
        }
    }

    #[test]
    fn explicit_height_suppresses_jitter() {
        let mut rng = StdRng::seed_from_u64(7);
        let style = building_style(
            &tags(&[("building", "yes"), ("height", "12")]),
            100.0,
            &mut rng,
        );
        assert_relative_eq!(style.height_m, 12.0);
        assert_relative_eq!(style.min_height_m, 0.0);
    }

    #[test]
    fn levels_fall_back_to_three_meters_each() {
        let mut rng = StdRng::seed_from_u64(7);
        let style = building_style(
            &tags(&[("building", "yes"), ("building:levels", "5")]),
            100.0,
            &mut rng,
        );
        assert_relative_eq!(style.height_m, 15.0);
    }

    #[test]
    fn inferred_height_stays_in_type_band() {
        let mut rng = StdRng::seed_from_u64(42);
        let style = building_style(&tags(&[("building", "house")]), 80.0, &mut rng);
        assert!(style.height_m >= 5.0 && style.height_m <= 7.0);
    }

    #[test]
    fn parse_leading_f32_handles_units() {
        assert_eq!(parse_leading_f32("12 m"), Some(12.0));
        assert_eq!(parse_leading_f32("3.5m"), Some(3.5));
        assert_eq!(parse_leading_f32("-2"), Some(-2.0));
        assert_eq!(parse_leading_f32("tall"), None);
    }

    #[test]
    fn parse_hex_color_forms() {
        assert_eq!(parse_hex_color("#ff0000"), Some(0xff0000));
        assert_eq!(parse_hex_color("#f00"), Some(0xff0000));
        assert_eq!(parse_hex_color("red"), None);
    }

    #[test]
    fn resample_path_caps_segment_length() {
        // Roughly 220 m of northward line.
        let path = vec![LatLng::new(40.0, -100.0), LatLng::new(40.002, -100.0)];
        let resampled = resample_path(&path, 1.0);
        assert!(resampled.len() > 200);
        for pair in resampled.windows(2) {
            assert!(haversine_m(pair[0], pair[1]) <= 1.05);
        }
    }

    #[test]
    fn ribbon_has_two_vertices_per_point() {
        let points = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 1.0),
        ];
        let mesh = ribbon_mesh(&points, 0.5).unwrap();
        assert_eq!(mesh.positions.len(), 6);
        assert_eq!(mesh.indices.len(), 12);
    }

    #[test]
    fn wall_mesh_doubles_ribbon_vertices() {
        let points = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)];
        let mesh = wall_mesh(&points, 0.2, 1.5).unwrap();
        assert_eq!(mesh.positions.len(), 8);
        let top = mesh.positions.iter().filter(|p| p.y > 1.0).count();
        assert_eq!(top, 4);
    }

    #[test]
    fn building_extrusion_depth_matches_explicit_height() {
        let square = vec![
            LatLng::new(40.0000, -100.0002),
            LatLng::new(40.0000, -99.9998),
            LatLng::new(40.0002, -99.9998),
            LatLng::new(40.0002, -100.0002),
        ];
        let feature = OsmFeature {
            id: "1".to_string(),
            kind: FeatureKind::Building,
            geometry: square,
            holes: Vec::new(),
            tags: tags(&[("building", "yes"), ("height", "12")]),
        };
        let data = flat_data(vec![feature]);
        let upm = units_per_meter(&data.bounds);

        let mut rng = StdRng::seed_from_u64(1);
        let meshes = build_feature_meshes(&data, &mut rng).unwrap();
        let (_, buildings) = meshes
            .iter()
            .find(|(c, _)| *c == Category::Buildings)
            .unwrap();

        let min_y = buildings
            .positions
            .iter()
            .map(|p| p.y)
            .fold(f32::INFINITY, f32::min);
        let max_y = buildings
            .positions
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max);
        assert_relative_eq!(max_y - min_y, 12.0 * upm, epsilon = 1e-4);
    }

    #[test]
    fn building_with_hole_keeps_hole_vertices() {
        let outer = vec![
            LatLng::new(40.0000, -100.0004),
            LatLng::new(40.0000, -99.9996),
            LatLng::new(40.0004, -99.9996),
            LatLng::new(40.0004, -100.0004),
        ];
        let hole = vec![
            LatLng::new(40.0001, -100.0002),
            LatLng::new(40.0001, -99.9998),
            LatLng::new(40.0003, -99.9998),
            LatLng::new(40.0003, -100.0002),
        ];
        let feature = OsmFeature {
            id: "1".to_string(),
            kind: FeatureKind::Building,
            geometry: outer,
            holes: vec![hole],
            tags: tags(&[("building", "yes"), ("height", "6")]),
        };
        let data = flat_data(vec![feature]);
        let mut rng = StdRng::seed_from_u64(1);
        let meshes = build_feature_meshes(&data, &mut rng).unwrap();
        let (_, buildings) = meshes
            .iter()
            .find(|(c, _)| *c == Category::Buildings)
            .unwrap();
        // 8 ring vertices on roof and floor plus 4 wall quads per ring.
        assert!(buildings.positions.len() >= 16 + 32);
    }

    #[test]
    fn bridge_spans_between_endpoint_heights() {
        let mut data = flat_data(Vec::new());
        // Raise the east half of the grid.
        for y in 0..512 {
            for x in 256..512 {
                data.height_map.set(x, y, 120.0);
            }
        }
        let placer = ScenePlacer::new(&data).unwrap();
        let path = vec![
            LatLng::new(40.0, -100.002),
            LatLng::new(40.0, -100.0),
            LatLng::new(40.0, -99.998),
        ];
        let points = bridge_points(&placer, &path, placer.upm).unwrap();
        let clearance = BRIDGE_CLEARANCE_M * placer.upm;
        let (start, mid, end) = (points[0].y, points[1].y, points[2].y);
        // Deck height interpolates the endpoint heights, ignoring terrain.
        assert_relative_eq!(mid - clearance, ((start - clearance) + (end - clearance)) / 2.0, epsilon = 1e-4);
    }

    #[test]
    fn tree_features_become_instanced_clusters() {
        let tree = OsmFeature {
            id: "t".to_string(),
            kind: FeatureKind::Vegetation,
            geometry: vec![LatLng::new(40.0, -100.0)],
            holes: Vec::new(),
            tags: tags(&[("natural", "tree")]),
        };
        let bush = OsmFeature {
            id: "b".to_string(),
            kind: FeatureKind::Vegetation,
            geometry: vec![LatLng::new(40.0001, -100.0)],
            holes: Vec::new(),
            tags: tags(&[("natural", "scrub")]),
        };
        let data = flat_data(vec![tree, bush]);
        let mut rng = StdRng::seed_from_u64(1);
        let meshes = build_feature_meshes(&data, &mut rng).unwrap();
        assert!(meshes.iter().any(|(c, _)| *c == Category::Trees));
        assert!(meshes.iter().any(|(c, _)| *c == Category::Bushes));
    }

    #[test]
    fn grass_area_is_draped_ground_cover() {
        let ring = vec![
            LatLng::new(40.0000, -100.0004),
            LatLng::new(40.0000, -99.9996),
            LatLng::new(40.0004, -99.9996),
            LatLng::new(40.0004, -100.0004),
        ];
        let feature = OsmFeature {
            id: "g".to_string(),
            kind: FeatureKind::Vegetation,
            geometry: ring,
            holes: Vec::new(),
            tags: tags(&[("landuse", "grass")]),
        };
        let data = flat_data(vec![feature]);
        let mut rng = StdRng::seed_from_u64(1);
        let meshes = build_feature_meshes(&data, &mut rng).unwrap();
        let (_, areas) = meshes.iter().find(|(c, _)| *c == Category::Areas).unwrap();
        // Flat terrain: every vertex floats exactly the offset above ground.
        for p in &areas.positions {
            assert_relative_eq!(p.y, AREA_OFFSET, epsilon = 1e-5);
        }
    }
}
