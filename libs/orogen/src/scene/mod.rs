//! Renderable scene assembly.
//!
//! Meshes are plain attribute/index buffers; everything in one visual
//! category is merged into a single mesh to keep draw calls down, with the
//! category color baked into per-vertex colors.

pub mod features;
pub mod terrain;

use glam::{Vec2, Vec3};
use rand::Rng;

use crate::error::Result;
use crate::pipeline::TerrainData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Roads,
    Buildings,
    Barriers,
    Areas,
    Trees,
    Bushes,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Roads => "Roads",
            Category::Buildings => "Buildings",
            Category::Barriers => "Barriers",
            Category::Areas => "Areas",
            Category::Trees => "Trees",
            Category::Bushes => "Bushes",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<Vec2>,
    pub colors: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append another mesh, offsetting its indices.
    pub fn merge(&mut self, other: &MeshData) {
        let offset = self.positions.len() as u32;
        self.positions.extend_from_slice(&other.positions);
        self.normals.extend_from_slice(&other.normals);
        self.uvs.extend_from_slice(&other.uvs);
        self.colors.extend_from_slice(&other.colors);
        self.indices.extend(other.indices.iter().map(|i| i + offset));
    }

    /// Replace all vertex colors with one value.
    pub fn fill_color(&mut self, color: [f32; 3]) {
        self.colors = vec![color; self.positions.len()];
    }

    pub fn translated(mut self, offset: Vec3) -> Self {
        for p in &mut self.positions {
            *p += offset;
        }
        self
    }

    /// Area-weighted smooth normals from the triangle list.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let n = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            normals[a] += n;
            normals[b] += n;
            normals[c] += n;
        }
        self.normals = normals
            .into_iter()
            .map(|n| {
                if n.length_squared() > 1e-12 {
                    n.normalize()
                } else {
                    Vec3::Y
                }
            })
            .collect();
    }

    fn pad_attributes(&mut self) {
        let n = self.positions.len();
        self.uvs.resize(n, Vec2::ZERO);
        self.colors.resize(n, [1.0, 1.0, 1.0]);
    }
}

/// Convert a packed sRGB hex color to linear RGB floats.
pub fn srgb_hex_to_linear(hex: u32) -> [f32; 3] {
    let channel = |v: u32| {
        let s = (v & 0xff) as f32 / 255.0;
        if s <= 0.04045 {
            s / 12.92
        } else {
            ((s + 0.055) / 1.055).powf(2.4)
        }
    };
    [channel(hex >> 16), channel(hex >> 8), channel(hex)]
}

/// Upright cylinder centered at the origin.
pub fn cylinder(radius: f32, height: f32, radial_segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let half = height / 2.0;
    let n = radial_segments.max(3);

    for i in 0..n {
        let theta = i as f32 / n as f32 * std::f32::consts::TAU;
        let (x, z) = (theta.cos() * radius, theta.sin() * radius);
        mesh.positions.push(Vec3::new(x, -half, z));
        mesh.positions.push(Vec3::new(x, half, z));
    }
    for i in 0..n {
        let j = (i + 1) % n;
        let (b0, t0, b1, t1) = (i * 2, i * 2 + 1, j * 2, j * 2 + 1);
        mesh.indices.extend_from_slice(&[b0, b1, t1, b0, t1, t0]);
    }

    // Caps reuse the rim vertices.
    let bottom_center = mesh.positions.len() as u32;
    mesh.positions.push(Vec3::new(0.0, -half, 0.0));
    let top_center = mesh.positions.len() as u32;
    mesh.positions.push(Vec3::new(0.0, half, 0.0));
    for i in 0..n {
        let j = (i + 1) % n;
        mesh.indices
            .extend_from_slice(&[bottom_center, i * 2, j * 2]);
        mesh.indices
            .extend_from_slice(&[top_center, j * 2 + 1, i * 2 + 1]);
    }

    mesh.pad_attributes();
    mesh.compute_normals();
    mesh
}

/// Latitude/longitude sphere centered at the origin.
pub fn uv_sphere(radius: f32, width_segments: u32, height_segments: u32) -> MeshData {
    let mut mesh = MeshData::default();
    let (w, h) = (width_segments.max(3), height_segments.max(2));

    for row in 0..=h {
        let v = row as f32 / h as f32;
        let phi = v * std::f32::consts::PI;
        for col in 0..=w {
            let u = col as f32 / w as f32;
            let theta = u * std::f32::consts::TAU;
            mesh.positions.push(Vec3::new(
                -radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            ));
        }
    }
    for row in 0..h {
        for col in 0..w {
            let a = row * (w + 1) + col;
            let b = a + w + 1;
            if row != 0 {
                mesh.indices.extend_from_slice(&[a, b, a + 1]);
            }
            if row != h - 1 {
                mesh.indices.extend_from_slice(&[a + 1, b, b + 1]);
            }
        }
    }

    mesh.pad_attributes();
    mesh.compute_normals();
    mesh
}

/// Encoded texture handed to the exporter.
pub struct TextureSlot {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// The assembled scene: terrain plus one merged mesh per feature category.
pub struct SceneModel {
    pub terrain: MeshData,
    pub terrain_texture: Option<TextureSlot>,
    pub categories: Vec<(Category, MeshData)>,
}

/// Build the full scene from terrain data. The rng drives building-height
/// jitter for footprints without an explicit height tag.
pub fn build_scene(data: &TerrainData, rng: &mut impl Rng) -> Result<SceneModel> {
    let terrain = terrain::build_terrain_mesh(data);
    let categories = features::build_feature_meshes(data, rng)?;

    // The hybrid texture already composites the satellite underlay; prefer
    // it, then fall back to the bare satellite resample.
    let terrain_texture = if let Some(bytes) = data.hybrid_texture.clone() {
        Some(TextureSlot {
            bytes,
            mime: "image/png",
        })
    } else {
        data.satellite_texture.clone().map(|bytes| TextureSlot {
            bytes,
            mime: "image/jpeg",
        })
    };

    Ok(SceneModel {
        terrain,
        terrain_texture,
        categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_offsets_indices() {
        let mut a = MeshData::default();
        a.positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        a.indices = vec![0, 1, 2];
        a.pad_attributes();
        let mut b = MeshData::default();
        b.positions = vec![Vec3::ZERO, Vec3::X, Vec3::Z];
        b.indices = vec![0, 1, 2];
        b.pad_attributes();

        a.merge(&b);
        assert_eq!(a.positions.len(), 6);
        assert_eq!(a.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn normals_of_flat_triangle_point_up() {
        let mut mesh = MeshData::default();
        mesh.positions = vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0), Vec3::X];
        mesh.indices = vec![0, 1, 2];
        mesh.pad_attributes();
        mesh.compute_normals();
        for n in &mesh.normals {
            assert!(n.y > 0.99);
        }
    }

    #[test]
    fn primitives_are_well_formed() {
        for mesh in [cylinder(0.5, 2.0, 8), uv_sphere(1.0, 8, 8)] {
            assert_eq!(mesh.positions.len(), mesh.normals.len());
            assert_eq!(mesh.positions.len(), mesh.colors.len());
            assert_eq!(mesh.indices.len() % 3, 0);
            let max = *mesh.indices.iter().max().unwrap() as usize;
            assert!(max < mesh.positions.len());
        }
    }

    #[test]
    fn srgb_white_is_linear_white() {
        let c = srgb_hex_to_linear(0xffffff);
        assert!(c.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
