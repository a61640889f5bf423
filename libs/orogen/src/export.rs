//! Binary scene export.
//!
//! Assembles the generated meshes into a glTF scene graph and serializes it
//! as a binary glTF (GLB) container. The document model is `gltf-json`; this
//! module only lays out buffers and writes the two-chunk container framing.

use gltf_json as json;
use json::validation::{Checked, USize64};

use crate::error::{Error, Result};
use crate::scene::{MeshData, SceneModel};

const GLB_MAGIC: u32 = 0x4654_6C67;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Dated artifact file name.
pub fn artifact_name(date: chrono::NaiveDate) -> String {
    format!("orogen_model_{}.glb", date.format("%Y-%m-%d"))
}

/// Artifact file name for the current local date.
pub fn artifact_name_today() -> String {
    artifact_name(chrono::Local::now().date_naive())
}

struct GlbBuilder {
    root: json::Root,
    bin: Vec<u8>,
}

impl GlbBuilder {
    fn new() -> Self {
        let mut root = json::Root::default();
        root.asset.generator = Some(concat!("orogen ", env!("CARGO_PKG_VERSION")).to_string());
        Self {
            root,
            bin: Vec::new(),
        }
    }

    fn push_view(
        &mut self,
        bytes: &[u8],
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::buffer::View> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        self.root.buffer_views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: USize64::from(bytes.len()),
            byte_offset: Some(USize64::from(offset)),
            byte_stride: None,
            name: None,
            target: target.map(Checked::Valid),
            extensions: Default::default(),
            extras: Default::default(),
        });
        json::Index::new(self.root.buffer_views.len() as u32 - 1)
    }

    fn push_accessor(&mut self, accessor: json::Accessor) -> json::Index<json::Accessor> {
        self.root.accessors.push(accessor);
        json::Index::new(self.root.accessors.len() as u32 - 1)
    }

    fn push_f32_accessor(
        &mut self,
        values: &[f32],
        type_: json::accessor::Type,
        count: usize,
        min: Option<serde_json::Value>,
        max: Option<serde_json::Value>,
    ) -> json::Index<json::Accessor> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(json::buffer::Target::ArrayBuffer));
        self.push_accessor(json::Accessor {
            buffer_view: Some(view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(count),
            component_type: Checked::Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::F32,
            )),
            type_: Checked::Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        })
    }

    fn add_mesh(
        &mut self,
        mesh: &MeshData,
        name: &str,
        material: json::Index<json::Material>,
    ) -> json::Index<json::Mesh> {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in &mesh.positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        let positions: Vec<f32> = mesh.positions.iter().flat_map(|p| p.to_array()).collect();
        let position_accessor = self.push_f32_accessor(
            &positions,
            json::accessor::Type::Vec3,
            mesh.positions.len(),
            Some(serde_json::json!(min)),
            Some(serde_json::json!(max)),
        );

        let normals: Vec<f32> = mesh.normals.iter().flat_map(|n| n.to_array()).collect();
        let normal_accessor = self.push_f32_accessor(
            &normals,
            json::accessor::Type::Vec3,
            mesh.normals.len(),
            None,
            None,
        );

        let uvs: Vec<f32> = mesh.uvs.iter().flat_map(|uv| uv.to_array()).collect();
        let uv_accessor = self.push_f32_accessor(
            &uvs,
            json::accessor::Type::Vec2,
            mesh.uvs.len(),
            None,
            None,
        );

        let colors: Vec<f32> = mesh.colors.iter().flatten().copied().collect();
        let color_accessor = self.push_f32_accessor(
            &colors,
            json::accessor::Type::Vec3,
            mesh.colors.len(),
            None,
            None,
        );

        let index_bytes: Vec<u8> = mesh.indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        let index_view = self.push_view(
            &index_bytes,
            Some(json::buffer::Target::ElementArrayBuffer),
        );
        let index_accessor = self.push_accessor(json::Accessor {
            buffer_view: Some(index_view),
            byte_offset: Some(USize64(0)),
            count: USize64::from(mesh.indices.len()),
            component_type: Checked::Valid(json::accessor::GenericComponentType(
                json::accessor::ComponentType::U32,
            )),
            type_: Checked::Valid(json::accessor::Type::Scalar),
            min: None,
            max: None,
            name: None,
            normalized: false,
            sparse: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert(
            Checked::Valid(json::mesh::Semantic::Positions),
            position_accessor,
        );
        attributes.insert(
            Checked::Valid(json::mesh::Semantic::Normals),
            normal_accessor,
        );
        attributes.insert(
            Checked::Valid(json::mesh::Semantic::TexCoords(0)),
            uv_accessor,
        );
        attributes.insert(
            Checked::Valid(json::mesh::Semantic::Colors(0)),
            color_accessor,
        );

        self.root.meshes.push(json::Mesh {
            name: Some(name.to_string()),
            primitives: vec![json::mesh::Primitive {
                attributes,
                indices: Some(index_accessor),
                material: Some(material),
                mode: Checked::Valid(json::mesh::Mode::Triangles),
                targets: None,
                extensions: Default::default(),
                extras: Default::default(),
            }],
            weights: None,
            extensions: Default::default(),
            extras: Default::default(),
        });
        json::Index::new(self.root.meshes.len() as u32 - 1)
    }

    fn add_node(&mut self, mesh: json::Index<json::Mesh>, name: &str) {
        self.root.nodes.push(json::Node {
            mesh: Some(mesh),
            name: Some(name.to_string()),
            ..Default::default()
        });
    }

    fn finish(mut self) -> Result<Vec<u8>> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        self.root.buffers.push(json::Buffer {
            byte_length: USize64::from(self.bin.len()),
            name: None,
            uri: None,
            extensions: Default::default(),
            extras: Default::default(),
        });

        let node_count = self.root.nodes.len() as u32;
        self.root.scenes.push(json::Scene {
            name: Some("Terrain".to_string()),
            nodes: (0..node_count).map(json::Index::new).collect(),
            extensions: Default::default(),
            extras: Default::default(),
        });
        self.root.scene = Some(json::Index::new(0));

        let mut json_bytes = serde_json::to_vec(&self.root)?;
        while json_bytes.len() % 4 != 0 {
            json_bytes.push(b' ');
        }

        let total = 12 + 8 + json_bytes.len() + 8 + self.bin.len();
        let total = u32::try_from(total).map_err(|_| Error::SceneTooLarge)?;

        let mut glb = Vec::with_capacity(total as usize);
        glb.extend_from_slice(&GLB_MAGIC.to_le_bytes());
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&total.to_le_bytes());
        glb.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
        glb.extend_from_slice(&CHUNK_JSON.to_le_bytes());
        glb.extend_from_slice(&json_bytes);
        glb.extend_from_slice(&(self.bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        glb.extend_from_slice(&self.bin);
        Ok(glb)
    }
}

fn push_material(
    root: &mut json::Root,
    base_color_texture: Option<json::Index<json::Texture>>,
    roughness: f32,
) -> json::Index<json::Material> {
    root.materials.push(json::Material {
        double_sided: true,
        pbr_metallic_roughness: json::material::PbrMetallicRoughness {
            base_color_texture: base_color_texture.map(|index| json::texture::Info {
                index,
                tex_coord: 0,
                extensions: Default::default(),
                extras: Default::default(),
            }),
            metallic_factor: json::material::StrengthFactor(0.0),
            roughness_factor: json::material::StrengthFactor(roughness),
            ..Default::default()
        },
        ..Default::default()
    });
    json::Index::new(root.materials.len() as u32 - 1)
}

/// Serialize the scene to a binary glTF byte buffer.
pub fn write_glb(model: &SceneModel) -> Result<Vec<u8>> {
    let mut builder = GlbBuilder::new();

    let terrain_texture = model.terrain_texture.as_ref().map(|texture| {
        let view = builder.push_view(&texture.bytes, None);
        builder.root.images.push(json::Image {
            buffer_view: Some(view),
            mime_type: Some(json::image::MimeType(texture.mime.to_string())),
            uri: None,
            name: Some("terrain".to_string()),
            extensions: Default::default(),
            extras: Default::default(),
        });
        builder.root.samplers.push(json::texture::Sampler {
            name: None,
            ..Default::default()
        });
        builder.root.textures.push(json::Texture {
            name: None,
            sampler: Some(json::Index::new(
                builder.root.samplers.len() as u32 - 1,
            )),
            source: json::Index::new(builder.root.images.len() as u32 - 1),
            extensions: Default::default(),
            extras: Default::default(),
        });
        json::Index::new(builder.root.textures.len() as u32 - 1)
    });

    let terrain_material = push_material(&mut builder.root, terrain_texture, 1.0);
    let feature_material = push_material(&mut builder.root, None, 0.95);

    let terrain_mesh = builder.add_mesh(&model.terrain, "Terrain", terrain_material);
    builder.add_node(terrain_mesh, "Terrain");

    for (category, mesh) in &model.categories {
        let index = builder.add_mesh(mesh, category.name(), feature_material);
        builder.add_node(index, category.name());
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Category, MeshData, SceneModel, TextureSlot};
    use glam::{Vec2, Vec3};

    fn triangle() -> MeshData {
        let mut mesh = MeshData::default();
        mesh.positions = vec![Vec3::ZERO, Vec3::X, Vec3::Z];
        mesh.uvs = vec![Vec2::ZERO; 3];
        mesh.colors = vec![[1.0, 1.0, 1.0]; 3];
        mesh.indices = vec![0, 1, 2];
        mesh.compute_normals();
        mesh
    }

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    #[test]
    fn glb_container_framing() {
        let model = SceneModel {
            terrain: triangle(),
            terrain_texture: None,
            categories: vec![(Category::Roads, triangle())],
        };
        let glb = write_glb(&model).unwrap();

        assert_eq!(&glb[0..4], b"glTF");
        assert_eq!(read_u32(&glb, 4), 2);
        assert_eq!(read_u32(&glb, 8) as usize, glb.len());

        let json_len = read_u32(&glb, 12) as usize;
        assert_eq!(json_len % 4, 0);
        assert_eq!(&glb[16..20], b"JSON");

        let bin_offset = 20 + json_len;
        let bin_len = read_u32(&glb, bin_offset) as usize;
        assert_eq!(bin_len % 4, 0);
        assert_eq!(&glb[bin_offset + 4..bin_offset + 7], b"BIN");
    }

    #[test]
    fn glb_json_chunk_is_valid_document() {
        let model = SceneModel {
            terrain: triangle(),
            terrain_texture: Some(TextureSlot {
                bytes: vec![0; 16],
                mime: "image/png",
            }),
            categories: Vec::new(),
        };
        let glb = write_glb(&model).unwrap();
        let json_len = read_u32(&glb, 12) as usize;
        let document: serde_json::Value =
            serde_json::from_slice(&glb[20..20 + json_len]).unwrap();
        assert_eq!(document["asset"]["version"], "2.0");
        assert_eq!(document["meshes"].as_array().unwrap().len(), 1);
        assert_eq!(document["images"].as_array().unwrap().len(), 1);
        assert_eq!(
            document["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"]["index"],
            0
        );
    }

    #[test]
    fn artifact_name_is_dated() {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 6).unwrap();
        assert_eq!(artifact_name(date), "orogen_model_2026-08-06.glb");
    }
}
