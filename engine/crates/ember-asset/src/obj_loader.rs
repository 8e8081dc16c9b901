use std::path::Path;

use anyhow::Context;
use glam::{Vec2, Vec3};

use crate::asset_path::path_key;
use crate::loader::ModelLoader;
use crate::raw::{RawMaterial, RawModel, RawSubMesh, RawTextureRef, RawVertex};

/// 基于 `tobj` 的 obj 加载器
///
/// 每个 obj model 成为一个 submesh，所有 submesh 共享同一份顶点和索引数组
#[derive(Default)]
pub struct ObjModelLoader;

impl ModelLoader for ObjModelLoader {
    fn load_model(&self, path: &Path) -> anyhow::Result<RawModel> {
        let _span = tracy_client::span!("ObjModelLoader::load_model");
        let (models, materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                single_index: true,
                triangulate: true,
                ignore_lines: true,
                ignore_points: true,
                ..Default::default()
            },
        )
        .with_context(|| format!("asset: load obj {}", path.display()))?;

        let materials = materials.unwrap_or_else(|e| {
            log::warn!("obj {} has no usable mtl: {}", path.display(), e);
            Vec::new()
        });

        let base_dir = path.parent().unwrap_or(Path::new(""));
        let model = build_model(&models, &materials, base_dir, &path_key(path));
        log::info!(
            "Loaded obj {}: {} vertices, {} indices, {} submeshes, {} materials",
            path.display(),
            model.vertices.len(),
            model.indices.len(),
            model.submeshes.len(),
            model.materials.len()
        );
        Ok(model)
    }
}

/// material 的名字使用 `<模型 key>#<mtl 名字>`，保证跨文件唯一
fn build_model(models: &[tobj::Model], materials: &[tobj::Material], base_dir: &Path, model_key: &str) -> RawModel {
    let mut raw = RawModel {
        materials: materials.iter().map(|m| convert_material(m, base_dir, model_key)).collect(),
        ..Default::default()
    };

    for model in models {
        let mesh = &model.mesh;
        if mesh.indices.is_empty() {
            log::warn!("skip empty obj model: {}", model.name);
            continue;
        }

        let vertex_count = mesh.positions.len() / 3;
        let first_vertex = raw.vertices.len();
        raw.vertices.extend((0..vertex_count).map(|i| RawVertex {
            position: [mesh.positions[3 * i], mesh.positions[3 * i + 1], mesh.positions[3 * i + 2]],
            normal: if mesh.normals.len() >= 3 * (i + 1) {
                [mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2]]
            } else {
                [0.0, 1.0, 0.0]
            },
            // obj 的 v 轴朝上，vulkan 的纹理坐标朝下
            uv: if mesh.texcoords.len() >= 2 * (i + 1) {
                [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            },
            tangent: [1.0, 0.0, 0.0, 1.0],
        }));
        compute_tangents(&mut raw.vertices[first_vertex..], &mesh.indices);

        raw.submeshes.push(RawSubMesh {
            index_count: mesh.indices.len() as u32,
            first_index: raw.indices.len() as u32,
            vertex_offset: first_vertex as i32,
            material_index: mesh.material_id.filter(|&id| id < raw.materials.len()),
        });
        raw.indices.extend_from_slice(&mesh.indices);
    }

    raw
}

fn convert_material(material: &tobj::Material, base_dir: &Path, model_key: &str) -> RawMaterial {
    let texture = |name: Option<&String>| name.map(|n| RawTextureRef::from_path(base_dir.join(n))).unwrap_or_default();
    let param = |key: &str| material.unknown_param.get(key);

    let mut raw = RawMaterial::new(format!("{}#{}", model_key, material.name));
    if let Some([r, g, b]) = material.diffuse {
        raw.base_color_factor = [r, g, b, material.dissolve.unwrap_or(1.0)];
    }
    // PBR 扩展参数：Pm / Pr / map_Pm
    if let Some(metallic) = param("Pm").and_then(|v| v.trim().parse().ok()) {
        raw.metallic_factor = metallic;
    }
    if let Some(roughness) = param("Pr").and_then(|v| v.trim().parse().ok()) {
        raw.roughness_factor = roughness;
    }

    raw.albedo = texture(material.diffuse_texture.as_ref());
    raw.normal = texture(material.normal_texture.as_ref().or_else(|| param("map_bump")));
    raw.metallic_roughness = texture(param("map_Pm"));
    raw
}

/// 按三角形累加切线，最后做 Gram-Schmidt 正交化
fn compute_tangents(vertices: &mut [RawVertex], indices: &[u32]) {
    let mut tangents = vec![Vec3::ZERO; vertices.len()];
    let mut bitangents = vec![Vec3::ZERO; vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        if i0 >= vertices.len() || i1 >= vertices.len() || i2 >= vertices.len() {
            continue;
        }
        let p = |i: usize| Vec3::from(vertices[i].position);
        let uv = |i: usize| Vec2::from(vertices[i].uv);

        let e1 = p(i1) - p(i0);
        let e2 = p(i2) - p(i0);
        let d1 = uv(i1) - uv(i0);
        let d2 = uv(i2) - uv(i0);
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let b = (e2 * d1.x - e1 * d2.x) * r;
        for i in [i0, i1, i2] {
            tangents[i] += t;
            bitangents[i] += b;
        }
    }

    for (i, vertex) in vertices.iter_mut().enumerate() {
        let n = Vec3::from(vertex.normal);
        let t = tangents[i] - n * n.dot(tangents[i]);
        if t.length_squared() < f32::EPSILON {
            continue;
        }
        let t = t.normalize();
        let w = if n.cross(t).dot(bitangents[i]) < 0.0 { -1.0 } else { 1.0 };
        vertex.tangent = [t.x, t.y, t.z, w];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_model(name: &str, material_id: Option<usize>) -> tobj::Model {
        let mesh = tobj::Mesh {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
            texcoords: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
            indices: vec![0, 1, 2, 0, 2, 3],
            material_id,
            ..Default::default()
        };
        tobj::Model::new(mesh, name.to_string())
    }

    #[test]
    fn test_submeshes_share_buffers() {
        let models = [quad_model("a", Some(0)), quad_model("b", None)];
        let materials = [tobj::Material {
            name: "red".to_string(),
            diffuse: Some([1.0, 0.0, 0.0]),
            diffuse_texture: Some("red.png".to_string()),
            ..Default::default()
        }];
        let raw = build_model(&models, &materials, Path::new("assets"), "assets/quad.obj");

        assert_eq!(raw.vertices.len(), 8);
        assert_eq!(raw.indices.len(), 12);
        assert_eq!(raw.submeshes.len(), 2);
        assert_eq!(raw.submeshes[1].first_index, 6);
        assert_eq!(raw.submeshes[1].vertex_offset, 4);
        assert_eq!(raw.submeshes[0].material_index, Some(0));
        assert_eq!(raw.submeshes[1].material_index, None);

        assert_eq!(raw.materials[0].name, "assets/quad.obj#red");
        assert_eq!(raw.materials[0].base_color_factor, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(raw.materials[0].albedo.path.as_deref(), Some(Path::new("assets/red.png")));
        assert!(raw.materials[0].normal.is_empty());
    }

    #[test]
    fn test_out_of_range_material_dropped() {
        let raw = build_model(&[quad_model("a", Some(3))], &[], Path::new(""), "x.obj");
        assert_eq!(raw.submeshes[0].material_index, None);
    }

    #[test]
    fn test_tangent_along_u() {
        let raw = build_model(&[quad_model("a", None)], &[], Path::new(""), "x.obj");
        let t = raw.vertices[0].tangent;
        assert!((t[0] - 1.0).abs() < 1e-5);
        assert!(t[1].abs() < 1e-5);
        // uv 翻转之后 bitangent 与 n x t 反向
        assert_eq!(t[3], -1.0);
    }

    #[test]
    fn test_pbr_params() {
        let mut material = tobj::Material {
            name: "m".to_string(),
            ..Default::default()
        };
        material.unknown_param.insert("Pm".to_string(), "0.5".to_string());
        material.unknown_param.insert("Pr".to_string(), " 0.25".to_string());
        let raw = convert_material(&material, Path::new("d"), "k");
        assert_eq!(raw.metallic_factor, 0.5);
        assert_eq!(raw.roughness_factor, 0.25);
    }
}
