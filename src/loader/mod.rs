//! Scene asset loading.
//!
//! This module contains all logic for turning the compressed scene file into
//! the scene graph: gunzip when the magic bytes say so, parse binary glTF,
//! decode embedded base-color textures once, reconstruct missing normals,
//! and invoke the caller's per-mesh visitor on every geometry before the
//! scene is handed back. The visitor is where the bounding-volume hierarchy
//! gets attached, so a returned scene is always ready for ray queries.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cgmath::{Matrix4, Point3};
use flate2::read::GzDecoder;
use instant::Instant;
use thiserror::Error;

use crate::scene::mesh::{Geometry, Material, TextureData};
use crate::scene::{MeshAsset, Node, NodeKind, PointLight, Scene};

/// Everything that can go wrong between the file path and a usable scene.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read scene asset {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decompress scene asset")]
    Decompress(#[source] std::io::Error),
    #[error("malformed scene asset")]
    Gltf(#[from] gltf::Error),
    #[error("failed to decode texture image")]
    Image(#[from] image::ImageError),
    #[error("buffer source {0:?} is not supported")]
    Buffer(String),
    #[error("mesh {0:?} has no vertex positions")]
    MissingPositions(String),
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Load a scene asset and run `on_mesh` over every geometry.
///
/// `on_mesh` is invoked after a geometry is fully decoded and before the
/// scene is returned; the application passes the spatial-index builder here,
/// tests pass counters.
pub async fn load_scene(
    path: impl AsRef<Path>,
    on_mesh: &mut dyn FnMut(&mut Geometry),
) -> Result<Scene, LoadError> {
    let path = path.as_ref();
    let started = Instant::now();

    let raw = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = maybe_gunzip(raw)?;

    let gltf = gltf::Gltf::from_slice(&bytes)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    // Buffers first, everything else reads through them.
    let mut buffer_data: Vec<Vec<u8>> = Vec::new();
    for buffer in gltf.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                if let Some(blob) = gltf.blob.as_deref() {
                    buffer_data.push(blob.to_vec());
                }
            }
            gltf::buffer::Source::Uri(uri) => {
                if uri.starts_with("data:") {
                    return Err(LoadError::Buffer(uri.to_string()));
                }
                let buffer_path = base_dir.join(uri);
                let bin = std::fs::read(&buffer_path).map_err(|source| LoadError::Io {
                    path: buffer_path,
                    source,
                })?;
                buffer_data.push(bin);
            }
        }
    }

    // Decode each referenced image once; materials share by image index.
    let mut texture_cache: HashMap<usize, Arc<TextureData>> = HashMap::new();
    let mut materials = Vec::new();
    for material in gltf.materials() {
        let pbr = material.pbr_metallic_roughness();
        let base_color_texture = match pbr.base_color_texture() {
            Some(info) => Some(load_texture(
                &info.texture(),
                &buffer_data,
                base_dir,
                &mut texture_cache,
            )?),
            None => None,
        };
        materials.push(Material {
            name: material.name().map(str::to_string),
            base_color: pbr.base_color_factor(),
            emissive: material.emissive_factor(),
            base_color_texture,
            gpu: None,
        });
    }
    // Primitives without a material slot fall back to this one.
    let neutral_material = materials.len();
    materials.push(Material::neutral());

    let mut roots = Vec::new();
    for scene in gltf.scenes() {
        for node in scene.nodes() {
            roots.push(to_scene_node(
                node,
                &buffer_data,
                neutral_material,
                on_mesh,
            )?);
        }
    }

    let scene = Scene { roots, materials };
    log::info!(
        "decoded {:?}: {} meshes, {} lights in {:?}",
        path,
        scene.mesh_count(),
        scene.collect_lights().len(),
        started.elapsed()
    );
    Ok(scene)
}

fn maybe_gunzip(raw: Vec<u8>) -> Result<Vec<u8>, LoadError> {
    if raw.len() < 2 || raw[..2] != GZIP_MAGIC {
        return Ok(raw);
    }
    let mut decoded = Vec::new();
    GzDecoder::new(raw.as_slice())
        .read_to_end(&mut decoded)
        .map_err(LoadError::Decompress)?;
    Ok(decoded)
}

fn load_texture(
    texture: &gltf::Texture,
    buffer_data: &[Vec<u8>],
    base_dir: &Path,
    cache: &mut HashMap<usize, Arc<TextureData>>,
) -> Result<Arc<TextureData>, LoadError> {
    let image = texture.source();
    if let Some(cached) = cache.get(&image.index()) {
        return Ok(cached.clone());
    }
    let encoded: Vec<u8> = match image.source() {
        gltf::image::Source::View { view, .. } => {
            let start = view.offset();
            let end = start + view.length();
            buffer_data[view.buffer().index()][start..end].to_vec()
        }
        gltf::image::Source::Uri { uri, .. } => {
            if uri.starts_with("data:") {
                return Err(LoadError::Buffer(uri.to_string()));
            }
            let image_path = base_dir.join(uri);
            std::fs::read(&image_path).map_err(|source| LoadError::Io {
                path: image_path,
                source,
            })?
        }
    };
    let decoded = image::load_from_memory(&encoded)?.to_rgba8();
    let data = Arc::new(TextureData {
        width: decoded.width(),
        height: decoded.height(),
        pixels: decoded.into_raw(),
    });
    cache.insert(image.index(), data.clone());
    Ok(data)
}

fn to_geometry(
    name: String,
    primitive: &gltf::Primitive,
    buffer_data: &[Vec<u8>],
) -> Result<Geometry, LoadError> {
    let reader = primitive.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| LoadError::MissingPositions(name.clone()))?
        .collect();
    let normals: Vec<[f32; 3]> = reader
        .read_normals()
        .map(|iter| iter.collect())
        .unwrap_or_default();
    let uvs: Vec<[f32; 2]> = reader
        .read_tex_coords(0)
        .map(|iter| iter.into_f32().collect())
        .unwrap_or_default();
    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        // Unindexed primitives are plain triangle lists.
        None => (0..positions.len() as u32).collect(),
    };

    let mut geometry = Geometry::new(name, positions, normals, uvs, indices);
    if geometry.normals.is_empty() {
        geometry.compute_normals();
    }
    Ok(geometry)
}

fn to_scene_node(
    node: gltf::scene::Node,
    buffer_data: &[Vec<u8>],
    neutral_material: usize,
    on_mesh: &mut dyn FnMut(&mut Geometry),
) -> Result<Node, LoadError> {
    let name = node.name().map(str::to_string);
    let transform = Matrix4::from(node.transform().matrix());

    let kind = if let Some(light) = node.light() {
        to_point_light(&light)
            .map(NodeKind::Light)
            .unwrap_or(NodeKind::Group)
    } else if let Some(mesh) = node.mesh() {
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));
        let primitive_count = mesh.primitives().count();
        let mut assets = Vec::new();
        for (i, primitive) in mesh.primitives().enumerate() {
            let label = if primitive_count > 1 {
                format!("{}.{}", mesh_name, i)
            } else {
                mesh_name.clone()
            };
            let mut geometry = to_geometry(label, &primitive, buffer_data)?;
            on_mesh(&mut geometry);
            assets.push(MeshAsset {
                geometry: Arc::new(geometry),
                material: primitive
                    .material()
                    .index()
                    .unwrap_or(neutral_material),
                gpu: None,
            });
        }
        if assets.len() == 1 {
            NodeKind::Mesh(assets.remove(0))
        } else {
            // Multi-primitive meshes become a group of one node per
            // primitive so every geometry keeps its own material slot.
            let mut group = Node::group(Some(mesh_name), Matrix4::from_scale(1.0));
            group.children = assets
                .into_iter()
                .map(|asset| Node {
                    name: None,
                    transform: Matrix4::from_scale(1.0),
                    kind: NodeKind::Mesh(asset),
                    children: Vec::new(),
                })
                .collect();
            let mut parent = Node::group(name, transform);
            parent.children.push(group);
            for child in node.children() {
                parent
                    .children
                    .push(to_scene_node(child, buffer_data, neutral_material, on_mesh)?);
            }
            return Ok(parent);
        }
    } else {
        NodeKind::Group
    };

    let mut scene_node = Node {
        name,
        transform,
        kind,
        children: Vec::new(),
    };
    for child in node.children() {
        scene_node
            .children
            .push(to_scene_node(child, buffer_data, neutral_material, on_mesh)?);
    }
    Ok(scene_node)
}

fn to_point_light(light: &gltf::khr_lights_punctual::Light) -> Option<PointLight> {
    match light.kind() {
        gltf::khr_lights_punctual::Kind::Point => Some(PointLight {
            position: Point3::new(0.0, 0.0, 0.0),
            color: light.color(),
            intensity: light.intensity(),
        }),
        // Directional and spot lights are not part of this viewer's lighting
        // model, skip them rather than approximate.
        _ => {
            log::debug!("skipping non-point light {:?}", light.name());
            None
        }
    }
}
