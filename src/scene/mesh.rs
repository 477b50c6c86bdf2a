//! Mesh geometry, materials and their GPU resources.
//!
//! `Geometry` is the CPU side of a mesh: vertex arrays, an index list and the
//! bounding-volume hierarchy attached once at load time. It lives behind an
//! `Arc` so the scene graph, the snapshot handed to the path tracer and the
//! GPU upload all share one copy. `GpuMesh`/`GpuMaterial` are the buffers and
//! bind groups the raster pipeline draws from.

use std::sync::Arc;

use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, SquareMatrix, Vector3};
use wgpu::util::DeviceExt;

use crate::accel::Bvh;

/// Trait for vertex buffer layouts, implemented by every type that is put in
/// a GPU vertex buffer.
pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

/// Triangle mesh data in mesh-local space.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    bounds_tree: Option<Bvh>,
}

impl Geometry {
    pub fn new(
        name: String,
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        uvs: Vec<[f32; 2]>,
        indices: Vec<u32>,
    ) -> Self {
        Self {
            name,
            positions,
            normals,
            uvs,
            indices,
            bounds_tree: None,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Build and attach the bounding-volume hierarchy.
    ///
    /// Attached exactly once, at load time; there is no incremental rebuild.
    /// A second call is a no-op so the augmentation pass stays idempotent.
    pub fn attach_bounds_tree(&mut self) {
        if self.bounds_tree.is_some() {
            log::warn!(
                "bounds tree for {:?} already attached, keeping the existing one",
                self.name
            );
            return;
        }
        self.bounds_tree = Some(Bvh::build(&self.positions, &self.indices));
    }

    pub fn bounds_tree(&self) -> Option<&Bvh> {
        self.bounds_tree.as_ref()
    }

    /// Area-weighted vertex normals for meshes that ship without them.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vector3::new(0.0f32, 0.0, 0.0); self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let p0: Vector3<f32> = self.positions[tri[0] as usize].into();
            let p1: Vector3<f32> = self.positions[tri[1] as usize].into();
            let p2: Vector3<f32> = self.positions[tri[2] as usize].into();
            // Cross product length is twice the triangle area, which gives
            // the area weighting for free.
            let n = (p1 - p0).cross(p2 - p0);
            for &i in tri {
                normals[i as usize] += n;
            }
        }
        self.normals = normals
            .into_iter()
            .map(|n| {
                if n.magnitude2() > 0.0 {
                    n.normalize().into()
                } else {
                    [0.0, 1.0, 0.0]
                }
            })
            .collect();
    }
}

/// Decoded RGBA8 texel data, shared between the raster upload and the CPU
/// path tracer.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Nearest-neighbour sample with wrap addressing, converted from the
    /// stored sRGB encoding to linear radiance for the integrator.
    pub fn sample(&self, u: f32, v: f32) -> [f32; 3] {
        let x = ((u.rem_euclid(1.0) * self.width as f32) as u32).min(self.width - 1);
        let y = ((v.rem_euclid(1.0) * self.height as f32) as u32).min(self.height - 1);
        let i = ((y * self.width + x) * 4) as usize;
        let to_linear = |c: u8| ((c as f32 / 255.0).powf(2.2)).min(1.0);
        [
            to_linear(self.pixels[i]),
            to_linear(self.pixels[i + 1]),
            to_linear(self.pixels[i + 2]),
        ]
    }
}

/// Surface description shared by both render strategies.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: Option<String>,
    /// Linear base color factor, multiplied with the texture when present.
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub base_color_texture: Option<Arc<TextureData>>,
    pub gpu: Option<GpuMaterial>,
}

impl Material {
    pub fn neutral() -> Self {
        Self {
            name: None,
            base_color: [1.0, 1.0, 1.0, 1.0],
            emissive: [0.0, 0.0, 0.0],
            base_color_texture: None,
            gpu: None,
        }
    }
}

/// The uniform block the raster shader reads for a material.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    // Uniforms require 16 byte spacing, pad the vec3 out.
    pub _padding: u32,
}

/// Material resources bound during the raster pass.
#[derive(Clone, Debug)]
pub struct GpuMaterial {
    pub bind_group: wgpu::BindGroup,
}

/// What the raster vertex shader consumes per vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub tex_coords: [f32; 2],
    pub normal: [f32; 3],
}

impl Vertex for MeshVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 5]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/**
 * The raw instance is the actual data stored on the GPU: the node's composed
 * world matrix plus the normal matrix (inverse transpose of its upper 3x3).
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    model: [[f32; 4]; 4],
    normal: [[f32; 3]; 3],
}

impl InstanceRaw {
    pub fn from_world(world: &Matrix4<f32>) -> Self {
        let linear = Matrix3::from_cols(
            world.x.truncate(),
            world.y.truncate(),
            world.z.truncate(),
        );
        let normal = linear
            .invert()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix3::identity);
        Self {
            model: (*world).into(),
            normal: normal.into(),
        }
    }
}

impl Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        use std::mem;
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            // Step per instance, not per vertex: the shader reads the next
            // matrix only when a new instance starts.
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // A mat4 takes up 4 vertex slots as it is technically 4 vec4s.
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // Normal matrix as 3 vec3 columns.
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// GPU buffers for one mesh node, world transform baked into the instance
/// buffer at upload time.
#[derive(Debug)]
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub instance_buffer: wgpu::Buffer,
    pub num_elements: u32,
}

impl GpuMesh {
    pub fn upload(device: &wgpu::Device, geometry: &Geometry, world: &Matrix4<f32>) -> Self {
        let vertices: Vec<MeshVertex> = (0..geometry.positions.len())
            .map(|i| MeshVertex {
                position: geometry.positions[i],
                tex_coords: geometry.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
                normal: geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            })
            .collect();

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", geometry.name)),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let instance_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Instance Buffer"),
            contents: bytemuck::cast_slice(&[InstanceRaw::from_world(world)]),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            instance_buffer,
            num_elements: geometry.indices.len() as u32,
        }
    }
}
