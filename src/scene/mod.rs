//! Scene graph and traversal.
//!
//! The loaded asset becomes a tree of [`Node`]s with a tagged [`NodeKind`]
//! (group, mesh or light) instead of downcast checks during traversal.
//! Traversal happens through the [`NodeVisitor`] trait, which receives every
//! node together with its composed world transform. The graph is produced
//! once by the loader, augmented once with bounding-volume hierarchies, and
//! read-only afterwards.

use std::sync::Arc;

use cgmath::{Matrix4, Point3, SquareMatrix, Transform};

use crate::scene::mesh::{Geometry, GpuMesh, Material, TextureData};

pub mod mesh;

/// A point light, either imported from the asset or one of the viewer's
/// built-in fill lights.
#[derive(Clone, Copy, Debug)]
pub struct PointLight {
    pub position: Point3<f32>,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// A mesh attached to a scene node: shared geometry, a material slot, and
/// GPU buffers created lazily after the device exists.
#[derive(Debug)]
pub struct MeshAsset {
    pub geometry: Arc<Geometry>,
    pub material: usize,
    pub gpu: Option<GpuMesh>,
}

/// What a node contributes to the scene, as a tagged variant.
#[derive(Debug)]
pub enum NodeKind {
    Group,
    Mesh(MeshAsset),
    Light(PointLight),
}

#[derive(Debug)]
pub struct Node {
    pub name: Option<String>,
    /// Transform relative to the parent node.
    pub transform: Matrix4<f32>,
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    pub fn group(name: Option<String>, transform: Matrix4<f32>) -> Self {
        Self {
            name,
            transform,
            kind: NodeKind::Group,
            children: Vec::new(),
        }
    }
}

/// Typed traversal over the scene tree.
///
/// Implement only the hooks you need; `world` is the transform composed from
/// the root down to (and including) the visited node.
pub trait NodeVisitor {
    fn visit_group(&mut self, _node: &Node, _world: &Matrix4<f32>) {}
    fn visit_mesh(&mut self, _mesh: &MeshAsset, _world: &Matrix4<f32>) {}
    fn visit_light(&mut self, _light: &PointLight, _world: &Matrix4<f32>) {}
}

/// One mesh placement flattened out of the graph: the shared geometry plus
/// the world transform it is drawn with.
#[derive(Clone, Debug)]
pub struct MeshInstance {
    pub geometry: Arc<Geometry>,
    pub world: Matrix4<f32>,
    pub material: usize,
}

/// CPU-only material fields, detached from any GPU resources so the snapshot
/// can cross into the upload thread.
#[derive(Clone, Debug)]
pub struct MaterialData {
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub texture: Option<Arc<TextureData>>,
}

/// Everything the path tracer needs from the scene, with no GPU handles and
/// no references back into the graph.
#[derive(Clone, Debug)]
pub struct SceneSnapshot {
    pub instances: Vec<MeshInstance>,
    pub materials: Vec<MaterialData>,
    pub lights: Vec<PointLight>,
}

#[derive(Debug, Default)]
pub struct Scene {
    pub roots: Vec<Node>,
    pub materials: Vec<Material>,
}

impl Scene {
    /// Walk the tree depth-first, composing world transforms on the way down.
    pub fn visit(&self, visitor: &mut dyn NodeVisitor) {
        let identity = Matrix4::identity();
        for root in &self.roots {
            visit_node(root, &identity, visitor);
        }
    }

    /// Mutable walk over every mesh, used for the one-time GPU upload.
    pub fn visit_meshes_mut(&mut self, f: &mut dyn FnMut(&mut MeshAsset, &Matrix4<f32>)) {
        let identity = Matrix4::identity();
        for root in &mut self.roots {
            visit_meshes_mut(root, &identity, f);
        }
    }

    /// All lights in world space.
    pub fn collect_lights(&self) -> Vec<PointLight> {
        struct Lights(Vec<PointLight>);
        impl NodeVisitor for Lights {
            fn visit_light(&mut self, light: &PointLight, world: &Matrix4<f32>) {
                self.0.push(PointLight {
                    position: world.transform_point(light.position),
                    ..*light
                });
            }
        }
        let mut lights = Lights(Vec::new());
        self.visit(&mut lights);
        lights.0
    }

    /// Number of mesh nodes in the graph.
    pub fn mesh_count(&self) -> usize {
        struct Count(usize);
        impl NodeVisitor for Count {
            fn visit_mesh(&mut self, _: &MeshAsset, _: &Matrix4<f32>) {
                self.0 += 1;
            }
        }
        let mut count = Count(0);
        self.visit(&mut count);
        count.0
    }

    /// Flatten the graph into the form the scene upload consumes.
    ///
    /// `lights` is the final light table (asset lights merged with the
    /// viewer's built-ins); geometry is shared by `Arc`, not copied.
    pub fn snapshot(&self, lights: Vec<PointLight>) -> SceneSnapshot {
        struct Collect(Vec<MeshInstance>);
        impl NodeVisitor for Collect {
            fn visit_mesh(&mut self, mesh: &MeshAsset, world: &Matrix4<f32>) {
                self.0.push(MeshInstance {
                    geometry: mesh.geometry.clone(),
                    world: *world,
                    material: mesh.material,
                });
            }
        }
        let mut collect = Collect(Vec::new());
        self.visit(&mut collect);

        SceneSnapshot {
            instances: collect.0,
            materials: self
                .materials
                .iter()
                .map(|m| MaterialData {
                    base_color: m.base_color,
                    emissive: m.emissive,
                    texture: m.base_color_texture.clone(),
                })
                .collect(),
            lights,
        }
    }
}

fn visit_node(node: &Node, parent: &Matrix4<f32>, visitor: &mut dyn NodeVisitor) {
    let world = parent * node.transform;
    match &node.kind {
        NodeKind::Group => visitor.visit_group(node, &world),
        NodeKind::Mesh(mesh) => visitor.visit_mesh(mesh, &world),
        NodeKind::Light(light) => visitor.visit_light(light, &world),
    }
    for child in &node.children {
        visit_node(child, &world, visitor);
    }
}

fn visit_meshes_mut(
    node: &mut Node,
    parent: &Matrix4<f32>,
    f: &mut dyn FnMut(&mut MeshAsset, &Matrix4<f32>),
) {
    let world = parent * node.transform;
    if let NodeKind::Mesh(mesh) = &mut node.kind {
        f(mesh, &world);
    }
    for child in &mut node.children {
        visit_meshes_mut(child, &world, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Vector3;

    fn triangle_geometry() -> Arc<Geometry> {
        let mut g = Geometry::new(
            "tri".to_string(),
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0.0, 0.0, 1.0]; 3],
            vec![[0.0, 0.0]; 3],
            vec![0, 1, 2],
        );
        g.attach_bounds_tree();
        Arc::new(g)
    }

    fn two_level_scene() -> Scene {
        let mut root = Node::group(
            Some("root".to_string()),
            Matrix4::from_translation(Vector3::new(1.0, 0.0, 0.0)),
        );
        root.children.push(Node {
            name: Some("mesh".to_string()),
            transform: Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0)),
            kind: NodeKind::Mesh(MeshAsset {
                geometry: triangle_geometry(),
                material: 0,
                gpu: None,
            }),
            children: Vec::new(),
        });
        root.children.push(Node {
            name: None,
            transform: Matrix4::from_translation(Vector3::new(0.0, 0.0, 3.0)),
            kind: NodeKind::Light(PointLight {
                position: Point3::new(0.0, 0.0, 0.0),
                color: [1.0, 1.0, 1.0],
                intensity: 10.0,
            }),
            children: Vec::new(),
        });
        Scene {
            roots: vec![root],
            materials: vec![Material::neutral()],
        }
    }

    #[test]
    fn visitor_composes_world_transforms() {
        let scene = two_level_scene();
        let snapshot = scene.snapshot(scene.collect_lights());

        assert_eq!(snapshot.instances.len(), 1);
        let world = snapshot.instances[0].world;
        let p = world.transform_point(Point3::new(0.0, 0.0, 0.0));
        assert_eq!(p, Point3::new(1.0, 2.0, 0.0));

        assert_eq!(snapshot.lights.len(), 1);
        assert_eq!(snapshot.lights[0].position, Point3::new(1.0, 0.0, 3.0));
    }

    #[test]
    fn counts_mesh_nodes_only() {
        let scene = two_level_scene();
        assert_eq!(scene.mesh_count(), 1);
    }

    #[test]
    fn snapshot_shares_geometry() {
        let scene = two_level_scene();
        let snapshot = scene.snapshot(Vec::new());
        let in_scene = match &scene.roots[0].children[0].kind {
            NodeKind::Mesh(m) => Arc::as_ptr(&m.geometry),
            _ => unreachable!(),
        };
        assert_eq!(in_scene, Arc::as_ptr(&snapshot.instances[0].geometry));
    }
}
