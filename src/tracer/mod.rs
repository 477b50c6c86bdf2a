//! Progressive CPU path tracer.
//!
//! Once the scene upload completes, this renderer takes over from the raster
//! preview: every frame accumulates one jittered sample per film pixel,
//! parallelized over rows with rayon. The integrator is a small diffuse path
//! tracer with next-event estimation against the scene's point lights,
//! emissive surfaces and a constant sky term. Any camera movement throws the
//! accumulated samples away.

use std::sync::Arc;

use cgmath::{InnerSpace, Matrix, Matrix3, Matrix4, Point3, SquareMatrix, Transform, Vector3};
use rand::Rng;
use rayon::prelude::*;

use crate::accel::{Aabb, Ray};
use crate::camera::{Camera, Projection};
use crate::scene::mesh::{Geometry, TextureData};
use crate::scene::{PointLight, SceneSnapshot};
use crate::tracer::film::Film;

pub mod film;
pub mod upload;

/// Offset applied to secondary ray origins to avoid self-intersection.
const RAY_EPSILON: f32 = 1e-4;
/// Bounce limit for the diffuse walk.
const MAX_DEPTH: u32 = 4;
/// Constant sky radiance for rays that leave the scene.
pub(crate) const SKY_RADIANCE: [f32; 3] = [0.02, 0.02, 0.025];

/// Material table entry in the form the integrator consumes.
#[derive(Clone, Debug)]
pub struct TracerMaterial {
    pub base_color: [f32; 3],
    pub emissive: [f32; 3],
    pub texture: Option<Arc<TextureData>>,
}

impl TracerMaterial {
    pub fn from_data(data: &crate::scene::MaterialData) -> Self {
        Self {
            base_color: [data.base_color[0], data.base_color[1], data.base_color[2]],
            emissive: data.emissive,
            texture: data.texture.clone(),
        }
    }

    fn albedo(&self, uv: [f32; 2]) -> Vector3<f32> {
        let factor = Vector3::from(self.base_color);
        match &self.texture {
            Some(tex) => {
                let t = tex.sample(uv[0], uv[1]);
                Vector3::new(factor.x * t[0], factor.y * t[1], factor.z * t[2])
            }
            None => factor,
        }
    }
}

/// One mesh placement in the committed scene: shared geometry plus the
/// matrices to move rays in and hits back out of mesh-local space.
#[derive(Clone, Debug)]
pub struct TracerInstance {
    pub geometry: Arc<Geometry>,
    pub world: Matrix4<f32>,
    pub inv_world: Matrix4<f32>,
    pub normal_matrix: Matrix3<f32>,
    pub material: usize,
    /// World-space bounds, for the per-instance early out.
    pub bounds: Aabb,
}

impl TracerInstance {
    /// Build from a snapshot instance; `None` when the transform cannot be
    /// inverted (zero scale), in which case the instance is skipped.
    pub fn build(
        geometry: Arc<Geometry>,
        world: Matrix4<f32>,
        material: usize,
    ) -> Option<Self> {
        let inv_world = world.invert()?;
        let linear = Matrix3::from_cols(
            world.x.truncate(),
            world.y.truncate(),
            world.z.truncate(),
        );
        let normal_matrix = linear.invert()?.transpose();

        let local = geometry.bounds_tree()?.root_bounds();
        let mut bounds = Aabb::empty();
        for corner in 0..8 {
            let p = Point3::new(
                if corner & 1 == 0 { local.min.x } else { local.max.x },
                if corner & 2 == 0 { local.min.y } else { local.max.y },
                if corner & 4 == 0 { local.min.z } else { local.max.z },
            );
            bounds.grow(world.transform_point(p));
        }

        Some(Self {
            geometry,
            world,
            inv_world,
            normal_matrix,
            material,
            bounds,
        })
    }
}

/// A surface hit in world space, ready for shading.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceHit {
    pub t: f32,
    pub position: Point3<f32>,
    pub normal: Vector3<f32>,
    pub uv: [f32; 2],
    pub material: usize,
}

/// The flattened, immutable scene the integrator traces against.
#[derive(Clone, Debug, Default)]
pub struct TracerScene {
    pub instances: Vec<TracerInstance>,
    pub materials: Vec<TracerMaterial>,
    pub lights: Vec<PointLight>,
    pub sky: [f32; 3],
}

impl TracerScene {
    /// Flatten a scene snapshot. This is what the upload thread spends its
    /// time on; it is also callable directly for synchronous tests.
    pub fn from_snapshot(snapshot: &SceneSnapshot) -> Self {
        let mut instances = Vec::with_capacity(snapshot.instances.len());
        for instance in &snapshot.instances {
            match TracerInstance::build(
                instance.geometry.clone(),
                instance.world,
                instance.material,
            ) {
                Some(built) => instances.push(built),
                None => log::warn!(
                    "skipping mesh {:?}: singular transform or missing bounds tree",
                    instance.geometry.name
                ),
            }
        }
        Self {
            instances,
            materials: snapshot
                .materials
                .iter()
                .map(TracerMaterial::from_data)
                .collect(),
            lights: snapshot.lights.clone(),
            sky: SKY_RADIANCE,
        }
    }

    /// Closest hit along `ray`, searching every instance whose bounds the
    /// ray touches. Rays are moved into mesh-local space unnormalized so the
    /// hit parameter needs no rescaling on the way back.
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<SurfaceHit> {
        let mut closest = t_max;
        let mut best: Option<(usize, crate::accel::RawHit)> = None;

        for (index, instance) in self.instances.iter().enumerate() {
            if !instance.bounds.hit(ray, RAY_EPSILON, closest) {
                continue;
            }
            let Some(bvh) = instance.geometry.bounds_tree() else {
                continue;
            };
            let local = Ray::new(
                instance.inv_world.transform_point(ray.origin),
                instance.inv_world.transform_vector(ray.direction),
            );
            if let Some(hit) = bvh.intersect(
                &instance.geometry.positions,
                &instance.geometry.indices,
                &local,
                RAY_EPSILON,
                closest,
            ) {
                closest = hit.t;
                best = Some((index, hit));
            }
        }

        let (index, raw) = best?;
        let instance = &self.instances[index];
        let geometry = &instance.geometry;
        let base = raw.triangle as usize * 3;
        let (i0, i1, i2) = (
            geometry.indices[base] as usize,
            geometry.indices[base + 1] as usize,
            geometry.indices[base + 2] as usize,
        );
        let w = 1.0 - raw.u - raw.v;

        let vertex_attr = |attrs: &[[f32; 3]], fallback: Vector3<f32>| -> Vector3<f32> {
            if attrs.is_empty() {
                fallback
            } else {
                Vector3::from(attrs[i0]) * w
                    + Vector3::from(attrs[i1]) * raw.u
                    + Vector3::from(attrs[i2]) * raw.v
            }
        };

        let local_normal = vertex_attr(&geometry.normals, Vector3::unit_y());
        let mut normal = (instance.normal_matrix * local_normal).normalize();
        // Shade both sides: flip towards the incoming ray.
        if normal.dot(ray.direction) > 0.0 {
            normal = -normal;
        }

        let uv = if geometry.uvs.is_empty() {
            [0.0, 0.0]
        } else {
            let (a, b, c) = (geometry.uvs[i0], geometry.uvs[i1], geometry.uvs[i2]);
            [
                a[0] * w + b[0] * raw.u + c[0] * raw.v,
                a[1] * w + b[1] * raw.u + c[1] * raw.v,
            ]
        };

        Some(SurfaceHit {
            t: raw.t,
            position: ray.at(raw.t),
            normal,
            uv,
            material: instance.material,
        })
    }

    /// Whether anything blocks the segment between two world-space points.
    pub fn occluded(&self, from: Point3<f32>, to: Point3<f32>) -> bool {
        let direction = to - from;
        let ray = Ray::new(from, direction);
        // The segment is parameterized over [0, 1] because the direction is
        // left unnormalized.
        let t_max = 1.0 - RAY_EPSILON;
        for instance in &self.instances {
            if !instance.bounds.hit(&ray, RAY_EPSILON, t_max) {
                continue;
            }
            let Some(bvh) = instance.geometry.bounds_tree() else {
                continue;
            };
            let local = Ray::new(
                instance.inv_world.transform_point(ray.origin),
                instance.inv_world.transform_vector(ray.direction),
            );
            if bvh.occluded(
                &instance.geometry.positions,
                &instance.geometry.indices,
                &local,
                RAY_EPSILON,
                t_max,
            ) {
                return true;
            }
        }
        false
    }
}

/// Camera basis frozen for one sample pass.
#[derive(Clone, Copy, Debug)]
pub struct CameraPose {
    origin: Point3<f32>,
    right: Vector3<f32>,
    up: Vector3<f32>,
    forward: Vector3<f32>,
    tan_half_fov: f32,
    aspect: f32,
}

impl CameraPose {
    pub fn new(camera: &Camera, projection: &Projection) -> Self {
        let origin = camera.position();
        let forward = (camera.target - origin).normalize();
        let right = forward.cross(Vector3::unit_y()).normalize();
        let up = right.cross(forward);
        Self {
            origin,
            right,
            up,
            forward,
            tan_half_fov: (projection.fovy.0 / 2.0).tan(),
            aspect: projection.aspect,
        }
    }

    /// Primary ray through normalized screen coordinates in [0, 1].
    pub fn primary_ray(&self, sx: f32, sy: f32) -> Ray {
        let ndc_x = (sx * 2.0 - 1.0) * self.tan_half_fov * self.aspect;
        let ndc_y = (1.0 - sy * 2.0) * self.tan_half_fov;
        let direction = (self.forward + self.right * ndc_x + self.up * ndc_y).normalize();
        Ray::new(self.origin, direction)
    }
}

/// The progressive renderer: committed scene plus the accumulation film.
pub struct PathTracer {
    scene: Option<TracerScene>,
    film: Film,
}

impl PathTracer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            scene: None,
            film: Film::new(width, height),
        }
    }

    /// Adopt the committed scene produced by the upload thread.
    pub fn attach_scene(&mut self, scene: TracerScene) {
        self.scene = Some(scene);
        self.film.clear();
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn film(&self) -> &Film {
        &self.film
    }

    /// Throw away all accumulated samples; called on any camera change.
    pub fn reset_accumulation(&mut self) {
        self.film.clear();
    }

    /// Resize the film to the viewport's clamped extent; implies a reset.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.film.resize(width, height);
    }

    /// Accumulate exactly one sample per pixel into the film.
    pub fn render_sample(&mut self, camera: &Camera, projection: &Projection) {
        let Self { scene, film } = self;
        let Some(scene) = scene.as_ref() else {
            return;
        };
        let pose = CameraPose::new(camera, projection);
        let width = film.width();
        let height = film.height();
        let inv_w = 1.0 / width as f32;
        let inv_h = 1.0 / height as f32;

        film.pixels_mut()
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(py, row)| {
                let mut rng = rand::thread_rng();
                for (px, pixel) in row.iter_mut().enumerate() {
                    let sx = (px as f32 + rng.gen_range(0.0..1.0)) * inv_w;
                    let sy = (py as f32 + rng.gen_range(0.0..1.0)) * inv_h;
                    let ray = pose.primary_ray(sx, sy);
                    let radiance = trace(scene, ray, 0, &mut rng);
                    pixel[0] += radiance.x;
                    pixel[1] += radiance.y;
                    pixel[2] += radiance.z;
                }
            });
        film.end_sample();
    }
}

fn trace(scene: &TracerScene, ray: Ray, depth: u32, rng: &mut impl Rng) -> Vector3<f32> {
    if depth >= MAX_DEPTH {
        return Vector3::new(0.0, 0.0, 0.0);
    }

    let Some(hit) = scene.intersect(&ray, f32::INFINITY) else {
        return Vector3::from(scene.sky);
    };

    let material = &scene.materials[hit.material];
    let albedo = material.albedo(hit.uv);
    let mut radiance = Vector3::from(material.emissive);

    // Next-event estimation: one shadow ray per light per bounce.
    let shading_origin = hit.position + hit.normal * RAY_EPSILON;
    for light in &scene.lights {
        let to_light = light.position - shading_origin;
        let dist2 = to_light.magnitude2();
        if dist2 <= 0.0 {
            continue;
        }
        let cos = hit.normal.dot(to_light.normalize()).max(0.0);
        if cos == 0.0 {
            continue;
        }
        if scene.occluded(shading_origin, light.position) {
            continue;
        }
        let falloff = light.intensity / dist2;
        let brdf = albedo / std::f32::consts::PI;
        radiance += Vector3::new(
            brdf.x * light.color[0],
            brdf.y * light.color[1],
            brdf.z * light.color[2],
        ) * cos
            * falloff;
    }

    // One cosine-weighted indirect bounce; the cosine pdf cancels against
    // the cos term so the weight is just the albedo.
    if albedo.magnitude2() > 0.0 {
        let bounce_dir = cosine_hemisphere(hit.normal, rng);
        let bounce = trace(scene, Ray::new(shading_origin, bounce_dir), depth + 1, rng);
        radiance += Vector3::new(
            albedo.x * bounce.x,
            albedo.y * bounce.y,
            albedo.z * bounce.z,
        );
    }

    radiance
}

/// Cosine-weighted direction on the hemisphere around `normal`.
fn cosine_hemisphere(normal: Vector3<f32>, rng: &mut impl Rng) -> Vector3<f32> {
    let r1: f32 = rng.gen_range(0.0..1.0);
    let r2: f32 = rng.gen_range(0.0..1.0);
    let phi = 2.0 * std::f32::consts::PI * r1;
    let r = r2.sqrt();
    let (x, y) = (r * phi.cos(), r * phi.sin());
    let z = (1.0 - r2).max(0.0).sqrt();

    // Build an orthonormal basis around the normal.
    let tangent = if normal.x.abs() > 0.9 {
        Vector3::unit_y()
    } else {
        Vector3::unit_x()
    };
    let bitangent = normal.cross(tangent).normalize();
    let tangent = bitangent.cross(normal);

    (tangent * x + bitangent * y + normal * z).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Deg;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn quad_geometry() -> Arc<Geometry> {
        let mut g = Geometry::new(
            "quad".to_string(),
            vec![
                [-10.0, -10.0, 0.0],
                [10.0, -10.0, 0.0],
                [10.0, 10.0, 0.0],
                [-10.0, 10.0, 0.0],
            ],
            vec![[0.0, 0.0, 1.0]; 4],
            vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            vec![0, 1, 2, 0, 2, 3],
        );
        g.attach_bounds_tree();
        Arc::new(g)
    }

    fn quad_scene(material: TracerMaterial) -> TracerScene {
        let instance = TracerInstance::build(
            quad_geometry(),
            Matrix4::from_scale(1.0),
            0,
        )
        .unwrap();
        TracerScene {
            instances: vec![instance],
            materials: vec![material],
            lights: Vec::new(),
            sky: [0.0; 3],
        }
    }

    #[test]
    fn intersect_reports_front_facing_normals() {
        let scene = quad_scene(TracerMaterial {
            base_color: [1.0; 3],
            emissive: [0.0; 3],
            texture: None,
        });
        // Approach from +z: the normal must face back at us.
        let hit = scene
            .intersect(
                &Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0)),
                f32::INFINITY,
            )
            .unwrap();
        assert!(hit.normal.z > 0.99);
        // Approach from -z: flipped.
        let hit = scene
            .intersect(
                &Ray::new(Point3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 1.0)),
                f32::INFINITY,
            )
            .unwrap();
        assert!(hit.normal.z < -0.99);
    }

    #[test]
    fn instance_transform_moves_the_mesh() {
        let moved = TracerInstance::build(
            quad_geometry(),
            Matrix4::from_translation(Vector3::new(100.0, 0.0, 0.0)),
            0,
        )
        .unwrap();
        let scene = TracerScene {
            instances: vec![moved],
            materials: vec![TracerMaterial {
                base_color: [1.0; 3],
                emissive: [0.0; 3],
                texture: None,
            }],
            lights: Vec::new(),
            sky: [0.0; 3],
        };
        let at_origin = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
        assert!(scene.intersect(&at_origin, f32::INFINITY).is_none());
        let at_offset = Ray::new(Point3::new(100.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
        let hit = scene.intersect(&at_offset, f32::INFINITY).unwrap();
        assert!((hit.t - 5.0).abs() < 1e-4);
    }

    #[test]
    fn singular_transforms_are_skipped() {
        assert!(TracerInstance::build(
            quad_geometry(),
            Matrix4::from_scale(0.0),
            0
        )
        .is_none());
    }

    #[test]
    fn emissive_surface_accumulates_exactly() {
        let emissive = [0.5, 1.0, 2.0];
        let scene = quad_scene(TracerMaterial {
            base_color: [0.0; 3],
            emissive,
            texture: None,
        });

        let mut tracer = PathTracer::new(8, 8);
        tracer.attach_scene(scene);
        let camera = Camera::looking_at(Point3::new(0.0, 0.0, 5.0), Point3::new(0.0, 0.0, 0.0));
        let projection = Projection::new(8, 8, Deg(60.0), 0.1, 100.0);

        for pass in 1..=3u32 {
            tracer.render_sample(&camera, &projection);
            assert_eq!(tracer.film().sample_count(), pass);
        }
        // Zero albedo kills every bounce, so each sample is exactly the
        // emissive value and the mean has no variance.
        let mean = tracer.film().mean(4, 4);
        for c in 0..3 {
            assert!((mean[c] - emissive[c]).abs() < 1e-5);
        }

        tracer.reset_accumulation();
        assert_eq!(tracer.film().sample_count(), 0);
    }

    #[test]
    fn shadow_rays_see_occluders() {
        // Quad at z=0, light behind it at z=-5: a point in front is shadowed.
        let scene = quad_scene(TracerMaterial {
            base_color: [1.0; 3],
            emissive: [0.0; 3],
            texture: None,
        });
        assert!(scene.occluded(Point3::new(0.0, 0.0, 3.0), Point3::new(0.0, 0.0, -5.0)));
        assert!(!scene.occluded(Point3::new(0.0, 0.0, 3.0), Point3::new(0.0, 0.0, 1.0)));
        // Segments that stop short of the quad are clear.
        assert!(!scene.occluded(Point3::new(0.0, 0.0, 30.0), Point3::new(0.0, 0.0, 25.0)));
    }

    #[test]
    fn cosine_hemisphere_stays_on_the_normal_side() {
        let mut rng = StdRng::seed_from_u64(42);
        let normal = Vector3::new(0.0, 1.0, 0.0);
        for _ in 0..500 {
            let d = cosine_hemisphere(normal, &mut rng);
            assert!((d.magnitude() - 1.0).abs() < 1e-4);
            assert!(d.dot(normal) >= 0.0);
        }
    }

    #[test]
    fn primary_ray_center_looks_forward() {
        let camera = Camera::looking_at(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0));
        let projection = Projection::new(100, 100, Deg(75.0), 0.1, 100.0);
        let pose = CameraPose::new(&camera, &projection);
        let ray = pose.primary_ray(0.5, 0.5);
        assert!(ray.direction.z < -0.999);
    }
}
