//! Ray-intersection acceleration structures.
//!
//! Every mesh gets a bounding-volume hierarchy over its triangles, built once
//! when the asset is loaded and never rebuilt. The tree is a flattened array
//! of nodes (no boxing, no pointers) built top-down with a median split on
//! the longest centroid axis, which keeps construction deterministic: the
//! same geometry always yields the same tree.

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

/// A ray in whatever space the queried structure lives in.
///
/// `t_min` is fixed at a small epsilon by the callers to avoid
/// self-intersection; `t_max` shrinks as closer hits are found.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Point3<f32>,
    pub direction: Vector3<f32>,
}

impl Ray {
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self { origin, direction }
    }

    pub fn at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    /// An empty box that grows to fit whatever is merged into it.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    pub fn grow(&mut self, p: Point3<f32>) {
        self.min = Point3::new(
            self.min.x.min(p.x),
            self.min.y.min(p.y),
            self.min.z.min(p.z),
        );
        self.max = Point3::new(
            self.max.x.max(p.x),
            self.max.y.max(p.y),
            self.max.z.max(p.z),
        );
    }

    pub fn union(&mut self, other: &Aabb) {
        self.grow(other.min);
        self.grow(other.max);
    }

    pub fn centroid(&self) -> Point3<f32> {
        self.min.midpoint(self.max)
    }

    pub fn diagonal(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Index of the longest axis of the box (0 = x, 1 = y, 2 = z).
    pub fn longest_axis(&self) -> usize {
        let d = self.diagonal();
        if d.x >= d.y && d.x >= d.z {
            0
        } else if d.y >= d.z {
            1
        } else {
            2
        }
    }

    /// Slab test against `ray` within `[t_min, t_max]`.
    pub fn hit(&self, ray: &Ray, t_min: f32, t_max: f32) -> bool {
        let mut t0 = t_min;
        let mut t1 = t_max;
        for axis in 0..3 {
            let inv = 1.0 / ray.direction[axis];
            let mut near = (self.min[axis] - ray.origin[axis]) * inv;
            let mut far = (self.max[axis] - ray.origin[axis]) * inv;
            if inv < 0.0 {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t1 < t0 {
                return false;
            }
        }
        true
    }
}

/// Result of intersecting a triangle list: the triangle index and the
/// barycentric coordinates of the hit, for normal/uv interpolation.
#[derive(Clone, Copy, Debug)]
pub struct RawHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
    pub triangle: u32,
}

/// Möller-Trumbore triangle intersection.
///
/// Returns `(t, u, v)` when the ray crosses the triangle inside `(t_min,
/// t_max)`. Backfaces are reported too; the integrator flips the shading
/// normal instead of culling.
pub fn intersect_triangle(
    ray: &Ray,
    p0: Point3<f32>,
    p1: Point3<f32>,
    p2: Point3<f32>,
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let pvec = ray.direction.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - p0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    if t <= t_min || t >= t_max {
        return None;
    }
    Some((t, u, v))
}

#[derive(Clone, Debug, PartialEq)]
struct BvhNode {
    bounds: Aabb,
    /// For leaves (`count > 0`): offset into `tri_order`. For interior
    /// nodes: index of the right child; the left child is always the node
    /// directly after its parent in depth-first order.
    first: u32,
    /// Zero for interior nodes; leaf triangle count otherwise.
    count: u32,
}

/// Bounding-volume hierarchy over an indexed triangle list.
///
/// The tree stores triangle indices only; the vertex data stays with the
/// geometry and is passed back in for every query, so one `Bvh` can be shared
/// by as many instances of a mesh as the scene contains.
#[derive(Clone, Debug, PartialEq)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    tri_order: Vec<u32>,
}

/// Triangles per leaf before the split recursion stops.
const LEAF_SIZE: usize = 4;

impl Bvh {
    /// Build the hierarchy for `indices.len() / 3` triangles.
    ///
    /// `indices` come in triples; `positions` is the vertex pool they point
    /// into. An empty mesh yields an empty tree that never reports a hit.
    pub fn build(positions: &[[f32; 3]], indices: &[u32]) -> Self {
        let tri_count = indices.len() / 3;
        if tri_count == 0 {
            return Self {
                nodes: Vec::new(),
                tri_order: Vec::new(),
            };
        }

        let tri_bounds: Vec<Aabb> = (0..tri_count)
            .map(|tri| {
                let mut b = Aabb::empty();
                for k in 0..3 {
                    b.grow(Point3::from(positions[indices[tri * 3 + k] as usize]));
                }
                b
            })
            .collect();

        let mut tri_order: Vec<u32> = (0..tri_count as u32).collect();
        let mut nodes = Vec::with_capacity(2 * tri_count);
        build_recursive(&tri_bounds, &mut tri_order, 0, tri_count, &mut nodes);

        Self { nodes, tri_order }
    }

    /// Number of triangles the tree was built over.
    pub fn triangle_count(&self) -> usize {
        self.tri_order.len()
    }

    /// Bounds of the whole mesh, in the space it was built in.
    pub fn root_bounds(&self) -> Aabb {
        self.nodes
            .first()
            .map(|n| n.bounds)
            .unwrap_or_else(Aabb::empty)
    }

    /// Closest triangle hit within `(t_min, t_max)`, or `None`.
    pub fn intersect(
        &self,
        positions: &[[f32; 3]],
        indices: &[u32],
        ray: &Ray,
        t_min: f32,
        t_max: f32,
    ) -> Option<RawHit> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut best: Option<RawHit> = None;
        let mut closest = t_max;
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.bounds.hit(ray, t_min, closest) {
                continue;
            }
            if node.count > 0 {
                for slot in node.first..node.first + node.count {
                    let tri = self.tri_order[slot as usize];
                    let base = tri as usize * 3;
                    let p0 = Point3::from(positions[indices[base] as usize]);
                    let p1 = Point3::from(positions[indices[base + 1] as usize]);
                    let p2 = Point3::from(positions[indices[base + 2] as usize]);
                    if let Some((t, u, v)) = intersect_triangle(ray, p0, p1, p2, t_min, closest)
                    {
                        closest = t;
                        best = Some(RawHit {
                            t,
                            u,
                            v,
                            triangle: tri,
                        });
                    }
                }
            } else {
                stack.push(idx + 1);
                stack.push(node.first as usize);
            }
        }
        best
    }

    /// Whether any triangle blocks the ray within `(t_min, t_max)`.
    ///
    /// Cheaper than `intersect` for shadow rays: traversal stops at the first
    /// hit instead of searching for the closest one.
    pub fn occluded(
        &self,
        positions: &[[f32; 3]],
        indices: &[u32],
        ray: &Ray,
        t_min: f32,
        t_max: f32,
    ) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.bounds.hit(ray, t_min, t_max) {
                continue;
            }
            if node.count > 0 {
                for slot in node.first..node.first + node.count {
                    let tri = self.tri_order[slot as usize];
                    let base = tri as usize * 3;
                    let p0 = Point3::from(positions[indices[base] as usize]);
                    let p1 = Point3::from(positions[indices[base + 1] as usize]);
                    let p2 = Point3::from(positions[indices[base + 2] as usize]);
                    if intersect_triangle(ray, p0, p1, p2, t_min, t_max).is_some() {
                        return true;
                    }
                }
            } else {
                stack.push(idx + 1);
                stack.push(node.first as usize);
            }
        }
        false
    }
}

fn build_recursive(
    tri_bounds: &[Aabb],
    tri_order: &mut [u32],
    start: usize,
    end: usize,
    nodes: &mut Vec<BvhNode>,
) -> usize {
    let mut bounds = Aabb::empty();
    let mut centroid_bounds = Aabb::empty();
    for &tri in &tri_order[start..end] {
        bounds.union(&tri_bounds[tri as usize]);
        centroid_bounds.grow(tri_bounds[tri as usize].centroid());
    }

    let node_index = nodes.len();
    let count = end - start;
    if count <= LEAF_SIZE {
        nodes.push(BvhNode {
            bounds,
            first: start as u32,
            count: count as u32,
        });
        return node_index;
    }

    // Median split along the widest spread of centroids. total_cmp keeps the
    // ordering total even for degenerate geometry, so ties always break the
    // same way.
    let axis = centroid_bounds.longest_axis();
    tri_order[start..end].sort_unstable_by(|&a, &b| {
        let ca = tri_bounds[a as usize].centroid()[axis];
        let cb = tri_bounds[b as usize].centroid()[axis];
        ca.total_cmp(&cb)
    });
    let mid = start + count / 2;

    // Interior node placeholder; the left child lands directly after it, so
    // only the right child index has to be patched in once known.
    nodes.push(BvhNode {
        bounds,
        first: 0,
        count: 0,
    });
    build_recursive(tri_bounds, tri_order, start, mid, nodes);
    let right = build_recursive(tri_bounds, tri_order, mid, end, nodes);
    nodes[node_index].first = right as u32;
    node_index
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn quad() -> (Vec<[f32; 3]>, Vec<u32>) {
        let positions = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let indices = vec![0, 1, 2, 0, 2, 3];
        (positions, indices)
    }

    fn random_soup(rng: &mut StdRng, tris: usize) -> (Vec<[f32; 3]>, Vec<u32>) {
        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for _ in 0..tris {
            let base: [f32; 3] = [
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
                rng.gen_range(-10.0..10.0),
            ];
            for _ in 0..3 {
                indices.push(positions.len() as u32);
                positions.push([
                    base[0] + rng.gen_range(-1.0..1.0),
                    base[1] + rng.gen_range(-1.0..1.0),
                    base[2] + rng.gen_range(-1.0..1.0),
                ]);
            }
        }
        (positions, indices)
    }

    fn brute_force(
        positions: &[[f32; 3]],
        indices: &[u32],
        ray: &Ray,
    ) -> Option<(f32, u32)> {
        let mut best: Option<(f32, u32)> = None;
        for tri in 0..indices.len() / 3 {
            let p0 = Point3::from(positions[indices[tri * 3] as usize]);
            let p1 = Point3::from(positions[indices[tri * 3 + 1] as usize]);
            let p2 = Point3::from(positions[indices[tri * 3 + 2] as usize]);
            let closest = best.map(|(t, _)| t).unwrap_or(f32::INFINITY);
            if let Some((t, _, _)) = intersect_triangle(ray, p0, p1, p2, 1e-4, closest) {
                best = Some((t, tri as u32));
            }
        }
        best
    }

    #[test]
    fn hits_a_simple_quad() {
        let (positions, indices) = quad();
        let bvh = Bvh::build(&positions, &indices);
        assert_eq!(bvh.triangle_count(), 2);

        let ray = Ray::new(Point3::new(0.5, 0.5, -1.0), Vector3::new(0.0, 0.0, 1.0));
        let hit = bvh
            .intersect(&positions, &indices, &ray, 1e-4, f32::INFINITY)
            .expect("ray through the quad must hit");
        assert!((hit.t - 1.0).abs() < 1e-5);

        let miss = Ray::new(Point3::new(5.0, 5.0, -1.0), Vector3::new(0.0, 0.0, 1.0));
        assert!(bvh
            .intersect(&positions, &indices, &miss, 1e-4, f32::INFINITY)
            .is_none());
    }

    #[test]
    fn agrees_with_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let (positions, indices) = random_soup(&mut rng, 200);
        let bvh = Bvh::build(&positions, &indices);

        for _ in 0..200 {
            let ray = Ray::new(
                Point3::new(
                    rng.gen_range(-15.0..15.0),
                    rng.gen_range(-15.0..15.0),
                    -20.0,
                ),
                Vector3::new(
                    rng.gen_range(-0.3..0.3),
                    rng.gen_range(-0.3..0.3),
                    1.0,
                )
                .normalize(),
            );
            let expected = brute_force(&positions, &indices, &ray);
            let got = bvh.intersect(&positions, &indices, &ray, 1e-4, f32::INFINITY);
            match (expected, got) {
                (None, None) => {}
                (Some((t, _)), Some(hit)) => assert!((t - hit.t).abs() < 1e-4),
                (e, g) => panic!("bvh disagrees with brute force: {:?} vs {:?}", e, g),
            }
        }
    }

    #[test]
    fn occlusion_matches_intersection() {
        let mut rng = StdRng::seed_from_u64(11);
        let (positions, indices) = random_soup(&mut rng, 64);
        let bvh = Bvh::build(&positions, &indices);
        for _ in 0..100 {
            let ray = Ray::new(
                Point3::new(0.0, 0.0, -20.0),
                Vector3::new(
                    rng.gen_range(-0.6..0.6),
                    rng.gen_range(-0.6..0.6),
                    1.0,
                )
                .normalize(),
            );
            let hit = bvh.intersect(&positions, &indices, &ray, 1e-4, 100.0);
            assert_eq!(hit.is_some(), bvh.occluded(&positions, &indices, &ray, 1e-4, 100.0));
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        let (positions, indices) = random_soup(&mut rng, 128);
        let a = Bvh::build(&positions, &indices);
        let b = Bvh::build(&positions, &indices);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_mesh_never_hits() {
        let bvh = Bvh::build(&[], &[]);
        let ray = Ray::new(Point3::new(0.0, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0));
        assert!(bvh.intersect(&[], &[], &ray, 1e-4, f32::INFINITY).is_none());
        assert!(!bvh.occluded(&[], &[], &ray, 1e-4, f32::INFINITY));
        assert_eq!(bvh.triangle_count(), 0);
    }
}
