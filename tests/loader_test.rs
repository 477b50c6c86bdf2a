//! Asset loading end to end: every triangle-bearing mesh gets the per-mesh
//! visitor and a bounding-volume hierarchy before the scene is returned, and
//! malformed input fails without touching the scene.

use cgmath::Matrix4;
use trace_view::loader::{load_scene, LoadError};
use trace_view::scene::{MeshAsset, NodeVisitor};

mod common;

struct BoundsTreeCheck {
    meshes: usize,
    all_indexed: bool,
    triangles: usize,
}

impl NodeVisitor for BoundsTreeCheck {
    fn visit_mesh(&mut self, mesh: &MeshAsset, _world: &Matrix4<f32>) {
        self.meshes += 1;
        self.all_indexed &= mesh.geometry.bounds_tree().is_some();
        self.triangles += mesh.geometry.triangle_count();
    }
}

#[tokio::test]
async fn valid_asset_visits_and_indexes_every_mesh() {
    let (_dir, path) = common::write_asset("scene.glb", &common::triangle_scene_glb(3));

    let mut visited = 0usize;
    let scene = load_scene(&path, &mut |geometry| {
        visited += 1;
        geometry.attach_bounds_tree();
    })
    .await
    .expect("valid asset must load");

    assert_eq!(visited, 3, "one visitor call per triangle-bearing mesh");
    assert_eq!(scene.mesh_count(), 3);

    let mut check = BoundsTreeCheck {
        meshes: 0,
        all_indexed: true,
        triangles: 0,
    };
    scene.visit(&mut check);
    assert_eq!(check.meshes, 3);
    assert_eq!(check.triangles, 3);
    assert!(
        check.all_indexed,
        "every mesh must carry its spatial index before the scene is attached"
    );
}

#[tokio::test]
async fn gzip_compressed_asset_loads_transparently() {
    let plain = common::triangle_scene_glb(2);
    let (_dir, path) = common::write_asset("scene.glb.gz", &common::gzipped(&plain));

    let scene = load_scene(&path, &mut |geometry| geometry.attach_bounds_tree())
        .await
        .expect("gzipped asset must load");
    assert_eq!(scene.mesh_count(), 2);
}

#[tokio::test]
async fn malformed_asset_fails_without_a_scene() {
    let (_dir, path) = common::write_asset("garbage.glb", b"this is not a gltf file");

    let mut visited = 0usize;
    let result = load_scene(&path, &mut |_| visited += 1).await;

    assert!(matches!(result, Err(LoadError::Gltf(_))));
    assert_eq!(visited, 0, "no mesh may be visited on a failed load");
}

#[tokio::test]
async fn truncated_container_is_rejected() {
    let mut bytes = common::triangle_scene_glb(1);
    bytes.truncate(20);
    let (_dir, path) = common::write_asset("truncated.glb", &bytes);

    assert!(load_scene(&path, &mut |_| {}).await.is_err());
}

#[tokio::test]
async fn missing_file_reports_the_path() {
    let result = load_scene("does/not/exist.glb", &mut |_| {}).await;
    match result {
        Err(LoadError::Io { path, .. }) => {
            assert!(path.ends_with("exist.glb"));
        }
        other => panic!("expected an io error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn corrupt_gzip_stream_is_a_decompress_error() {
    let mut bytes = common::gzipped(&common::triangle_scene_glb(1));
    let len = bytes.len();
    // Keep the magic, garble the stream.
    for b in bytes[4..len].iter_mut() {
        *b = !*b;
    }
    let (_dir, path) = common::write_asset("corrupt.glb.gz", &bytes);

    let result = load_scene(&path, &mut |_| {}).await;
    assert!(matches!(
        result,
        Err(LoadError::Decompress(_)) | Err(LoadError::Gltf(_))
    ));
}
