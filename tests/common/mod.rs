//! Shared fixtures: minimal binary glTF assets built in memory, so the
//! loader tests never depend on files checked into the repo.
#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

const CHUNK_JSON: u32 = 0x4E4F534A;
const CHUNK_BIN: u32 = 0x004E4942;

/// Assemble a GLB container from a JSON chunk and a binary chunk.
pub fn glb_bytes(json: &str, bin: &[u8]) -> Vec<u8> {
    let mut json_chunk = json.as_bytes().to_vec();
    while json_chunk.len() % 4 != 0 {
        json_chunk.push(b' ');
    }
    let mut bin_chunk = bin.to_vec();
    while bin_chunk.len() % 4 != 0 {
        bin_chunk.push(0);
    }

    let total = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);

    out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin_chunk);

    out
}

/// A valid scene with `mesh_count` single-triangle meshes, each on its own
/// translated node. All meshes share one vertex/index buffer.
pub fn triangle_scene_glb(mesh_count: usize) -> Vec<u8> {
    // One triangle in the xy plane: positions then u32 indices.
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let indices: [u32; 3] = [0, 1, 2];
    let mut bin = Vec::new();
    for p in positions {
        for c in p {
            bin.extend_from_slice(&c.to_le_bytes());
        }
    }
    for i in indices {
        bin.extend_from_slice(&i.to_le_bytes());
    }

    let meshes: Vec<String> = (0..mesh_count)
        .map(|i| {
            format!(
                r#"{{"name":"tri_{}","primitives":[{{"attributes":{{"POSITION":0}},"indices":1}}]}}"#,
                i
            )
        })
        .collect();
    let nodes: Vec<String> = (0..mesh_count)
        .map(|i| format!(r#"{{"mesh":{},"translation":[{}.0,0.0,0.0]}}"#, i, i * 2))
        .collect();
    let root_nodes: Vec<String> = (0..mesh_count).map(|i| i.to_string()).collect();

    let json = format!(
        concat!(
            r#"{{"asset":{{"version":"2.0"}},"#,
            r#""buffers":[{{"byteLength":{}}}],"#,
            r#""bufferViews":[{{"buffer":0,"byteOffset":0,"byteLength":36,"target":34962}},"#,
            r#"{{"buffer":0,"byteOffset":36,"byteLength":12,"target":34963}}],"#,
            r#""accessors":[{{"bufferView":0,"componentType":5126,"count":3,"type":"VEC3","min":[0.0,0.0,0.0],"max":[1.0,1.0,0.0]}},"#,
            r#"{{"bufferView":1,"componentType":5125,"count":3,"type":"SCALAR"}}],"#,
            r#""meshes":[{}],"#,
            r#""nodes":[{}],"#,
            r#""scenes":[{{"nodes":[{}]}}],"scene":0}}"#
        ),
        bin.len(),
        meshes.join(","),
        nodes.join(","),
        root_nodes.join(",")
    );

    glb_bytes(&json, &bin)
}

/// Gzip-wrap an asset, the compressed form the loader sniffs for.
pub fn gzipped(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Write an asset into a fresh temp dir; the dir guard keeps it alive.
pub fn write_asset(name: &str, bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    (dir, path)
}
