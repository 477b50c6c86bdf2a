use std::path::PathBuf;

/// The scene asset shown by the viewer, relative to the working directory.
/// `build.rs` copies `assets/` next to the build output.
const SCENE_ASSET: &str = "assets/scene.glb";

fn main() -> anyhow::Result<()> {
    trace_view::app::run(PathBuf::from(SCENE_ASSET))
}
