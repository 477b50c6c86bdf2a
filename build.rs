use std::env;
use std::path::PathBuf;

use anyhow::Result;
use fs_extra::copy_items;
use fs_extra::dir::CopyOptions;

/// Ship the scene asset next to the build output so the viewer finds it
/// regardless of where cargo puts the binary.
fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=assets/*");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    if !manifest_dir.join("assets").exists() {
        // Nothing to ship; the viewer will log a load error at runtime.
        return Ok(());
    }

    let out_dir = env::var("OUT_DIR")?;
    let mut options = CopyOptions::new();
    options.overwrite = true;
    copy_items(&["assets/"], out_dir, &options)?;

    Ok(())
}
