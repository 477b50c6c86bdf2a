//! Render pipeline definitions.
//!
//! - `basic` is the STREAMING-mode raster pipeline for scene meshes
//! - `blit` stretches the path tracer's film over the surface in READY mode
//! - `light` holds the point-light uniform shared with the basic shader

pub mod basic;
pub mod blit;
pub mod light;
