//! trace-view
//!
//! A single-window 3D viewer: it loads a (optionally gzip-compressed) binary
//! glTF scene, attaches a bounding-volume hierarchy to every mesh, and draws
//! with a realtime wgpu rasterizer while the path tracer's scene commit
//! streams in the background. Once the commit completes the render loop
//! switches to progressive path-traced accumulation, reset by any camera
//! movement.
//!
//! High-level modules
//! - `accel`: bounding-volume hierarchies and ray intersection primitives
//! - `app`: the winit event loop, frame driver and render strategy selector
//! - `camera`: orbit camera, damped controller and view/projection uniforms
//! - `context`: central GPU and window context that owns device/queue/pipelines
//! - `loader`: compressed glTF asset loading into the scene graph
//! - `pipelines`: the raster preview and film blit pipelines
//! - `scene`: the typed scene graph and its visitor
//! - `texture`: GPU texture wrappers (depth, materials, film)
//! - `tracer`: the progressive CPU path tracer and its scene upload
//! - `viewport`: surface sizing, aspect ratio and pixel-ratio clamping
//!

pub mod accel;
pub mod app;
pub mod camera;
pub mod context;
pub mod loader;
pub mod pipelines;
pub mod scene;
pub mod texture;
pub mod tracer;
pub mod viewport;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use winit::dpi::PhysicalPosition;
pub use winit::event::DeviceEvent;
pub use winit::event::WindowEvent;
