//! Central GPU and window context.
//!
//! Owns the surface, device/queue, the camera and light resources, both
//! render pipelines and the film target. Everything here is created once at
//! startup; the resize handler reconfigures the surface-sized pieces.

use std::sync::Arc;

use cgmath::{Deg, Point3};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalPosition;
use winit::window::Window;

use crate::camera::{self, CameraResources, CameraUniform, Projection};
use crate::pipelines::basic::mk_basic_pipeline;
use crate::pipelines::blit::{mk_blit_pipeline, FilmTarget};
use crate::pipelines::light::LightResources;
use crate::scene::PointLight;
use crate::texture::Texture;
use crate::viewport::Viewport;

/// Initial eye position, matching the asset's framing.
const CAMERA_EYE: [f32; 3] = [30.0, 30.0, 30.0];
const CAMERA_FOV_DEG: f32 = 75.0;
const CAMERA_ZNEAR: f32 = 0.1;
const CAMERA_ZFAR: f32 = 1000.0;
/// Radians of orbit per pixel of drag.
const ORBIT_SPEED: f32 = 0.005;
const ZOOM_SPEED: f32 = 0.1;

/// The two fill lights every scene gets, whether or not the asset brings
/// its own.
pub fn default_lights() -> Vec<PointLight> {
    vec![
        PointLight {
            position: Point3::new(40.0, 40.0, 40.0),
            color: [1.0, 1.0, 1.0],
            intensity: 5000.0,
        },
        PointLight {
            position: Point3::new(-40.0, 40.0, -40.0),
            color: [1.0, 1.0, 1.0],
            intensity: 5000.0,
        },
    ]
}

/// Which mouse button is currently held, for routing drag motion to orbit
/// or pan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MouseButtonState {
    #[default]
    None,
    Left,
    Right,
}

#[derive(Debug, Default)]
pub struct Mouse {
    pub pressed: MouseButtonState,
    pub coords: PhysicalPosition<f64>,
}

pub struct Pipelines {
    pub basic: wgpu::RenderPipeline,
    pub blit: wgpu::RenderPipeline,
}

pub struct Context {
    pub window: Arc<Window>,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_texture: Texture,
    pub camera: CameraResources,
    pub projection: Projection,
    pub lights: LightResources,
    pub pipelines: Pipelines,
    pub film_target: FilmTarget,
    pub mouse: Mouse,
    pub clear_colour: wgpu::Color,
}

impl Context {
    pub async fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let size = window.inner_size();

        // The instance is a handle to our GPU.
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // The shaders assume an Srgb surface; a linear fallback would come
        // out too dark.
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: surface_caps.present_modes[0],
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let camera = camera::Camera::looking_at(CAMERA_EYE.into(), Point3::new(0.0, 0.0, 0.0));
        let projection = Projection::new(
            config.width,
            config.height,
            Deg(CAMERA_FOV_DEG),
            CAMERA_ZNEAR,
            CAMERA_ZFAR,
        );
        let controller = camera::OrbitController::new(ORBIT_SPEED, ZOOM_SPEED);

        let mut camera_uniform = CameraUniform::new();
        camera_uniform.update_view_proj(&camera, &projection);

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[camera_uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let camera_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
                label: Some("camera_bind_group_layout"),
            });
        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let camera = CameraResources {
            camera,
            controller,
            uniform: camera_uniform,
            buffer: camera_buffer,
            bind_group: camera_bind_group,
            bind_group_layout: camera_bind_group_layout,
        };

        let depth_texture = Texture::create_depth_texture(
            &device,
            [config.width, config.height],
            "depth_texture",
        );

        // Until the asset is in, only the built-in fill lights exist.
        let lights = LightResources::new(&default_lights(), &device);

        let pipelines = Pipelines {
            basic: mk_basic_pipeline(
                &device,
                &config,
                &camera.bind_group_layout,
                &lights.bind_group_layout,
            ),
            blit: mk_blit_pipeline(&device, &config),
        };

        let viewport = Viewport::new(config.width, config.height, window.scale_factor());
        let (film_w, film_h) = viewport.film_extent();
        let film_target = FilmTarget::new(&device, [film_w, film_h]);

        Ok(Self {
            window,
            surface,
            device,
            queue,
            config,
            depth_texture,
            camera,
            projection,
            lights,
            pipelines,
            film_target,
            mouse: Mouse::default(),
            clear_colour: wgpu::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
        })
    }

    /// Current drawable description, the input to every resize-derived value.
    pub fn viewport(&self) -> Viewport {
        Viewport::new(
            self.config.width,
            self.config.height,
            self.window.scale_factor(),
        )
    }

    /// Push the camera uniform to the GPU after any camera change.
    pub fn write_camera_uniform(&mut self) {
        self.camera
            .uniform
            .update_view_proj(&self.camera.camera, &self.projection);
        self.queue.write_buffer(
            &self.camera.buffer,
            0,
            bytemuck::cast_slice(&[self.camera.uniform]),
        );
    }
}
