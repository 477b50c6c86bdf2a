//! Application event loop and frame driver.
//!
//! The viewer's whole control flow lives here: window creation, the blocking
//! async init, asset load and attach, the per-frame tick that polls the
//! upload progress stream, eases the camera, and dispatches to the active
//! render strategy. All state sits in one [`AppState`] owned by the
//! top-level [`App`]; nothing is global.

use std::path::PathBuf;
use std::sync::Arc;

use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::{DeviceEvent, DeviceId, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    window::Window,
};

use crate::context::{default_lights, Context, MouseButtonState};
use crate::loader::{load_scene, LoadError};
use crate::pipelines::basic::{mk_gpu_material, mk_material_layout};
use crate::scene::mesh::{GpuMesh, Material};
use crate::scene::{MeshAsset, NodeVisitor, Scene};
use crate::tracer::upload::{SceneUpload, UploadEvent};
use crate::tracer::PathTracer;

/// The two rendering strategies the frame driver can dispatch to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderMode {
    /// Scene commit still in flight: rasterize the scene graph every frame.
    Streaming,
    /// Scene fully resident: accumulate one path-traced sample per frame.
    Ready,
}

/// Owns the readiness transition.
///
/// Streaming until the progress stream reports completion, Ready forever
/// after. There is deliberately no way back and no error state.
#[derive(Debug)]
pub struct StrategySelector {
    mode: RenderMode,
}

impl StrategySelector {
    pub fn new() -> Self {
        Self {
            mode: RenderMode::Streaming,
        }
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Feed one progress fraction from the upload stream.
    pub fn observe_progress(&mut self, fraction: f32) {
        if self.mode == RenderMode::Streaming && fraction >= 1.0 {
            self.mode = RenderMode::Ready;
            log::info!("scene fully resident, switching to progressive rendering");
        }
    }
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state bundle: GPU context, scene, tracer and load progress.
pub struct AppState {
    pub ctx: Context,
    pub scene: Option<Scene>,
    pub tracer: PathTracer,
    pub upload: Option<SceneUpload>,
    pub selector: StrategySelector,
    upload_started: Option<Instant>,
    saw_first_event: bool,
    is_surface_configured: bool,
}

impl AppState {
    async fn new(window: Arc<Window>) -> Self {
        let ctx = match Context::new(window).await {
            Ok(ctx) => ctx,
            Err(e) => panic!(
                "App initialization failed. Cannot create the main context: {}",
                e
            ),
        };
        let (film_w, film_h) = ctx.viewport().film_extent();
        Self {
            ctx,
            scene: None,
            tracer: PathTracer::new(film_w, film_h),
            upload: None,
            selector: StrategySelector::new(),
            upload_started: None,
            saw_first_event: false,
            is_surface_configured: false,
        }
    }

    /// Load the asset, attaching bounding-volume hierarchies along the way.
    ///
    /// A failed load is logged and the viewer keeps running with an empty
    /// scene; the frame driver never sees the error.
    async fn load(&mut self, path: &PathBuf) {
        let result: Result<Scene, LoadError> =
            load_scene(path, &mut |geometry| geometry.attach_bounds_tree()).await;
        match result {
            Ok(scene) => self.attach_scene(scene),
            Err(e) => log::error!("failed to load scene {:?}: {:#}", path, anyhow::Error::new(e)),
        }
    }

    /// Hand the loaded scene to the render engine and start the tracer's
    /// background commit.
    fn attach_scene(&mut self, mut scene: Scene) {
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;

        let material_layout = mk_material_layout(device);
        for material in &mut scene.materials {
            material.gpu = Some(mk_gpu_material(device, queue, &material_layout, material));
        }
        scene.visit_meshes_mut(&mut |mesh, world| {
            mesh.gpu = Some(GpuMesh::upload(device, &mesh.geometry, world));
        });

        let mut lights = scene.collect_lights();
        lights.extend(default_lights());
        self.ctx.lights.update(&lights, queue);

        let snapshot = scene.snapshot(lights);
        self.upload = Some(SceneUpload::spawn(snapshot));
        self.upload_started = Some(Instant::now());
        self.saw_first_event = false;
        self.scene = Some(scene);
    }

    /// Viewport sizer: reapply everything derived from the window size.
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.ctx.config.width = width;
        self.ctx.config.height = height;
        self.is_surface_configured = true;
        self.ctx
            .surface
            .configure(&self.ctx.device, &self.ctx.config);
        self.ctx.depth_texture = crate::texture::Texture::create_depth_texture(
            &self.ctx.device,
            [width, height],
            "depth_texture",
        );

        let viewport = self.ctx.viewport();
        self.ctx.projection.resize(width, height);
        let (film_w, film_h) = viewport.film_extent();
        // Resizing the film clears the accumulation, which doubles as the
        // camera-changed notification for this path.
        self.tracer.resize(film_w, film_h);
        self.ctx.film_target.resize(&self.ctx.device, [film_w, film_h]);
        self.ctx.write_camera_uniform();
    }

    /// Drain the upload progress stream and apply its events.
    fn poll_upload(&mut self) {
        let Some(upload) = &mut self.upload else {
            return;
        };
        for event in upload.poll() {
            if !self.saw_first_event {
                self.saw_first_event = true;
                if let Some(started) = self.upload_started {
                    log::info!("first scene commit event after {:?}", started.elapsed());
                }
            }
            let fraction = event.fraction();
            if let UploadEvent::Complete(scene) = event {
                if let Some(started) = self.upload_started {
                    log::info!("scene streamed completely in {:?}", started.elapsed());
                }
                self.tracer.attach_scene(scene);
            }
            self.selector.observe_progress(fraction);
        }
    }

    /// One tick of the frame driver.
    fn frame(&mut self, dt: Duration) -> Result<(), wgpu::CurrentSurfaceTexture> {
        // Keep the loop going before doing anything else; there is no
        // termination condition besides closing the window.
        self.ctx.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        self.poll_upload();

        // Damped camera interpolation; any movement invalidates the film.
        let moved = {
            let camera = &mut self.ctx.camera;
            camera.controller.update(&mut camera.camera, dt)
        };
        if moved {
            self.ctx.write_camera_uniform();
            self.tracer.reset_accumulation();
        }

        match self.selector.mode() {
            RenderMode::Streaming => self.render_streaming(),
            RenderMode::Ready => self.render_ready(),
        }
    }

    /// Full rasterized draw of the scene graph.
    fn render_streaming(&mut self) -> Result<(), wgpu::CurrentSurfaceTexture> {
        let output = match self.ctx.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(t) | wgpu::CurrentSurfaceTexture::Suboptimal(t) => {
                t
            }
            other => return Err(other),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder =
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Render Encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.ctx.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.ctx.depth_texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });

            if let Some(scene) = &self.scene {
                render_pass.set_pipeline(&self.ctx.pipelines.basic);
                render_pass.set_bind_group(1, &self.ctx.camera.bind_group, &[]);
                render_pass.set_bind_group(2, &self.ctx.lights.bind_group, &[]);
                let mut visitor = DrawVisitor {
                    render_pass: &mut render_pass,
                    materials: &scene.materials,
                };
                scene.visit(&mut visitor);
            }
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    /// One progressive accumulation step, then blit the film.
    fn render_ready(&mut self) -> Result<(), wgpu::CurrentSurfaceTexture> {
        self.tracer
            .render_sample(&self.ctx.camera.camera, &self.ctx.projection);
        self.ctx
            .film_target
            .upload(&self.ctx.queue, self.tracer.film());

        let output = match self.ctx.surface.get_current_texture() {
            wgpu::CurrentSurfaceTexture::Success(t) | wgpu::CurrentSurfaceTexture::Suboptimal(t) => {
                t
            }
            other => return Err(other),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder =
            self.ctx
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Blit Encoder"),
                });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Blit Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.ctx.clear_colour),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });
            render_pass.set_pipeline(&self.ctx.pipelines.blit);
            render_pass.set_bind_group(0, &self.ctx.film_target.bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

/// Draws every mesh node through the basic pipeline.
struct DrawVisitor<'a, 'pass> {
    render_pass: &'a mut wgpu::RenderPass<'pass>,
    materials: &'a [Material],
}

impl NodeVisitor for DrawVisitor<'_, '_> {
    fn visit_mesh(&mut self, mesh: &MeshAsset, _world: &cgmath::Matrix4<f32>) {
        let Some(gpu) = &mesh.gpu else {
            log::warn!("mesh {:?} reached the draw pass without GPU buffers", mesh.geometry.name);
            return;
        };
        if let Some(material) = self
            .materials
            .get(mesh.material)
            .and_then(|m| m.gpu.as_ref())
        {
            self.render_pass.set_bind_group(0, &material.bind_group, &[]);
        }
        self.render_pass
            .set_vertex_buffer(0, gpu.vertex_buffer.slice(..));
        self.render_pass
            .set_vertex_buffer(1, gpu.instance_buffer.slice(..));
        self.render_pass
            .set_index_buffer(gpu.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        self.render_pass.draw_indexed(0..gpu.num_elements, 0, 0..1);
    }
}

pub struct App {
    async_runtime: tokio::runtime::Runtime,
    state: Option<AppState>,
    scene_path: PathBuf,
    last_time: Instant,
}

impl App {
    fn new(scene_path: PathBuf) -> Self {
        let async_runtime = tokio::runtime::Runtime::new().unwrap();
        Self {
            async_runtime,
            state: None,
            scene_path,
            last_time: Instant::now(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let window_attributes = Window::default_attributes().with_title("trace-view");
        let window = Arc::new(event_loop.create_window(window_attributes).unwrap());

        let scene_path = self.scene_path.clone();
        let state = self.async_runtime.block_on(async move {
            let mut state = AppState::new(window).await;
            state.load(&scene_path).await;
            state
        });

        let size = state.ctx.window.inner_size();
        self.state = Some(state);
        if let Some(state) = &mut self.state {
            state.resize(size.width, size.height);
        }
        self.last_time = Instant::now();
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: DeviceId,
        event: DeviceEvent,
    ) {
        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            match state.ctx.mouse.pressed {
                MouseButtonState::Left => {
                    state.ctx.camera.controller.handle_orbit(dx, dy);
                }
                MouseButtonState::Right => {
                    state.ctx.camera.controller.handle_pan(dx, dy);
                }
                MouseButtonState::None => {}
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        // Scroll-wheel zoom and touch orbit are window-level input.
        state.ctx.camera.controller.handle_window_events(&event);

        if let WindowEvent::CursorMoved { position, .. } = event {
            state.ctx.mouse.coords = position;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => state.resize(size.width, size.height),
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = state.ctx.window.inner_size();
                state.resize(size.width, size.height);
            }
            WindowEvent::MouseInput {
                state: button_state,
                button,
                ..
            } => match (button, button_state.is_pressed()) {
                (MouseButton::Left, true) => state.ctx.mouse.pressed = MouseButtonState::Left,
                (MouseButton::Right, true) => state.ctx.mouse.pressed = MouseButtonState::Right,
                (_, false) => state.ctx.mouse.pressed = MouseButtonState::None,
                _ => (),
            },
            WindowEvent::RedrawRequested => {
                let dt = self.last_time.elapsed();
                self.last_time = Instant::now();

                match state.frame(dt) {
                    Ok(_) => {}
                    // Reconfigure the surface if it's lost or outdated.
                    Err(wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated) => {
                        let size = state.ctx.window.inner_size();
                        state.resize(size.width, size.height);
                    }
                    Err(e) => {
                        log::error!("Unable to render {:?}", e);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Build the event loop and run the viewer until the window closes.
pub fn run(scene_path: PathBuf) -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        println!("Warning: Could not initialize logger: {}", e);
    }

    let event_loop = EventLoop::new()?;
    let mut app = App::new(scene_path);
    event_loop.run_app(&mut app)?;

    Ok(())
}
