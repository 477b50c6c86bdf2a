//! Camera types, orbit controller and uniforms for view/projection.
//!
//! The camera orbits a focal target: its pose is a yaw/pitch/radius triple
//! plus the target point, which maps directly onto the drag/scroll gestures
//! the viewer supports. The controller keeps a second copy of that pose as
//! the input target and eases the actual pose towards it every frame, so
//! motion stays smooth regardless of event timing.

use cgmath::{
    perspective, EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Vector3,
};
use instant::Duration;
use winit::event::{MouseScrollDelta, TouchPhase, WindowEvent};

#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

/// Camera pose as an orbit around a target point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub target: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
    pub radius: f32,
}

impl Camera {
    /// Start from an eye position looking at `target`; the pose is derived
    /// from the offset between the two.
    pub fn looking_at(eye: Point3<f32>, target: Point3<f32>) -> Self {
        let offset = eye - target;
        let radius = offset.magnitude().max(1e-3);
        let yaw = Rad(offset.z.atan2(offset.x));
        let pitch = Rad((offset.y / radius).clamp(-1.0, 1.0).asin());
        Self {
            target,
            yaw,
            pitch,
            radius,
        }
    }

    pub fn position(&self) -> Point3<f32> {
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        self.target
            + Vector3::new(
                self.radius * cos_pitch * cos_yaw,
                self.radius * sin_pitch,
                self.radius * cos_pitch * sin_yaw,
            )
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_at_rh(self.position(), self.target, Vector3::unit_y())
    }
}

/// Perspective projection parameters; the aspect ratio is the only part the
/// viewport sizer touches on resize.
pub struct Projection {
    pub aspect: f32,
    pub fovy: Rad<f32>,
    pub znear: f32,
    pub zfar: f32,
}

impl Projection {
    pub fn new<F: Into<Rad<f32>>>(width: u32, height: u32, fovy: F, znear: f32, zfar: f32) -> Self {
        Self {
            aspect: width as f32 / height as f32,
            fovy: fovy.into(),
            znear,
            zfar,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height as f32;
    }

    pub fn calc_matrix(&self) -> Matrix4<f32> {
        OPENGL_TO_WGPU_MATRIX * perspective(self.fovy, self.aspect, self.znear, self.zfar)
    }
}

/// Keep the pitch away from the poles, where look_at degenerates.
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 1e-3;
/// Fraction of the remaining distance to the input target covered per second.
const DAMPING: f32 = 10.0;
const MIN_RADIUS: f32 = 0.05;

/// Maps pointer drag/scroll/touch input to orbit/pan/zoom deltas and applies
/// them to the camera with damped interpolation.
pub struct OrbitController {
    /// Where the input wants the camera to be; the live camera eases here.
    goal: Camera,
    rotate_speed: f32,
    zoom_speed: f32,
    last_touch: Option<(f32, f32)>,
    initialized: bool,
}

impl OrbitController {
    pub fn new(rotate_speed: f32, zoom_speed: f32) -> Self {
        Self {
            goal: Camera::looking_at(Point3::new(1.0, 0.0, 0.0), Point3::origin()),
            rotate_speed,
            zoom_speed,
            last_touch: None,
            initialized: false,
        }
    }

    /// Orbit around the target from a pointer drag, in pixels.
    pub fn handle_orbit(&mut self, dx: f64, dy: f64) {
        self.goal.yaw += Rad(dx as f32 * self.rotate_speed);
        self.goal.pitch += Rad(dy as f32 * self.rotate_speed);
        self.goal.pitch.0 = self.goal.pitch.0.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Slide the focal target across the view plane.
    pub fn handle_pan(&mut self, dx: f64, dy: f64) {
        let (sin_yaw, cos_yaw) = self.goal.yaw.0.sin_cos();
        // View-plane basis: right is perpendicular to the orbit direction,
        // up is world up. Pan scales with the distance so it feels constant.
        let right = Vector3::new(-sin_yaw, 0.0, cos_yaw);
        let up = Vector3::unit_y();
        let scale = self.goal.radius * 0.002;
        self.goal.target += right * (-dx as f32 * scale) + up * (dy as f32 * scale);
    }

    pub fn handle_zoom(&mut self, amount: f32) {
        self.goal.radius =
            (self.goal.radius * (1.0 - amount * self.zoom_speed)).max(MIN_RADIUS);
    }

    /// Window-level input: scroll wheel zoom and single-touch orbit.
    pub fn handle_window_events(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseWheel { delta, .. } => {
                let amount = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 50.0,
                };
                self.handle_zoom(amount);
            }
            WindowEvent::Touch(touch) => match touch.phase {
                TouchPhase::Started => {
                    self.last_touch = Some((touch.location.x as f32, touch.location.y as f32));
                }
                TouchPhase::Moved => {
                    let (x, y) = (touch.location.x as f32, touch.location.y as f32);
                    if let Some((px, py)) = self.last_touch {
                        self.handle_orbit((x - px) as f64, (y - py) as f64);
                    }
                    self.last_touch = Some((x, y));
                }
                TouchPhase::Ended | TouchPhase::Cancelled => {
                    self.last_touch = None;
                }
            },
            _ => {}
        }
    }

    /// Ease the live camera towards the input goal.
    ///
    /// Returns whether the camera actually moved this frame; the frame driver
    /// uses that to rewrite the camera uniform and reset any accumulated
    /// progressive samples.
    pub fn update(&mut self, camera: &mut Camera, dt: Duration) -> bool {
        if !self.initialized {
            // Adopt the configured camera as the starting goal on first use
            // so the view doesn't lurch to the controller default.
            self.goal = *camera;
            self.initialized = true;
        }

        let t = (DAMPING * dt.as_secs_f32()).clamp(0.0, 1.0);
        let before = *camera;
        camera.yaw.0 += (self.goal.yaw.0 - camera.yaw.0) * t;
        camera.pitch.0 += (self.goal.pitch.0 - camera.pitch.0) * t;
        camera.radius += (self.goal.radius - camera.radius) * t;
        camera.target += (self.goal.target - camera.target) * t;

        // Snap when close enough, otherwise the exponential tail keeps
        // reporting "moved" forever and accumulation never restarts.
        if (self.goal.yaw.0 - camera.yaw.0).abs() < 1e-5
            && (self.goal.pitch.0 - camera.pitch.0).abs() < 1e-5
            && (self.goal.radius - camera.radius).abs() < 1e-5
            && (self.goal.target - camera.target).magnitude() < 1e-5
        {
            *camera = self.goal;
        }

        *camera != before
    }
}

/// The uniform block every shader pass reads for the camera.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    view_position: [f32; 4],
    view_proj: [[f32; 4]; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view_position: [0.0; 4],
            view_proj: Matrix4::identity().into(),
        }
    }

    pub fn update_view_proj(&mut self, camera: &Camera, projection: &Projection) {
        self.view_position = camera.position().to_homogeneous().into();
        self.view_proj = (projection.calc_matrix() * camera.calc_matrix()).into();
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera state bundled with its GPU resources.
pub struct CameraResources {
    pub camera: Camera,
    pub controller: OrbitController,
    pub uniform: CameraUniform,
    pub buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Deg;

    fn camera() -> Camera {
        Camera::looking_at(Point3::new(30.0, 30.0, 30.0), Point3::origin())
    }

    #[test]
    fn looking_at_round_trips_the_eye() {
        let eye = Point3::new(30.0, 30.0, 30.0);
        let cam = Camera::looking_at(eye, Point3::origin());
        let p = cam.position();
        assert!((p.x - eye.x).abs() < 1e-3);
        assert!((p.y - eye.y).abs() < 1e-3);
        assert!((p.z - eye.z).abs() < 1e-3);
    }

    #[test]
    fn projection_resize_tracks_aspect() {
        let mut projection = Projection::new(800, 600, Deg(75.0), 0.1, 1000.0);
        projection.resize(1920, 1080);
        assert_eq!(projection.aspect, 1920.0 / 1080.0);
    }

    #[test]
    fn damping_converges_to_the_goal() {
        let mut cam = camera();
        let mut controller = OrbitController::new(0.005, 0.1);
        // First update adopts the camera pose, then the orbit moves the goal.
        controller.update(&mut cam, Duration::from_millis(16));
        controller.handle_orbit(100.0, 0.0);

        let mut moved_frames = 0;
        for _ in 0..600 {
            if controller.update(&mut cam, Duration::from_millis(16)) {
                moved_frames += 1;
            }
        }
        assert!(moved_frames > 0);
        assert!((cam.yaw.0 - controller.goal.yaw.0).abs() < 1e-4);
        // Once settled the controller must report "no movement" again.
        assert!(!controller.update(&mut cam, Duration::from_millis(16)));
    }

    #[test]
    fn pitch_is_clamped_away_from_the_poles() {
        let mut controller = OrbitController::new(0.005, 0.1);
        controller.handle_orbit(0.0, 1e6);
        assert!(controller.goal.pitch.0 <= PITCH_LIMIT);
        controller.handle_orbit(0.0, -1e6);
        assert!(controller.goal.pitch.0 >= -PITCH_LIMIT);
    }

    #[test]
    fn zoom_keeps_the_radius_positive() {
        let mut controller = OrbitController::new(0.005, 0.1);
        for _ in 0..1000 {
            controller.handle_zoom(5.0);
        }
        assert!(controller.goal.radius >= MIN_RADIUS);
    }
}
