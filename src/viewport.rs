//! Output surface sizing.
//!
//! The viewport is a pure description of the window's drawable area: physical
//! size plus the OS scale factor. Everything derived from a resize event
//! (camera aspect ratio, clamped pixel ratio, path-tracer film extent) is
//! computed here so the resize handler stays a thin reapplication of these
//! values.

/// Physical window dimensions together with the OS scale factor.
///
/// All fields come straight from winit; the methods are pure functions of
/// them, so applying the same viewport twice is a no-op by construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

/// Upper bound for the device pixel ratio used by the progressive renderer.
///
/// High-dpi displays report ratios of 3 and above; tracing that many pixels
/// per frame is wasted work, so the film is capped at 2x the logical size.
pub const MAX_PIXEL_RATIO: f64 = 2.0;

impl Viewport {
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        Self {
            // A zero-sized surface cannot be configured, keep at least 1px.
            width: width.max(1),
            height: height.max(1),
            scale_factor,
        }
    }

    /// Aspect ratio of the drawable surface, width over height.
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// The device pixel ratio clamped to `[1, MAX_PIXEL_RATIO]`.
    pub fn pixel_ratio(&self) -> f64 {
        self.scale_factor.clamp(1.0, MAX_PIXEL_RATIO)
    }

    /// Logical size of the window (physical size divided by the scale factor).
    pub fn logical_size(&self) -> (f64, f64) {
        let sf = if self.scale_factor > 0.0 {
            self.scale_factor
        } else {
            1.0
        };
        (self.width as f64 / sf, self.height as f64 / sf)
    }

    /// Resolution of the path-tracer film: the logical size scaled by the
    /// clamped pixel ratio, never zero in either dimension.
    pub fn film_extent(&self) -> (u32, u32) {
        let (lw, lh) = self.logical_size();
        let ratio = self.pixel_ratio();
        (
            (lw * ratio).round().max(1.0) as u32,
            (lh * ratio).round().max(1.0) as u32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_matches_dimensions() {
        let vp = Viewport::new(1920, 1080, 1.0);
        assert_eq!(vp.aspect(), 1920.0 / 1080.0);
    }

    #[test]
    fn pixel_ratio_is_clamped() {
        assert_eq!(Viewport::new(800, 600, 0.5).pixel_ratio(), 1.0);
        assert_eq!(Viewport::new(800, 600, 1.5).pixel_ratio(), 1.5);
        assert_eq!(Viewport::new(800, 600, 3.0).pixel_ratio(), 2.0);
    }

    #[test]
    fn film_extent_uses_clamped_ratio() {
        // scale factor 3 is clamped to 2: the film is logical * 2, which is
        // smaller than the physical surface.
        let vp = Viewport::new(3000, 1500, 3.0);
        assert_eq!(vp.film_extent(), (2000, 1000));

        // Ratios inside the cap reproduce the physical size exactly.
        let vp = Viewport::new(1600, 1200, 2.0);
        assert_eq!(vp.film_extent(), (1600, 1200));
    }

    #[test]
    fn degenerate_sizes_stay_positive() {
        let vp = Viewport::new(0, 0, 1.0);
        assert_eq!((vp.width, vp.height), (1, 1));
        assert!(vp.film_extent().0 >= 1);
        assert!(vp.film_extent().1 >= 1);
    }

    #[test]
    fn viewport_is_idempotent() {
        let a = Viewport::new(1024, 768, 1.25);
        let b = Viewport::new(a.width, a.height, a.scale_factor);
        assert_eq!(a, b);
        assert_eq!(a.film_extent(), b.film_extent());
    }
}
